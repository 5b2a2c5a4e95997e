//! # `define ... end` blocks
//!
//! ```text
//! define HA(a, b) -> (sum, carry):
//!   sum = (a AND NOT b) OR (b AND NOT a)
//!   carry = a AND b
//! end
//! ```
//!
//! Assignments compile top to bottom; each name bound by an assignment is
//! visible to the lines after it. A block that fails anywhere registers
//! nothing.

use crate::definition::{GateDefinition, Registration, Registry};
use crate::expr::{self, CompileError, DefinitionBuilder};
use crate::gates;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DefineError {
    #[error("Empty define block")]
    Empty,
    #[error("Block must start with 'define'")]
    MissingKeyword,
    #[error("Missing '(' in define")]
    MissingOpenParen,
    #[error("Missing ')' for inputs")]
    MissingCloseParen,
    #[error("Missing '->' in define")]
    MissingArrow,
    #[error("Missing output parentheses")]
    MissingOutputParens,
    #[error("Gate must have name, inputs, and outputs")]
    Incomplete,
    #[error("Invalid name: {0}")]
    InvalidName(String),
    #[error("Gate name {0} is reserved")]
    ReservedName(String),
    #[error("Invalid assignment: {text}")]
    InvalidAssignment { line: usize, text: String },
    #[error("{source}")]
    Expression { line: usize, source: CompileError },
    #[error(transparent)]
    Compile(#[from] CompileError),
}

impl DefineError {
    /// Zero-based line offset within the block, when the error belongs to a
    /// body line. The header is line 0.
    pub fn line(&self) -> Option<usize> {
        match self {
            DefineError::InvalidAssignment { line, .. } | DefineError::Expression { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// The parsed `define Name(ins) -> (outs):` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_header(line: &str) -> Result<Header, DefineError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(DefineError::Empty);
    }
    let rest = line.strip_prefix("define ").ok_or(DefineError::MissingKeyword)?.trim();

    let open = rest.find('(').ok_or(DefineError::MissingOpenParen)?;
    let close = rest
        .find(')')
        .filter(|&close| close > open)
        .ok_or(DefineError::MissingCloseParen)?;
    let name = rest[..open].trim().to_string();
    let inputs = split_list(&rest[open + 1..close]);

    let arrow = rest[close..].find("->").ok_or(DefineError::MissingArrow)? + close;
    let after = rest[arrow + 2..].trim();
    let (Some(out_open), Some(out_close)) = (after.find('('), after.find(')')) else {
        return Err(DefineError::MissingOutputParens);
    };
    if out_close < out_open {
        return Err(DefineError::MissingOutputParens);
    }
    let outputs = split_list(&after[out_open + 1..out_close]);

    if name.is_empty() || inputs.is_empty() || outputs.is_empty() {
        return Err(DefineError::Incomplete);
    }
    // names must be reachable from calls, node lines and dotted references
    if let Some(bad) = std::iter::once(&name)
        .chain(&inputs)
        .chain(&outputs)
        .find(|s| !expr::is_identifier(s))
    {
        return Err(DefineError::InvalidName(bad.clone()));
    }
    if gates::is_reserved(&name) {
        return Err(DefineError::ReservedName(name));
    }
    Ok(Header { name, inputs, outputs })
}

/// Parse and compile one block against `registry` without registering it.
pub fn parse_definition(block: &str, registry: &Registry) -> Result<GateDefinition, DefineError> {
    let mut lines = block.lines();
    let header = parse_header(lines.next().ok_or(DefineError::Empty)?)?;

    let mut builder = DefinitionBuilder::new(&header.name, &header.inputs, &header.outputs, registry);
    for (offset, raw) in lines.enumerate() {
        let line_no = offset + 1;
        let line = raw.trim();
        if line.is_empty() || line == "end" || line.starts_with("//") {
            continue;
        }
        let Some((lhs, rhs)) = line.split_once('=') else {
            return Err(DefineError::InvalidAssignment {
                line: line_no,
                text: line.to_string(),
            });
        };
        let lhs = lhs.trim();
        if lhs.is_empty() {
            return Err(DefineError::InvalidAssignment {
                line: line_no,
                text: line.to_string(),
            });
        }
        let signal = builder.compile(rhs).map_err(|source| DefineError::Expression {
            line: line_no,
            source,
        })?;
        builder.bind(lhs, signal);
    }
    Ok(builder.finish()?)
}

/// Compile `block` and register the gate under its name. An existing gate of
/// the same name is replaced.
pub fn define(block: &str, registry: &mut Registry) -> Result<Registration, DefineError> {
    let definition = parse_definition(block, registry)?;
    Ok(registry.register(definition))
}
