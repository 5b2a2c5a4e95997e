//! # Script Parser
//!
//! A script mixes `define ... end` blocks with top-level lines:
//!
//! ```text
//! In a @ 0, 0 momentary
//! NOT inv @ 150, 0
//! Out led @ 300, 0
//!
//! a -> inv
//! inv.out -> led.in
//! ```
//!
//! Every `define` block is handled before any top-level line, so a node may
//! use a gate defined further down. Node lines are handled before connection
//! lines. Problems never abort a compile: a bad line is reported as a
//! [`Diagnostic`] and skipped, and whatever could be built is returned.

use crate::define::define;
use crate::definition::{CaptureError, GateDefinition, Registration, Registry};
use crate::gates::{self, Pin};
use crate::graph::{Graph, GraphError, Node, NodeKind};
use crate::serialize::{assign_missing_ids, serialize};
use anyhow::{Context, Result};
use std::fmt;
use std::path::Path;

/// One problem found while compiling, at a 1-based script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line {}: {}", self.line, self.message)
    }
}

/// Result of [`compile`]: whatever graph could be built, the text of every
/// `define` block that compiled, and everything that went wrong.
#[derive(Debug)]
pub struct Compilation {
    pub graph: Graph,
    /// Successful blocks verbatim, each followed by a blank line
    pub definitions: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl Compilation {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Compile `script`, registering its gates in `registry` and building a
/// fresh graph from its node and connection lines.
pub fn compile(script: &str, registry: &mut Registry) -> Compilation {
    let mut diagnostics = Vec::new();
    let mut definitions = String::new();
    let mut remaining: Vec<(usize, &str)> = Vec::new();

    // (header line number, block text)
    let mut open: Option<(usize, String)> = None;
    for (idx, raw) in script.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw.trim();
        if let Some((_, block)) = open.as_mut() {
            block.push_str(raw);
            block.push('\n');
            if trimmed == "end" {
                if let Some((start, block)) = open.take() {
                    compile_block(start, block, registry, &mut definitions, &mut diagnostics);
                }
            }
        } else if trimmed.starts_with("define ") {
            open = Some((line_no, format!("{raw}\n")));
        } else {
            remaining.push((line_no, raw));
        }
    }
    if let Some((start, _)) = open {
        diagnostics.push(Diagnostic {
            line: start,
            message: "Unclosed define block".to_string(),
        });
    }

    let mut graph = Graph::new();
    let (connections, declarations): (Vec<_>, Vec<_>) = remaining
        .into_iter()
        .map(|(n, line)| (n, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with("//"))
        .partition(|(_, line)| line.contains("->"));

    for (line_no, line) in declarations {
        let result = if line.contains('@') {
            declare_node(line, &mut graph, registry)
        } else {
            Err(format!("Unrecognized line: {line}"))
        };
        if let Err(message) = result {
            diagnostics.push(Diagnostic { line: line_no, message });
        }
    }
    for (line_no, line) in connections {
        if let Err(message) = connect_line(line, &mut graph) {
            diagnostics.push(Diagnostic { line: line_no, message });
        }
    }
    diagnostics.sort_by_key(|d| d.line);

    for diagnostic in &diagnostics {
        log::warn!("{diagnostic}");
    }
    log::debug!(
        "compiled {} nodes, {} connections, {} gates",
        graph.node_count(),
        graph.connection_count(),
        registry.len()
    );
    Compilation {
        graph,
        definitions,
        diagnostics,
    }
}

fn compile_block(
    start: usize,
    block: String,
    registry: &mut Registry,
    definitions: &mut String,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match define(&block, registry) {
        Ok(outcome) => {
            if outcome == Registration::Replaced {
                log::info!("line {start}: gate redefined");
            }
            definitions.push_str(&block);
            definitions.push('\n');
        }
        Err(err) => diagnostics.push(Diagnostic {
            line: start + err.line().unwrap_or(0),
            message: format!("Define error: {err}"),
        }),
    }
}

/// `Type id @ x, y [momentary]`
fn declare_node(line: &str, graph: &mut Graph, registry: &Registry) -> Result<(), String> {
    let invalid = || "Invalid node format".to_string();
    let (head, place) = line.split_once('@').ok_or_else(invalid)?;
    let mut head = head.split_whitespace();
    let (Some(kind), Some(id), None) = (head.next(), head.next(), head.next()) else {
        return Err(invalid());
    };
    let (x, rest) = place.split_once(',').ok_or_else(invalid)?;
    let mut rest = rest.split_whitespace();
    let x: i32 = x.trim().parse().map_err(|_| invalid())?;
    let y: i32 = rest.next().and_then(|y| y.parse().ok()).ok_or_else(invalid)?;
    let momentary = match rest.next() {
        None => false,
        Some("momentary") => true,
        Some(_) => return Err(invalid()),
    };

    let kind = gates::create_kind(kind, registry).map_err(|e| e.to_string())?;
    let mut node = Node::new(id, kind, (x, y));
    node.momentary = momentary && matches!(node.kind, NodeKind::Pin(Pin::In));
    graph.add_node(node).map_err(|e| e.to_string())?;
    Ok(())
}

/// `node[.slot] -> node[.slot]`, slots defaulting to `out` and `in`.
fn connect_line(line: &str, graph: &mut Graph) -> Result<(), String> {
    let (left, right) = line.split_once("->").ok_or_else(|| "Invalid connection".to_string())?;
    let endpoint = |text: &str, default: &'static str| -> Result<(String, String), String> {
        let (node, slot) = text.split_once('.').unwrap_or((text, default));
        let (node, slot) = (node.trim(), slot.trim());
        if node.is_empty() || slot.is_empty() {
            return Err(format!("Invalid connection endpoint '{}'", text.trim()));
        }
        Ok((node.to_string(), slot.to_string()))
    };
    let (out_id, out_slot) = endpoint(left, gates::OUT)?;
    let (in_id, in_slot) = endpoint(right, gates::IN)?;

    let find = |id: &str| graph.find(id).ok_or_else(|| GraphError::UnknownNode(id.to_string()).to_string());
    let output = find(&out_id)?;
    let input = find(&in_id)?;
    graph
        .connect(output, &out_slot, input, &in_slot)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

/// An editing session: the script text, the graph it produced, and the gates
/// it defined. Edits flow both ways: [`Document::set_script`] rebuilds the
/// graph from text, [`Document::refresh_script`] rewrites the text from the
/// graph.
#[derive(Debug, Default)]
pub struct Document {
    script: String,
    last_parsed: Option<String>,
    definitions: String,
    graph: Graph,
    /// Gates known before any script text; every parse starts from a copy.
    library: Registry,
    /// `library` plus the gates of the last parse and of captures since.
    registry: Registry,
    diagnostics: Vec<Diagnostic>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from gates that are already known, e.g. a shared library.
    pub fn with_registry(library: Registry) -> Self {
        Document {
            registry: library.clone(),
            library,
            ..Self::default()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let mut doc = Self::new();
        doc.set_script(&text);
        Ok(doc)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, &self.script).with_context(|| format!("writing {}", path.display()))
    }

    /// Replace the script text and rebuild the graph from it. Text identical
    /// to the last parsed text is a no-op; returns whether a rebuild happened.
    ///
    /// Each parse compiles against a fresh copy of the library, so gates from
    /// an earlier parse never satisfy a forward reference in this one.
    pub fn set_script(&mut self, text: &str) -> bool {
        self.script = text.to_string();
        if self.last_parsed.as_deref() == Some(text) {
            return false;
        }
        let mut registry = self.library.clone();
        let compiled = compile(text, &mut registry);
        self.registry = registry;
        self.graph = compiled.graph;
        self.definitions = compiled.definitions;
        self.diagnostics = compiled.diagnostics;
        self.last_parsed = Some(text.to_string());
        true
    }

    /// Rewrite the script from the live graph after graph edits. Unnamed
    /// nodes receive ids.
    pub fn refresh_script(&mut self) -> &str {
        assign_missing_ids(&mut self.graph);
        self.script = serialize(&self.graph, &self.definitions);
        self.last_parsed = Some(self.script.clone());
        &self.script
    }

    /// Turn the live graph into a new gate named `name`, register it and keep
    /// its regenerated `define` block in the script.
    pub fn capture_gate(&mut self, name: &str) -> Result<Registration, CaptureError> {
        let definition = GateDefinition::capture(name, &self.graph)?;
        let block = definition.to_block(&self.registry)?;
        let outcome = define(&block, &mut self.registry).map_err(CaptureError::from)?;
        self.definitions.push_str(&block);
        self.definitions.push('\n');
        self.refresh_script();
        Ok(outcome)
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Mutable access for interactive edits; call [`Document::refresh_script`]
    /// afterwards to bring the text up to date.
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn definitions(&self) -> &str {
        &self.definitions
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}
