//! # Expression Compiler
//!
//! Turns one boolean expression into nodes and connections appended to the
//! [`GateDefinition`] being built. Precedence is decided by scanning, not by
//! operator binding strength:
//!
//! 1. literals `0` / `1`
//! 2. `signal.output` on a multi-output gate
//! 3. parentheses wrapping the whole expression
//! 4. `NOT <expr>` prefix
//! 5. leftmost ` AND ` at depth 0, then leftmost ` OR ` at depth 0
//! 6. calls `Gate(arg, ...)`
//! 7. bare signal names
//!
//! So `NOT a AND b` is `NOT (a AND b)`, and `a OR b AND c` is `(a OR b) AND c`.

use crate::definition::{ConnectionDefinition, GateDefinition, NodeDefinition, Registry};
use crate::gates::{self, Pin, Primitive};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

const GATE_X: i32 = 150;
const OUTPUT_X: i32 = 300;
const PIN_SPACING: i32 = 60;

/// Where a named signal comes from: a node id and one of its output slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub node: u32,
    pub slot: String,
}

impl Signal {
    fn out(node: u32) -> Self {
        Signal {
            node,
            slot: gates::OUT.to_string(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Empty expression")]
    Empty,
    #[error("Unbalanced parentheses in {0}")]
    Unbalanced(String),
    #[error("Malformed call: {0}")]
    MalformedCall(String),
    #[error("Unknown signal: {0}")]
    UnknownSignal(String),
    #[error("Unknown gate type: {0}")]
    UnknownGate(String),
    #[error("Unknown output {output} on {signal}")]
    UnknownOutput { signal: String, output: String },
    #[error("{gate} takes {expected} input(s), got {got}")]
    Arity { gate: String, expected: usize, got: usize },
    #[error("Output signal not defined: {0}")]
    OutputNotDefined(String),
}

/// Accumulates one gate definition while its assignments are compiled.
///
/// Nothing reaches the registry from here; a failed build is simply dropped.
pub struct DefinitionBuilder<'r> {
    registry: &'r Registry,
    definition: GateDefinition,
    signals: HashMap<String, Signal>,
    next_id: u32,
    const_low: Option<u32>,
    const_high: Option<u32>,
    cursor: i32,
}

impl<'r> DefinitionBuilder<'r> {
    /// Start a definition; creates one `In` pin per input and binds its name.
    pub fn new(name: &str, inputs: &[String], outputs: &[String], registry: &'r Registry) -> Self {
        let mut builder = DefinitionBuilder {
            registry,
            definition: GateDefinition::new(name),
            signals: HashMap::new(),
            next_id: 0,
            const_low: None,
            const_high: None,
            cursor: 0,
        };
        builder.definition.inputs = inputs.to_vec();
        builder.definition.outputs = outputs.to_vec();
        for (idx, input) in inputs.iter().enumerate() {
            let id = builder.node(Pin::In.name(), (0, idx as i32 * PIN_SPACING));
            builder.definition.input_pins.push(id);
            builder.signals.insert(input.clone(), Signal::out(id));
        }
        builder
    }

    pub fn signal(&self, name: &str) -> Option<&Signal> {
        self.signals.get(name)
    }

    pub fn bind(&mut self, name: &str, signal: Signal) {
        self.signals.insert(name.to_string(), signal);
    }

    /// Compile `expr`, appending whatever nodes it needs.
    pub fn compile(&mut self, expr: &str) -> Result<Signal, CompileError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(CompileError::Empty);
        }
        if !balanced(expr) {
            return Err(CompileError::Unbalanced(expr.to_string()));
        }
        match expr {
            "0" => return Ok(Signal::out(self.constant_low())),
            "1" => return Ok(Signal::out(self.constant_high())),
            _ => {}
        }
        if let Some((base, output)) = split_dotted(expr) {
            return self.dotted(expr, base, output);
        }
        if let Some(inner) = strip_outer_parens(expr) {
            return self.compile(inner);
        }
        if let Some(operand) = not_operand(expr) {
            let input = self.compile(operand)?;
            return Ok(self.not(input));
        }
        if let Some((left, right)) = split_binary(expr, " AND ") {
            let left = self.compile(left)?;
            let right = self.compile(right)?;
            return Ok(self.and(left, right));
        }
        if let Some((left, right)) = split_binary(expr, " OR ") {
            let left = self.compile(left)?;
            let right = self.compile(right)?;
            return Ok(self.or(left, right));
        }
        if let Some(open) = expr.find('(') {
            return self.call(expr, open);
        }
        self.signals
            .get(expr)
            .cloned()
            .ok_or_else(|| CompileError::UnknownSignal(expr.to_string()))
    }

    /// Wire one `Out` pin per declared output and hand back the definition.
    pub fn finish(mut self) -> Result<GateDefinition, CompileError> {
        let outputs = self.definition.outputs.clone();
        for (idx, output) in outputs.iter().enumerate() {
            let source = self
                .signals
                .get(output)
                .cloned()
                .ok_or_else(|| CompileError::OutputNotDefined(output.clone()))?;
            let pin = self.node(Pin::Out.name(), (OUTPUT_X, idx as i32 * PIN_SPACING));
            self.definition.output_pins.push(pin);
            self.connect(source, pin, gates::IN);
        }
        Ok(self.definition)
    }

    fn node(&mut self, kind: &str, position: (i32, i32)) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.definition.nodes.push(NodeDefinition {
            kind: kind.to_string(),
            id,
            position,
        });
        id
    }

    /// A registered gate other than the one being defined. The previous
    /// registration of this gate's own name is never visible to its body.
    fn lookup(&self, name: &str) -> Option<&'r Arc<GateDefinition>> {
        if name == self.definition.name {
            return None;
        }
        self.registry.get(name)
    }

    fn gate_node(&mut self, kind: &str, height: i32) -> u32 {
        let id = self.node(kind, (GATE_X, self.cursor));
        self.cursor += height;
        id
    }

    fn connect(&mut self, from: Signal, to: u32, slot: &str) {
        self.definition.connections.push(ConnectionDefinition {
            output_node: from.node,
            output_slot: from.slot,
            input_node: to,
            input_slot: slot.to_string(),
        });
    }

    fn constant_low(&mut self) -> u32 {
        if let Some(id) = self.const_low {
            return id;
        }
        let id = self.node(Pin::In.name(), (-100, 0));
        self.const_low = Some(id);
        id
    }

    fn constant_high(&mut self) -> u32 {
        if let Some(id) = self.const_high {
            return id;
        }
        let low = self.constant_low();
        let id = self.node(Primitive::Not.name(), (-50, 0));
        self.connect(Signal::out(low), id, gates::IN);
        self.const_high = Some(id);
        id
    }

    fn not(&mut self, input: Signal) -> Signal {
        let id = self.gate_node(Primitive::Not.name(), 50);
        self.connect(input, id, gates::IN);
        Signal::out(id)
    }

    fn and(&mut self, left: Signal, right: Signal) -> Signal {
        let id = self.gate_node(Primitive::And.name(), 50);
        self.connect(left, id, "in0");
        self.connect(right, id, "in1");
        Signal::out(id)
    }

    /// `OR` uses a registered two-input `OR` gate when there is one (and it is
    /// not the gate being defined), else `NOT (NOT a AND NOT b)`.
    fn or(&mut self, left: Signal, right: Signal) -> Signal {
        let registered = self
            .lookup("OR")
            .filter(|def| def.input_pins.len() == 2 && !def.output_pins.is_empty())
            .map(|def| def.output_pins.len());
        if let Some(outputs) = registered {
            let id = self.gate_node("OR", 60);
            self.connect(left, id, "in0");
            self.connect(right, id, "in1");
            return Signal {
                node: id,
                slot: gates::slot_key("out", 0, outputs),
            };
        }
        let not_left = self.not(left);
        let not_right = self.not(right);
        let both = self.and(not_left, not_right);
        self.not(both)
    }

    fn call(&mut self, expr: &str, open: usize) -> Result<Signal, CompileError> {
        let name = expr[..open].trim();
        let malformed = || CompileError::MalformedCall(expr.to_string());
        if !is_identifier(name) || !expr.ends_with(')') || matching_close(expr, open) != Some(expr.len() - 1) {
            return Err(malformed());
        }
        let inner = &expr[open + 1..expr.len() - 1];
        let args = split_args(inner);

        if let Some(primitive) = Primitive::from_name(name) {
            let expected = primitive.input_slots().len();
            if args.len() != expected {
                return Err(CompileError::Arity {
                    gate: name.to_string(),
                    expected,
                    got: args.len(),
                });
            }
            let mut signals = Vec::with_capacity(args.len());
            for arg in &args {
                signals.push(self.compile(arg)?);
            }
            let mut signals = signals.into_iter();
            return Ok(match (primitive, signals.next(), signals.next()) {
                (Primitive::Not, Some(a), _) => self.not(a),
                (Primitive::And, Some(a), Some(b)) => self.and(a, b),
                _ => return Err(malformed()),
            });
        }

        let definition = self
            .lookup(name)
            .ok_or_else(|| CompileError::UnknownGate(name.to_string()))?;
        let arity = definition.input_pins.len();
        if args.len() != arity {
            return Err(CompileError::Arity {
                gate: name.to_string(),
                expected: arity,
                got: args.len(),
            });
        }
        let mut signals = Vec::with_capacity(args.len());
        for arg in &args {
            signals.push(self.compile(arg)?);
        }
        let id = self.gate_node(name, 60);
        for (idx, signal) in signals.into_iter().enumerate() {
            self.connect(signal, id, &gates::slot_key("in", idx, arity));
        }
        Ok(Signal {
            node: id,
            slot: gates::slot_key("out", 0, definition.output_pins.len()),
        })
    }

    /// `base.output`: the same node as `base`, another of its outputs.
    fn dotted(&self, expr: &str, base: &str, output: &str) -> Result<Signal, CompileError> {
        let signal = self
            .signals
            .get(base)
            .ok_or_else(|| CompileError::UnknownSignal(expr.to_string()))?;
        let kind = self
            .definition
            .node(signal.node)
            .map(|n| n.kind.as_str())
            .unwrap_or_default();
        let slot = self.resolve_output(kind, output).ok_or_else(|| CompileError::UnknownOutput {
            signal: base.to_string(),
            output: output.to_string(),
        })?;
        Ok(Signal {
            node: signal.node,
            slot,
        })
    }

    fn resolve_output(&self, kind: &str, output: &str) -> Option<String> {
        if let Some(p) = Primitive::from_name(kind) {
            return p.output_slots().contains(&output).then(|| output.to_string());
        }
        if let Some(p) = Pin::from_name(kind) {
            return p.output_slots().contains(&output).then(|| output.to_string());
        }
        let definition = self.lookup(kind)?;
        let count = definition.output_pins.len();
        (0..count).find_map(|idx| {
            let key = gates::slot_key("out", idx, count);
            let label = definition.outputs.get(idx).map(String::as_str);
            (key == output || label == Some(output)).then_some(key)
        })
    }
}

pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn balanced(expr: &str) -> bool {
    let mut depth = 0i32;
    for b in expr.bytes() {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Index of the `)` closing the `(` at `open`.
fn matching_close(expr: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    for (idx, b) in expr.bytes().enumerate().skip(open) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_dotted(expr: &str) -> Option<(&str, &str)> {
    let (base, output) = expr.split_once('.')?;
    (is_identifier(base) && is_identifier(output)).then_some((base, output))
}

/// `(x)` -> `x`, only when the first paren closes at the very end.
fn strip_outer_parens(expr: &str) -> Option<&str> {
    if expr.starts_with('(') && matching_close(expr, 0) == Some(expr.len() - 1) {
        Some(expr[1..expr.len() - 1].trim())
    } else {
        None
    }
}

fn not_operand(expr: &str) -> Option<&str> {
    if let Some(rest) = expr.strip_prefix("NOT ") {
        let rest = rest.trim();
        return (!rest.is_empty()).then_some(rest);
    }
    // NOT(x) where the paren spans the rest of the expression
    if expr.starts_with("NOT(") && matching_close(expr, 3) == Some(expr.len() - 1) {
        return Some(&expr[3..]);
    }
    None
}

/// Split at the leftmost `token` outside parentheses.
fn split_binary<'a>(expr: &'a str, token: &str) -> Option<(&'a str, &'a str)> {
    let bytes = expr.as_bytes();
    let mut depth = 0i32;
    for idx in 0..bytes.len() {
        match bytes[idx] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ if depth == 0 && bytes[idx..].starts_with(token.as_bytes()) => {
                return Some((expr[..idx].trim(), expr[idx + token.len()..].trim()));
            }
            _ => {}
        }
    }
    None
}

/// Split call arguments at depth-0 commas.
fn split_args(inner: &str) -> Vec<&str> {
    if inner.trim().is_empty() {
        return Vec::new();
    }
    let mut args = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (idx, b) in inner.bytes().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => depth -= 1,
            b',' if depth == 0 => {
                args.push(inner[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    args.push(inner[start..].trim());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define::define;
    use crate::definition::Registration;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn kinds(def: &GateDefinition) -> Vec<&str> {
        def.nodes.iter().map(|n| n.kind.as_str()).collect()
    }

    #[test]
    fn literals_share_one_constant_pin() {
        let registry = Registry::new();
        let mut b = DefinitionBuilder::new("K", &names(&["a"]), &names(&["y"]), &registry);
        let low = b.compile("0").unwrap();
        let high = b.compile("1").unwrap();
        assert_eq!(b.compile("0").unwrap(), low);
        assert_eq!(b.compile("1").unwrap(), high);
        b.bind("y", high);
        let def = b.finish().unwrap();
        assert_eq!(kinds(&def), vec!["In", "In", "NOT", "Out"]);
        // the constant pin is not exported
        assert_eq!(def.input_pins, vec![0]);
    }

    #[test]
    fn precedence_is_scan_order() {
        let registry = Registry::new();
        let mut b = DefinitionBuilder::new("P", &names(&["a", "b"]), &names(&["y"]), &registry);
        let y = b.compile("NOT a AND b").unwrap();
        b.bind("y", y);
        let def = b.finish().unwrap();
        // NOT applies to the whole AND
        assert_eq!(kinds(&def), vec!["In", "In", "AND", "NOT", "Out"]);
    }

    #[test]
    fn outer_parens_only_when_they_wrap_everything() {
        assert_eq!(strip_outer_parens("(a AND b)"), Some("a AND b"));
        assert_eq!(strip_outer_parens("(a) AND (b)"), None);
        assert_eq!(strip_outer_parens("((a))"), Some("(a)"));
        assert_eq!(split_binary("(a AND b) AND c", " AND "), Some(("(a AND b)", "c")));
        assert_eq!(split_binary("(a AND b)", " AND "), None);
    }

    #[test]
    fn not_call_spelling() {
        assert_eq!(not_operand("NOT(a AND b)"), Some("(a AND b)"));
        assert_eq!(not_operand("NOT(a) AND b"), None);
        assert_eq!(not_operand("NOT a"), Some("a"));
        assert_eq!(not_operand("NOTE"), None);
    }

    #[test]
    fn inline_or_expansion() {
        let registry = Registry::new();
        let mut b = DefinitionBuilder::new("O", &names(&["a", "b"]), &names(&["y"]), &registry);
        let y = b.compile("a OR b").unwrap();
        b.bind("y", y);
        let def = b.finish().unwrap();
        assert_eq!(kinds(&def), vec!["In", "In", "NOT", "NOT", "AND", "NOT", "Out"]);
    }

    #[test]
    fn registered_or_is_called() {
        let mut registry = Registry::new();
        define("define OR(a, b) -> (out):\n  out = NOT ((NOT a) AND (NOT b))\nend\n", &mut registry).unwrap();
        let mut b = DefinitionBuilder::new("O", &names(&["a", "b"]), &names(&["y"]), &registry);
        let y = b.compile("a OR b").unwrap();
        assert_eq!(y.slot, "out");
        b.bind("y", y);
        let def = b.finish().unwrap();
        assert_eq!(kinds(&def), vec!["In", "In", "OR", "Out"]);
    }

    #[test]
    fn gate_body_never_sees_its_own_name() {
        let mut registry = Registry::new();
        let or = "define OR(a, b) -> (out):\n  out = a OR b\nend\n";
        define(or, &mut registry).unwrap();
        let first = registry.get("OR").unwrap().fingerprint();
        // the previous OR stays out of the rebuilt body
        assert_eq!(define(or, &mut registry), Ok(Registration::Unchanged));
        assert_eq!(registry.get("OR").unwrap().fingerprint(), first);
        assert_eq!(
            kinds(registry.get("OR").unwrap()),
            vec!["In", "In", "NOT", "NOT", "AND", "NOT", "Out"]
        );

        define("define X(a) -> (y):\n  y = NOT a\nend\n", &mut registry).unwrap();
        let mut b = DefinitionBuilder::new("X", &names(&["a"]), &names(&["y"]), &registry);
        assert_eq!(b.compile("X(a)"), Err(CompileError::UnknownGate("X".into())));
    }

    #[test]
    fn dotted_outputs_resolve_labels() {
        let mut registry = Registry::new();
        define("define HA(a, b) -> (sum, carry):\n  sum = a AND NOT b\n  carry = a AND b\nend\n", &mut registry).unwrap();
        let mut b = DefinitionBuilder::new("T", &names(&["x", "y"]), &names(&["c"]), &registry);
        let h = b.compile("HA(x, y)").unwrap();
        assert_eq!(h.slot, "out0");
        b.bind("h", h.clone());
        assert_eq!(b.compile("h.carry").unwrap(), Signal { node: h.node, slot: "out1".into() });
        assert_eq!(b.compile("h.out1").unwrap(), Signal { node: h.node, slot: "out1".into() });
        assert_eq!(
            b.compile("h.borrow"),
            Err(CompileError::UnknownOutput { signal: "h".into(), output: "borrow".into() })
        );
        assert_eq!(b.compile("q.carry"), Err(CompileError::UnknownSignal("q.carry".into())));
    }

    #[test]
    fn nested_call_arguments() {
        let mut registry = Registry::new();
        define("define NAND(a, b) -> (y):\n  y = NOT (a AND b)\nend\n", &mut registry).unwrap();
        let mut b = DefinitionBuilder::new("T", &names(&["a", "b", "c"]), &names(&["y"]), &registry);
        let y = b.compile("NAND(a, NAND(b, c))").unwrap();
        b.bind("y", y);
        let def = b.finish().unwrap();
        assert_eq!(kinds(&def), vec!["In", "In", "In", "NAND", "NAND", "Out"]);
        let outer = &def.nodes[4];
        let wired: Vec<_> = def
            .connections
            .iter()
            .filter(|c| c.input_node == outer.id)
            .map(|c| (c.output_node, c.input_slot.as_str()))
            .collect();
        assert_eq!(wired, vec![(0, "in0"), (3, "in1")]);
    }

    #[test]
    fn call_errors() {
        let mut registry = Registry::new();
        define("define INV(a) -> (y):\n  y = NOT a\nend\n", &mut registry).unwrap();
        let mut b = DefinitionBuilder::new("T", &names(&["a", "b"]), &names(&["y"]), &registry);
        assert_eq!(b.compile("XOR(a, b)"), Err(CompileError::UnknownGate("XOR".into())));
        assert_eq!(
            b.compile("INV(a, b)"),
            Err(CompileError::Arity { gate: "INV".into(), expected: 1, got: 2 })
        );
        assert_eq!(
            b.compile("AND(a)"),
            Err(CompileError::Arity { gate: "AND".into(), expected: 2, got: 1 })
        );
        assert_eq!(b.compile("INV(a) b"), Err(CompileError::MalformedCall("INV(a) b".into())));
        assert_eq!(b.compile("(a AND b"), Err(CompileError::Unbalanced("(a AND b".into())));
        assert_eq!(b.compile("nope"), Err(CompileError::UnknownSignal("nope".into())));
        assert_eq!(b.compile("  "), Err(CompileError::Empty));
    }

    #[test]
    fn primitive_call_forms() {
        let registry = Registry::new();
        let mut b = DefinitionBuilder::new("T", &names(&["a", "b"]), &names(&["y"]), &registry);
        let y = b.compile("NOT(AND(a, b))").unwrap();
        b.bind("y", y);
        let def = b.finish().unwrap();
        assert_eq!(kinds(&def), vec!["In", "In", "AND", "NOT", "Out"]);
    }

    #[test]
    fn missing_output() {
        let registry = Registry::new();
        let b = DefinitionBuilder::new("T", &names(&["a"]), &names(&["y"]), &registry);
        assert_eq!(b.finish().unwrap_err(), CompileError::OutputNotDefined("y".into()));
    }
}
