//! # Evaluation Engine
//!
//! Values are pulled: asking for a node's value recursively asks its drivers.
//! Every node remembers the frame it was last evaluated in, so within one
//! frame each node computes at most once and a whole graph costs O(nodes).
//!
//! Feedback loops never recurse forever. A primitive stamps itself before
//! pulling its inputs, and a custom gate flags itself while it runs; a node
//! re-entered within the same pull answers with its previous value. Loops
//! therefore advance one step per frame and a bistable loop settles after a
//! couple of frames.
//!
//! ```rust
//! use gatescript::{compile, Evaluator, Registry};
//!
//! let mut registry = Registry::new();
//! let mut compiled = compile("In a @ 0, 0\nNOT n @ 100, 0\nOut y @ 200, 0\na -> n\nn -> y\n", &mut registry);
//! let y = compiled.graph.find("y").unwrap();
//! let mut evaluator = Evaluator::new();
//! assert!(evaluator.evaluate(&mut compiled.graph, y, None));
//!
//! let a = compiled.graph.find("a").unwrap();
//! compiled.graph.set_input(a, true).unwrap();
//! evaluator.advance();
//! assert!(!evaluator.evaluate(&mut compiled.graph, y, None));
//! ```

use crate::custom::CustomGate;
use crate::definition::{GateDefinition, Registry};
use crate::gates::Pin;
use crate::graph::{Graph, GraphError, NodeId, NodeKind};
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Largest gate [`truth_table`] will enumerate.
pub const MAX_TABLE_INPUTS: usize = 16;

/// Carries the current evaluation frame. Advancing the frame invalidates every
/// memoized value at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluator {
    frame: u64,
}

impl Default for Evaluator {
    fn default() -> Self {
        // Frame 0 is reserved for "never evaluated".
        Evaluator { frame: 1 }
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn advance(&mut self) -> u64 {
        self.frame += 1;
        self.frame
    }

    /// Value of `node` (at output `slot`, or its first output) in the current frame.
    pub fn evaluate(&self, graph: &mut Graph, node: NodeId, slot: Option<&str>) -> bool {
        pull(graph, node, slot, self.frame)
    }

    /// Advance one frame and evaluate every node once, in creation order.
    /// Returns the value of every `Out` pin.
    pub fn tick(&mut self, graph: &mut Graph) -> Vec<(NodeId, bool)> {
        self.advance();
        let mut outputs = Vec::new();
        for id in graph.node_ids() {
            let value = pull(graph, id, None, self.frame);
            if matches!(graph.node(id).map(|n| &n.kind), Some(NodeKind::Pin(Pin::Out))) {
                outputs.push((id, value));
            }
        }
        outputs
    }
}

/// Drivers of every input slot of `node`, in slot order.
fn drivers(graph: &Graph, node: NodeId) -> Vec<Option<(NodeId, String)>> {
    let Some(n) = graph.node(node) else {
        return Vec::new();
    };
    n.kind
        .input_slots()
        .iter()
        .map(|slot| {
            graph
                .driver(node, slot.key)
                .map(|(src, src_slot)| (src, src_slot.to_string()))
        })
        .collect()
}

fn pull_inputs(graph: &mut Graph, node: NodeId, frame: u64) -> Vec<bool> {
    drivers(graph, node)
        .into_iter()
        .map(|d| d.map_or(false, |(src, slot)| pull(graph, src, Some(&slot), frame)))
        .collect()
}

pub(crate) fn pull(graph: &mut Graph, id: NodeId, slot: Option<&str>, frame: u64) -> bool {
    let Some(node) = graph.node_mut(id) else {
        return false;
    };
    match &mut node.kind {
        NodeKind::Pin(Pin::In) => node.value,
        NodeKind::Custom(gate) => {
            if gate.evaluating || node.last_frame == frame {
                return gate.cached(slot);
            }
            gate.evaluating = true;
            pull_custom(graph, id, slot, frame)
        }
        NodeKind::Primitive(_) | NodeKind::Pin(Pin::Out) => {
            if node.last_frame == frame {
                return node.value;
            }
            node.last_frame = frame;
            let inputs = pull_inputs(graph, id, frame);
            let Some(node) = graph.node_mut(id) else {
                return false;
            };
            let value = match &node.kind {
                NodeKind::Primitive(p) => p.apply(&inputs),
                _ => inputs.first().copied().unwrap_or(false),
            };
            node.value = value;
            value
        }
    }
}

fn pull_custom(graph: &mut Graph, id: NodeId, slot: Option<&str>, frame: u64) -> bool {
    let inputs = pull_inputs(graph, id, frame);
    let Some(node) = graph.node_mut(id) else {
        return false;
    };
    let NodeKind::Custom(gate) = &mut node.kind else {
        return false;
    };
    gate.run(&inputs, frame);
    gate.evaluating = false;
    let first = gate.cached(None);
    let value = gate.cached(slot);
    node.value = first;
    node.last_frame = frame;
    value
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("gate {name} has {inputs} inputs; truth tables stop at {max}")]
    TooManyInputs { name: String, inputs: usize, max: usize },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Every input combination of a gate with its outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TruthTable {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Rows in counting order; the first input is the most significant bit.
    pub rows: Vec<(Vec<bool>, Vec<bool>)>,
}

impl TruthTable {
    /// Outputs for one input combination.
    pub fn lookup(&self, inputs: &[bool]) -> Option<&[bool]> {
        self.rows
            .iter()
            .find(|(ins, _)| ins.as_slice() == inputs)
            .map(|(_, outs)| outs.as_slice())
    }
}

impl fmt::Display for TruthTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} | {}", self.inputs.join(" "), self.outputs.join(" "))?;
        let bit = |b: &bool| if *b { "1" } else { "0" };
        for (ins, outs) in &self.rows {
            let left: Vec<_> = ins.iter().map(bit).collect();
            let right: Vec<_> = outs.iter().map(bit).collect();
            writeln!(f, "{} | {}", left.join(" "), right.join(" "))?;
        }
        Ok(())
    }
}

/// Evaluate a gate on every input combination. Rows are computed in parallel,
/// each on its own fresh instance.
pub fn truth_table(definition: &Arc<GateDefinition>, registry: &Registry) -> Result<TruthTable, EvalError> {
    let template = CustomGate::instantiate(definition.clone(), registry)?;
    let width = template.input_slots().len();
    if width > MAX_TABLE_INPUTS {
        return Err(EvalError::TooManyInputs {
            name: definition.name.clone(),
            inputs: width,
            max: MAX_TABLE_INPUTS,
        });
    }
    let rows = (0..1u32 << width)
        .into_par_iter()
        .map(|row| {
            let inputs: Vec<bool> = (0..width)
                .map(|i| row & (1 << (width - 1 - i)) != 0)
                .collect();
            let mut gate = template.clone();
            gate.run(&inputs, 1);
            (inputs, gate.outputs().to_vec())
        })
        .collect();
    Ok(TruthTable {
        inputs: template.input_slots().iter().map(|s| s.label.clone()).collect(),
        outputs: template.output_slots().iter().map(|s| s.label.clone()).collect(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define::define;
    use crate::script::compile;

    const XOR: &str = "define XOR(a, b) -> (out):
  na=NOT a
  nb=NOT b
  t1=a AND nb
  t2=na AND b
  nt1=NOT t1
  nt2=NOT t2
  out=NOT(nt1 AND nt2)
end
";

    const OR: &str = "define OR(a, b) -> (out):
  na = NOT a
  nb = NOT b
  t = na AND nb
  out = NOT t
end
";

    fn table(blocks: &[&str], gate: &str) -> TruthTable {
        let mut registry = Registry::new();
        for block in blocks {
            define(block, &mut registry).unwrap();
        }
        truth_table(registry.get(gate).unwrap(), &registry).unwrap()
    }

    #[test]
    fn xor_truth_table() {
        let t = table(&[XOR], "XOR");
        assert_eq!(t.lookup(&[false, false]), Some(&[false][..]));
        assert_eq!(t.lookup(&[true, false]), Some(&[true][..]));
        assert_eq!(t.lookup(&[false, true]), Some(&[true][..]));
        assert_eq!(t.lookup(&[true, true]), Some(&[false][..]));
    }

    #[test]
    fn or_truth_table() {
        let t = table(&[OR], "OR");
        assert_eq!(t.lookup(&[false, false]), Some(&[false][..]));
        assert_eq!(t.lookup(&[true, false]), Some(&[true][..]));
        assert_eq!(t.lookup(&[false, true]), Some(&[true][..]));
        assert_eq!(t.lookup(&[true, true]), Some(&[true][..]));
    }

    #[test]
    fn nested_gate_matches_primitive_composition() {
        // XNOR built from the XOR gate vs. spelled out in primitives
        let nested = "define XNOR(a, b) -> (out):\n  x = XOR(a, b)\n  out = NOT x\nend\n";
        let flat = "define XNOR2(a, b) -> (out):
  t1 = a AND NOT b
  t2 = b AND NOT a
  nt1 = NOT t1
  nt2 = NOT t2
  out = nt1 AND nt2
end
";
        let via_xor = table(&[XOR, nested], "XNOR");
        let direct = table(&[flat], "XNOR2");
        assert_eq!(via_xor.rows, direct.rows);
        assert_eq!(via_xor.lookup(&[true, true]), Some(&[true][..]));
        assert_eq!(via_xor.lookup(&[true, false]), Some(&[false][..]));
    }

    #[test]
    fn multi_output_half_adder() {
        let ha = "define HA(a, b) -> (sum, carry):\n  sum = XOR(a, b)\n  carry = a AND b\nend\n";
        let fa = "define FA(a, b, c) -> (sum, carry):
  h1 = HA(a, b)
  h2 = HA(h1.sum, c)
  sum = h2.sum
  carry = h1.carry OR h2.carry
end
";
        let t = table(&[XOR, ha, fa], "FA");
        assert_eq!(t.inputs, vec!["a", "b", "c"]);
        assert_eq!(t.outputs, vec!["sum", "carry"]);
        for row in 0..8u32 {
            let bits: Vec<bool> = (0..3).map(|i| row & (1 << (2 - i)) != 0).collect();
            let ones = bits.iter().filter(|b| **b).count();
            assert_eq!(t.lookup(&bits), Some(&[ones % 2 == 1, ones >= 2][..]), "row {row}");
        }
    }

    #[test]
    fn table_renders() {
        let t = table(&[OR], "OR");
        assert_eq!(t.to_string(), "a b | out\n0 0 | 0\n0 1 | 1\n1 0 | 1\n1 1 | 1\n");
    }

    #[test]
    fn frame_memoizes_until_advanced() {
        let mut registry = Registry::new();
        let mut c = compile("In a @ 0, 0\nOut y @ 100, 0\na -> y\n", &mut registry);
        let (a, y) = (c.graph.find("a").unwrap(), c.graph.find("y").unwrap());
        let mut ev = Evaluator::new();
        assert!(!ev.evaluate(&mut c.graph, y, None));
        c.graph.set_input(a, true).unwrap();
        // same frame: memoized
        assert!(!ev.evaluate(&mut c.graph, y, None));
        ev.advance();
        assert!(ev.evaluate(&mut c.graph, y, None));
    }

    #[test]
    fn undriven_inputs_read_low() {
        let mut registry = Registry::new();
        let mut c = compile("AND g @ 0, 0\nNOT n @ 0, 60\n", &mut registry);
        let ev = Evaluator::new();
        let g = c.graph.find("g").unwrap();
        let n = c.graph.find("n").unwrap();
        assert!(!ev.evaluate(&mut c.graph, g, None));
        assert!(ev.evaluate(&mut c.graph, n, None));
    }

    #[test]
    fn not_self_loop_terminates() {
        let mut registry = Registry::new();
        let mut c = compile("NOT n @ 0, 0\nn -> n\n", &mut registry);
        let n = c.graph.find("n").unwrap();
        let mut ev = Evaluator::new();
        // one inversion per frame: a lone NOT in a loop oscillates
        let seen: Vec<bool> = (0..4)
            .map(|_| {
                ev.advance();
                ev.evaluate(&mut c.graph, n, None)
            })
            .collect();
        assert_eq!(seen, vec![true, false, true, false]);
    }

    #[test]
    fn cross_coupled_inverters_settle() {
        let mut registry = Registry::new();
        let mut c = compile(
            "NOT p @ 0, 0\nNOT q @ 100, 0\np -> q\nq -> p\n",
            &mut registry,
        );
        let (p, q) = (c.graph.find("p").unwrap(), c.graph.find("q").unwrap());
        let mut ev = Evaluator::new();
        let mut last = None;
        for _ in 0..3 {
            ev.tick(&mut c.graph);
            let now = (
                ev.evaluate(&mut c.graph, p, None),
                ev.evaluate(&mut c.graph, q, None),
            );
            assert_ne!(now.0, now.1);
            if let Some(prev) = last {
                assert_eq!(prev, now);
            }
            last = Some(now);
        }
    }

    #[test]
    fn nand_latch_sets_and_resets() {
        let mut registry = Registry::new();
        let script = "In s @ 0, 0
In r @ 0, 100
AND a1 @ 100, 0
NOT q @ 200, 0
AND a2 @ 100, 100
NOT qn @ 200, 100
Out led @ 300, 0
s -> a1.in0
qn -> a1.in1
a1 -> q
r -> a2.in0
q -> a2.in1
a2 -> qn
q -> led
";
        let mut c = compile(script, &mut registry);
        assert!(c.diagnostics.is_empty(), "{:?}", c.diagnostics);
        let (s, r, led) = (
            c.graph.find("s").unwrap(),
            c.graph.find("r").unwrap(),
            c.graph.find("led").unwrap(),
        );
        let mut ev = Evaluator::new();
        let mut settle = |graph: &mut Graph, s_n: bool, r_n: bool| {
            graph.set_input(s, s_n).unwrap();
            graph.set_input(r, r_n).unwrap();
            let mut out = false;
            for _ in 0..3 {
                ev.advance();
                out = ev.evaluate(graph, led, None);
            }
            out
        };
        // active-low set, then hold, then reset, then hold
        assert!(settle(&mut c.graph, false, true));
        assert!(settle(&mut c.graph, true, true));
        assert!(!settle(&mut c.graph, true, false));
        assert!(!settle(&mut c.graph, true, true));
    }

    #[test]
    fn feedback_through_custom_gate_terminates() {
        let mut registry = Registry::new();
        let script = "define INV(a) -> (y):\n  y = NOT a\nend\nINV g @ 0, 0\ng -> g\n";
        let mut c = compile(script, &mut registry);
        assert!(c.diagnostics.is_empty(), "{:?}", c.diagnostics);
        let g = c.graph.find("g").unwrap();
        let mut ev = Evaluator::new();
        let first = ev.evaluate(&mut c.graph, g, None);
        ev.advance();
        let second = ev.evaluate(&mut c.graph, g, Some("y"));
        assert_ne!(first, second);
    }

    #[test]
    fn custom_gate_slot_fan_out_is_memoized() {
        let mut registry = Registry::new();
        let script = "define HA(a, b) -> (sum, carry):
  sum = (a AND NOT b) OR (b AND NOT a)
  carry = a AND b
end
In a @ 0, 0
In b @ 0, 60
HA h @ 100, 30
Out s @ 200, 0
Out c @ 200, 60
a -> h.a
b -> h.b
h.sum -> s
h.carry -> c
";
        let mut c = compile(script, &mut registry);
        assert!(c.diagnostics.is_empty(), "{:?}", c.diagnostics);
        let a = c.graph.find("a").unwrap();
        let b = c.graph.find("b").unwrap();
        c.graph.set_input(a, true).unwrap();
        c.graph.set_input(b, true).unwrap();
        let mut ev = Evaluator::new();
        let outs = ev.tick(&mut c.graph);
        let values: Vec<bool> = outs.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![false, true]);
        let h = c.graph.find("h").unwrap();
        assert_eq!(c.graph.node(h).unwrap().last_frame, ev.frame());
    }

    #[test]
    fn too_wide_for_a_table() {
        let names: Vec<String> = (0..17).map(|i| format!("i{i}")).collect();
        let block = format!("define WIDE({}) -> (y):\n  y = i0\nend\n", names.join(", "));
        let mut registry = Registry::new();
        define(&block, &mut registry).unwrap();
        let err = truth_table(registry.get("WIDE").unwrap(), &registry).unwrap_err();
        assert_eq!(
            err,
            EvalError::TooManyInputs { name: "WIDE".into(), inputs: 17, max: 16 }
        );
    }
}
