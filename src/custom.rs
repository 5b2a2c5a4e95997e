//! # CustomGate: a definition expanded into a private subgraph
//!
//! Every instance owns its own copy of the definition's internal nodes and
//! connections; nothing is shared between two instances of the same gate.
//! External slots are the definition's exported boundary pins, so a gate
//! defined with two inputs always has exactly two input slots.

use crate::definition::{GateDefinition, Registry};
use crate::eval;
use crate::gates::{self, Pin, Primitive};
use crate::graph::{Graph, GraphError, Node, NodeId, NodeKind, SlotName};
use std::collections::HashMap;
use std::sync::Arc;

/// External slot of a custom gate: positional `key` plus the pin name the
/// definition declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub key: String,
    pub label: String,
}

impl Slot {
    pub fn name(&self) -> SlotName<'_> {
        SlotName {
            key: &self.key,
            label: &self.label,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CustomGate {
    definition: Arc<GateDefinition>,
    inner: Graph,
    inputs: Vec<NodeId>,
    outputs: Vec<NodeId>,
    input_slots: Vec<Slot>,
    output_slots: Vec<Slot>,
    cache: Vec<bool>,
    pub(crate) evaluating: bool,
}

impl CustomGate {
    /// Expand `definition`, recursively expanding nested custom gates from
    /// `registry`.
    pub fn instantiate(definition: Arc<GateDefinition>, registry: &Registry) -> Result<Self, GraphError> {
        let mut stack = Vec::new();
        Self::expand(definition, registry, &mut stack)
    }

    fn expand(
        definition: Arc<GateDefinition>,
        registry: &Registry,
        stack: &mut Vec<String>,
    ) -> Result<Self, GraphError> {
        if stack.contains(&definition.name) {
            return Err(GraphError::RecursiveDefinition(definition.name.clone()));
        }
        stack.push(definition.name.clone());

        let mut inner = Graph::new();
        let mut ids: HashMap<u32, NodeId> = HashMap::new();
        for node_def in &definition.nodes {
            let kind = if let Some(p) = Primitive::from_name(&node_def.kind) {
                NodeKind::Primitive(p)
            } else if let Some(p) = Pin::from_name(&node_def.kind) {
                NodeKind::Pin(p)
            } else if let Some(nested) = registry.get(&node_def.kind) {
                NodeKind::Custom(Box::new(Self::expand(nested.clone(), registry, stack)?))
            } else {
                log::warn!(
                    "gate {}: skipping internal node {} of unknown type {}",
                    definition.name,
                    node_def.id,
                    node_def.kind
                );
                continue;
            };
            let node = Node::new(node_def.id.to_string(), kind, node_def.position);
            ids.insert(node_def.id, inner.add_node(node)?);
        }

        for conn in &definition.connections {
            let (Some(out), Some(inp)) = (ids.get(&conn.output_node), ids.get(&conn.input_node)) else {
                log::warn!(
                    "gate {}: skipping connection {} -> {}",
                    definition.name,
                    conn.output_node,
                    conn.input_node
                );
                continue;
            };
            if let Err(e) = inner.connect(*out, &conn.output_slot, *inp, &conn.input_slot) {
                log::warn!("gate {}: {e}", definition.name);
            }
        }

        let inputs: Vec<NodeId> = definition
            .input_pins
            .iter()
            .filter_map(|id| ids.get(id).copied())
            .collect();
        let outputs: Vec<NodeId> = definition
            .output_pins
            .iter()
            .filter_map(|id| ids.get(id).copied())
            .collect();
        let input_slots = external_slots("in", inputs.len(), &definition.inputs);
        let output_slots = external_slots("out", outputs.len(), &definition.outputs);

        stack.pop();
        Ok(CustomGate {
            cache: vec![false; outputs.len()],
            definition,
            inner,
            inputs,
            outputs,
            input_slots,
            output_slots,
            evaluating: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &Arc<GateDefinition> {
        &self.definition
    }

    pub fn input_slots(&self) -> &[Slot] {
        &self.input_slots
    }

    pub fn output_slots(&self) -> &[Slot] {
        &self.output_slots
    }

    /// The private internal graph.
    pub fn inner(&self) -> &Graph {
        &self.inner
    }

    /// Output values from the most recent evaluation, in slot order.
    pub fn outputs(&self) -> &[bool] {
        &self.cache
    }

    fn output_index(&self, slot: &str) -> Option<usize> {
        self.output_slots
            .iter()
            .position(|s| s.key == slot || s.label == slot)
    }

    /// Cached value of `slot`, or of the first output when no slot is given.
    pub(crate) fn cached(&self, slot: Option<&str>) -> bool {
        let idx = match slot {
            None => Some(0),
            Some(s) => self.output_index(s),
        };
        idx.and_then(|i| self.cache.get(i).copied()).unwrap_or(false)
    }

    /// Drive the internal input pins with `inputs` and pull every internal
    /// output pin once within `frame`.
    pub(crate) fn run(&mut self, inputs: &[bool], frame: u64) {
        for (idx, pin) in self.inputs.iter().enumerate() {
            if let Some(node) = self.inner.node_mut(*pin) {
                node.value = inputs.get(idx).copied().unwrap_or(false);
            }
        }
        // Internal stamps are reset so the pull below reaches through the whole subgraph.
        for id in self.inner.node_ids() {
            if let Some(node) = self.inner.node_mut(id) {
                node.last_frame = 0;
            }
        }
        for (idx, pin) in self.outputs.iter().enumerate() {
            self.cache[idx] = eval::pull(&mut self.inner, *pin, None, frame);
        }
    }
}

fn external_slots(prefix: &str, count: usize, names: &[String]) -> Vec<Slot> {
    (0..count)
        .map(|i| {
            let key = gates::slot_key(prefix, i, count);
            let label = names
                .get(i)
                .filter(|n| !n.is_empty())
                .cloned()
                .unwrap_or_else(|| key.clone());
            Slot { key, label }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define::define;

    fn registry(script: &str) -> Registry {
        let mut registry = Registry::new();
        define(script, &mut registry).unwrap();
        registry
    }

    #[test]
    fn slots_follow_pin_names() {
        let registry = registry(
            "define HA(a, b) -> (sum, carry):\n  sum = (a AND NOT b) OR (b AND NOT a)\n  carry = a AND b\nend\n",
        );
        let gate = CustomGate::instantiate(registry.get("HA").unwrap().clone(), &registry).unwrap();
        let keys: Vec<_> = gate.input_slots().iter().map(|s| (s.key.as_str(), s.label.as_str())).collect();
        assert_eq!(keys, vec![("in0", "a"), ("in1", "b")]);
        let outs: Vec<_> = gate.output_slots().iter().map(|s| (s.key.as_str(), s.label.as_str())).collect();
        assert_eq!(outs, vec![("out0", "sum"), ("out1", "carry")]);
    }

    #[test]
    fn constant_pin_is_not_an_external_slot() {
        let registry = registry("define ONE(a) -> (y):\n  y = a AND 1\nend\n");
        let gate = CustomGate::instantiate(registry.get("ONE").unwrap().clone(), &registry).unwrap();
        assert_eq!(gate.input_slots().len(), 1);
        assert_eq!(gate.input_slots()[0].key, "in");
        // a, const low, NOT, AND, out pin
        assert_eq!(gate.inner().node_count(), 5);
    }

    #[test]
    fn instances_do_not_share_state() {
        let registry = registry("define BUF(a) -> (y):\n  y = NOT NOT a\nend\n");
        let def = registry.get("BUF").unwrap().clone();
        let mut first = CustomGate::instantiate(def.clone(), &registry).unwrap();
        let second = CustomGate::instantiate(def, &registry).unwrap();
        first.run(&[true], 1);
        assert_eq!(first.outputs(), &[true]);
        assert_eq!(second.outputs(), &[false]);
    }

    #[test]
    fn recursive_definition_is_reported() {
        let mut registry = registry("define Y(a) -> (y):\n  y = NOT a\nend\n");
        define("define X(a) -> (y):\n  y = Y(a)\nend\n", &mut registry).unwrap();
        // X's body under the name Y, so Y now calls itself
        let mut y = (**registry.get("X").unwrap()).clone();
        y.name = "Y".into();
        registry.register(y);
        let err = CustomGate::instantiate(registry.get("X").unwrap().clone(), &registry).unwrap_err();
        assert_eq!(err, GraphError::RecursiveDefinition("Y".into()));

        // a block cannot name itself, so the old X is not reachable this way
        let err = define("define X(a) -> (y):\n  y = X(a)\nend\n", &mut registry).unwrap_err();
        assert_eq!(err.to_string(), "Unknown gate type: X");
    }

    #[test]
    fn cached_defaults() {
        let registry = registry("define ID(a) -> (y):\n  y = a\nend\n");
        let mut gate = CustomGate::instantiate(registry.get("ID").unwrap().clone(), &registry).unwrap();
        gate.run(&[true], 1);
        assert!(gate.cached(None));
        assert!(gate.cached(Some("y")));
        assert!(gate.cached(Some("out")));
        assert!(!gate.cached(Some("nope")));
    }
}
