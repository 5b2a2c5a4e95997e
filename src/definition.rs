//! # Gate definitions and the registry
//!
//! A [`GateDefinition`] is an immutable template: boundary pin names plus an
//! internal graph of [`NodeDefinition`]s wired by integer id. Live gates are
//! expanded from it by [`CustomGate::instantiate`](crate::custom::CustomGate::instantiate).
//!
//! The [`Registry`] maps gate names to definitions. It is an explicit value
//! passed through the compiler, so independent compilations do not interfere.

use crate::gates::{self, Pin};
use crate::graph::{Graph, NodeId, NodeKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as FmtWrite;
use std::sync::Arc;
use thiserror::Error;

/// Fingerprint of a definition (hex BLAKE3 of its canonical JSON).
pub type GateHash = String;

/// One internal node of a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Type name: `AND`, `NOT`, `In`, `Out` or a registered gate
    #[serde(rename = "type")]
    pub kind: String,
    pub id: u32,
    /// Cosmetic only
    pub position: (i32, i32),
}

/// One internal connection of a definition, by node id and slot key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDefinition {
    pub output_node: u32,
    pub output_slot: String,
    pub input_node: u32,
    pub input_slot: String,
}

/// A named, reusable circuit template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDefinition {
    pub name: String,
    /// External input pin names, in order
    pub inputs: Vec<String>,
    /// External output pin names, in order
    pub outputs: Vec<String>,
    pub nodes: Vec<NodeDefinition>,
    pub connections: Vec<ConnectionDefinition>,
    /// Ids of the `In` nodes exported as external inputs, in order
    pub input_pins: Vec<u32>,
    /// Ids of the `Out` nodes exported as external outputs, in order
    pub output_pins: Vec<u32>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Gate name must not be empty")]
    EmptyName,
    #[error("Gate name {0} is reserved")]
    ReservedName(String),
    #[error("Gate must have at least one In and one Out pin")]
    MissingPins,
    #[error("Gate {0} has a feedback loop and cannot be written as a define block")]
    Cyclic(String),
    #[error("Unknown gate type: {0}")]
    UnknownGate(String),
    #[error("Connection references unknown node {0}")]
    DanglingConnection(u32),
    #[error("Gate {gate} has {names} {side} names for {pins} {side} pins")]
    PinCountMismatch {
        gate: String,
        side: &'static str,
        names: usize,
        pins: usize,
    },
    #[error(transparent)]
    Define(#[from] crate::define::DefineError),
}

impl GateDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        GateDefinition {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            nodes: Vec::new(),
            connections: Vec::new(),
            input_pins: Vec::new(),
            output_pins: Vec::new(),
        }
    }

    pub fn node(&self, id: u32) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn fingerprint(&self) -> GateHash {
        // Field order of the derived Serialize impl is fixed, so the JSON is canonical.
        let canon = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(blake3::hash(&canon).as_bytes())
    }

    /// Check that every connection endpoint names a node of this definition.
    pub fn validate(&self) -> Result<(), CaptureError> {
        for (side, names, pins) in [
            ("input", self.inputs.len(), self.input_pins.len()),
            ("output", self.outputs.len(), self.output_pins.len()),
        ] {
            if names != pins {
                return Err(CaptureError::PinCountMismatch {
                    gate: self.name.clone(),
                    side,
                    names,
                    pins,
                });
            }
        }
        let ids: HashSet<u32> = self.nodes.iter().map(|n| n.id).collect();
        for conn in &self.connections {
            for end in [conn.output_node, conn.input_node] {
                if !ids.contains(&end) {
                    return Err(CaptureError::DanglingConnection(end));
                }
            }
        }
        for pin in self.input_pins.iter().chain(&self.output_pins) {
            if !ids.contains(pin) {
                return Err(CaptureError::DanglingConnection(*pin));
            }
        }
        Ok(())
    }

    /// Turn a live graph into a definition. `In` pins become inputs and `Out`
    /// pins become outputs, named by their node ids.
    pub fn capture(name: &str, graph: &Graph) -> Result<Self, CaptureError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CaptureError::EmptyName);
        }
        if gates::is_reserved(name) {
            return Err(CaptureError::ReservedName(name.to_string()));
        }
        let mut def = GateDefinition::new(name);
        let mut ids: HashMap<NodeId, u32> = HashMap::new();
        for (idx, (node_id, node)) in graph.nodes().enumerate() {
            let id = idx as u32;
            ids.insert(node_id, id);
            def.nodes.push(NodeDefinition {
                kind: node.kind.type_name().to_string(),
                id,
                position: node.position,
            });
            match node.kind {
                NodeKind::Pin(Pin::In) => {
                    let label = pin_label(&node.id, "in", def.input_pins.len());
                    def.inputs.push(label);
                    def.input_pins.push(id);
                }
                NodeKind::Pin(Pin::Out) => {
                    let label = pin_label(&node.id, "out", def.output_pins.len());
                    def.outputs.push(label);
                    def.output_pins.push(id);
                }
                _ => {}
            }
        }
        if def.input_pins.is_empty() || def.output_pins.is_empty() {
            return Err(CaptureError::MissingPins);
        }
        for (_, conn) in graph.connections() {
            if let (Some(out), Some(inp)) = (ids.get(&conn.output_node), ids.get(&conn.input_node)) {
                def.connections.push(ConnectionDefinition {
                    output_node: *out,
                    output_slot: conn.output_slot.clone(),
                    input_node: *inp,
                    input_slot: conn.input_slot.clone(),
                });
            }
        }
        Ok(def)
    }

    /// Render this definition as a `define ... end` block whose compilation
    /// behaves like the definition. Internal feedback cannot be expressed in
    /// assignment form and is reported as [`CaptureError::Cyclic`].
    pub fn to_block(&self, registry: &Registry) -> Result<String, CaptureError> {
        self.validate()?;
        let driver = |node: u32, slot: &str| {
            self.connections
                .iter()
                .find(|c| c.input_node == node && c.input_slot == slot)
        };

        // Temporaries must not shadow pin names.
        let taken: HashSet<&str> = self
            .inputs
            .iter()
            .chain(&self.outputs)
            .map(String::as_str)
            .collect();
        let temp = |id: u32| {
            let mut name = format!("t{id}");
            while taken.contains(name.as_str()) {
                name.insert(0, '_');
            }
            name
        };

        let mut bound: HashMap<u32, String> = HashMap::new();
        for (pin, name) in self.input_pins.iter().zip(&self.inputs) {
            bound.insert(*pin, name.clone());
        }
        let exported: HashSet<u32> = self.input_pins.iter().chain(&self.output_pins).copied().collect();
        let mut pending: Vec<&NodeDefinition> = Vec::new();
        for node in &self.nodes {
            match node.kind.as_str() {
                "In" if !exported.contains(&node.id) => {
                    bound.insert(node.id, "0".to_string());
                }
                "In" | "Out" => {}
                _ => pending.push(node),
            }
        }

        let reference = |bound: &HashMap<u32, String>, conn: Option<&ConnectionDefinition>| -> Option<String> {
            let Some(conn) = conn else {
                return Some("0".to_string());
            };
            let base = bound.get(&conn.output_node)?;
            let first_output = conn.output_slot == gates::OUT || conn.output_slot == "out0";
            if first_output {
                Some(base.clone())
            } else {
                Some(format!("{base}.{}", conn.output_slot))
            }
        };

        let mut body = String::new();
        while !pending.is_empty() {
            let before = pending.len();
            let mut rest = Vec::new();
            for node in pending {
                let line = match node.kind.as_str() {
                    "AND" => {
                        let a = reference(&bound, driver(node.id, "in0"));
                        let b = reference(&bound, driver(node.id, "in1"));
                        a.zip(b).map(|(a, b)| format!("{a} AND {b}"))
                    }
                    "NOT" => reference(&bound, driver(node.id, gates::IN)).map(|a| format!("NOT {a}")),
                    gate => {
                        let arity = registry
                            .get(gate)
                            .ok_or_else(|| CaptureError::UnknownGate(gate.to_string()))?
                            .input_pins
                            .len();
                        let args: Option<Vec<String>> = (0..arity)
                            .map(|i| reference(&bound, driver(node.id, &gates::slot_key("in", i, arity))))
                            .collect();
                        args.map(|args| format!("{gate}({})", args.join(", ")))
                    }
                };
                match line {
                    Some(expr) => {
                        let name = temp(node.id);
                        let _ = writeln!(body, "  {name} = {expr}");
                        bound.insert(node.id, name);
                    }
                    None => rest.push(node),
                }
            }
            if rest.len() == before {
                return Err(CaptureError::Cyclic(self.name.clone()));
            }
            pending = rest;
        }

        for (pin, name) in self.output_pins.iter().zip(&self.outputs) {
            let expr = reference(&bound, driver(*pin, gates::IN))
                .ok_or_else(|| CaptureError::Cyclic(self.name.clone()))?;
            let _ = writeln!(body, "  {name} = {expr}");
        }

        let mut block = String::new();
        let _ = writeln!(
            block,
            "define {}({}) -> ({}):",
            self.name,
            self.inputs.join(", "),
            self.outputs.join(", ")
        );
        block.push_str(&body);
        block.push_str("end\n");
        Ok(block)
    }
}

fn pin_label(id: &str, prefix: &str, index: usize) -> String {
    if id.is_empty() {
        format!("{prefix}{index}")
    } else {
        id.to_string()
    }
}

/// Outcome of [`Registry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added,
    Replaced,
    /// An identical definition was already registered under this name
    Unchanged,
}

/// Gate definitions by name. Definitions accumulate or are replaced; there
/// is no removal.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    gates: BTreeMap<String, Arc<GateDefinition>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: GateDefinition) -> Registration {
        let outcome = match self.gates.get(&definition.name) {
            None => Registration::Added,
            Some(prev) if prev.fingerprint() == definition.fingerprint() => {
                return Registration::Unchanged;
            }
            Some(_) => Registration::Replaced,
        };
        log::debug!("gate {} {:?}", definition.name, outcome);
        self.gates.insert(definition.name.clone(), Arc::new(definition));
        outcome
    }

    pub fn get(&self, name: &str) -> Option<&Arc<GateDefinition>> {
        self.gates.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.gates.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.gates.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}
