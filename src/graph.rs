//! # Graph Model: nodes, slots and connections
//!
//! Nodes live in an arena indexed by [`NodeId`]; connections live in a second
//! arena indexed by [`EdgeId`]. A node keeps the ids of every connection it
//! takes part in, on either end, so evaluation can pull from the output side.
//!
//! Invariant: an input slot is driven by at most one connection. An output
//! slot may fan out to any number of connections.

use crate::custom::CustomGate;
use crate::gates::{Pin, Primitive};
use std::collections::BTreeSet;
use thiserror::Error;

/// Index of a node in its graph's arena. Stable until the node is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// Index of a connection in its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub(crate) usize);

/// Directed edge `(output_node, output_slot) -> (input_node, input_slot)`.
///
/// Slot names are always stored as canonical keys (`in0`, `out`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    pub output_node: NodeId,
    pub output_slot: String,
    pub input_node: NodeId,
    pub input_slot: String,
}

/// A slot as seen from outside: the canonical `key` connections use and the
/// `label` a definition gave it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotName<'a> {
    pub key: &'a str,
    pub label: &'a str,
}

impl<'a> SlotName<'a> {
    fn plain(key: &'a str) -> Self {
        SlotName { key, label: key }
    }

    fn matches(&self, candidate: &str) -> bool {
        self.key == candidate || self.label == candidate
    }
}

/// What a node is.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Primitive(Primitive),
    Pin(Pin),
    Custom(Box<CustomGate>),
}

impl NodeKind {
    /// The type name used in scripts.
    pub fn type_name(&self) -> &str {
        match self {
            NodeKind::Primitive(p) => p.name(),
            NodeKind::Pin(p) => p.name(),
            NodeKind::Custom(gate) => gate.name(),
        }
    }

    pub fn input_slots(&self) -> Vec<SlotName<'_>> {
        match self {
            NodeKind::Primitive(p) => p.input_slots().iter().map(|s| SlotName::plain(s)).collect(),
            NodeKind::Pin(p) => p.input_slots().iter().map(|s| SlotName::plain(s)).collect(),
            NodeKind::Custom(gate) => gate.input_slots().iter().map(|s| s.name()).collect(),
        }
    }

    pub fn output_slots(&self) -> Vec<SlotName<'_>> {
        match self {
            NodeKind::Primitive(p) => p.output_slots().iter().map(|s| SlotName::plain(s)).collect(),
            NodeKind::Pin(p) => p.output_slots().iter().map(|s| SlotName::plain(s)).collect(),
            NodeKind::Custom(gate) => gate.output_slots().iter().map(|s| s.name()).collect(),
        }
    }

    /// Canonical key of the input slot named `candidate` (key or label).
    pub fn resolve_input(&self, candidate: &str) -> Option<&str> {
        self.input_slots()
            .into_iter()
            .find(|s| s.matches(candidate))
            .map(|s| s.key)
    }

    /// Canonical key of the output slot named `candidate` (key or label).
    pub fn resolve_output(&self, candidate: &str) -> Option<&str> {
        self.output_slots()
            .into_iter()
            .find(|s| s.matches(candidate))
            .map(|s| s.key)
    }
}

/// A live node.
#[derive(Debug, Clone)]
pub struct Node {
    /// User-visible id; empty until the serializer assigns one.
    pub id: String,
    pub kind: NodeKind,
    /// Cosmetic only.
    pub position: (i32, i32),
    /// Only meaningful for `In` pins.
    pub momentary: bool,
    pub value: bool,
    pub last_frame: u64,
    edges: Vec<EdgeId>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind, position: (i32, i32)) -> Self {
        Node {
            id: id.into(),
            kind,
            position,
            momentary: false,
            value: false,
            last_frame: 0,
            edges: Vec::new(),
        }
    }

    /// Ids of every connection this node is an endpoint of.
    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    fn label(&self) -> String {
        if self.id.is_empty() {
            self.kind.type_name().to_string()
        } else {
            self.id.clone()
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Unknown type {0}")]
    UnknownType(String),
    #[error("Duplicate node id {0}")]
    DuplicateId(String),
    #[error("Unknown node {0}")]
    UnknownNode(String),
    #[error("Unknown slot {node}.{slot}")]
    UnknownSlot { node: String, slot: String },
    #[error("Input {node}.{slot} is already driven")]
    InputAlreadyDriven { node: String, slot: String },
    #[error("Node {0} is not an input pin")]
    NotAnInput(String),
    #[error("Gate {0} contains itself")]
    RecursiveDefinition(String),
}

/// Structural summary of a graph: node types, ids and slots plus the edge set,
/// position ignored. Two graphs with equal shapes are interchangeable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphShape {
    pub nodes: Vec<NodeShape>,
    pub edges: BTreeSet<(String, String, String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeShape {
    pub kind: String,
    pub id: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Option<Node>>,
    edges: Vec<Option<Connection>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) -> Result<NodeId, GraphError> {
        if !node.id.is_empty() && self.find(&node.id).is_some() {
            return Err(GraphError::DuplicateId(node.id));
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(Node {
            edges: Vec::new(),
            ..node
        }));
        Ok(id)
    }

    /// Remove a node together with every connection touching it.
    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        let mut node = self.nodes.get_mut(id.0)?.take()?;
        for edge in std::mem::take(&mut node.edges) {
            if let Some(conn) = self.edges.get_mut(edge.0).and_then(Option::take) {
                let other = if conn.output_node == id {
                    conn.input_node
                } else {
                    conn.output_node
                };
                if let Some(n) = self.node_mut(other) {
                    n.edges.retain(|e| *e != edge);
                }
            }
        }
        Some(node)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Look a node up by its user-visible id.
    pub fn find(&self, id: &str) -> Option<NodeId> {
        self.nodes()
            .find(|(_, node)| node.id == id)
            .map(|(node_id, _)| node_id)
    }

    /// Live nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(idx, n)| n.as_ref().map(|n| (NodeId(idx), n)))
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes().map(|(id, _)| id).collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    pub fn connection_count(&self) -> usize {
        self.edges.iter().flatten().count()
    }

    pub fn connection(&self, id: EdgeId) -> Option<&Connection> {
        self.edges.get(id.0).and_then(Option::as_ref)
    }

    /// Every connection once, ordered by output node then by creation.
    pub fn connections(&self) -> impl Iterator<Item = (EdgeId, &Connection)> {
        self.nodes().flat_map(move |(node_id, node)| {
            node.edges.iter().filter_map(move |edge| {
                self.connection(*edge)
                    .filter(|conn| conn.output_node == node_id)
                    .map(|conn| (*edge, conn))
            })
        })
    }

    /// Connect `output.output_slot -> input.input_slot`. Slot names may be
    /// canonical keys or definition labels; the canonical key is recorded.
    pub fn connect(
        &mut self,
        output: NodeId,
        output_slot: &str,
        input: NodeId,
        input_slot: &str,
    ) -> Result<EdgeId, GraphError> {
        let out_node = self
            .node(output)
            .ok_or_else(|| GraphError::UnknownNode(format!("#{}", output.0)))?;
        let output_key = out_node
            .kind
            .resolve_output(output_slot)
            .ok_or_else(|| GraphError::UnknownSlot {
                node: out_node.label(),
                slot: output_slot.to_string(),
            })?
            .to_string();
        let in_node = self
            .node(input)
            .ok_or_else(|| GraphError::UnknownNode(format!("#{}", input.0)))?;
        let input_key = in_node
            .kind
            .resolve_input(input_slot)
            .ok_or_else(|| GraphError::UnknownSlot {
                node: in_node.label(),
                slot: input_slot.to_string(),
            })?
            .to_string();
        if self.driver(input, &input_key).is_some() {
            return Err(GraphError::InputAlreadyDriven {
                node: in_node.label(),
                slot: input_key,
            });
        }

        let edge = EdgeId(self.edges.len());
        self.edges.push(Some(Connection {
            output_node: output,
            output_slot: output_key,
            input_node: input,
            input_slot: input_key,
        }));
        if let Some(n) = self.node_mut(output) {
            n.edges.push(edge);
        }
        if input != output {
            if let Some(n) = self.node_mut(input) {
                n.edges.push(edge);
            }
        }
        Ok(edge)
    }

    pub fn disconnect(&mut self, edge: EdgeId) -> Option<Connection> {
        let conn = self.edges.get_mut(edge.0)?.take()?;
        for endpoint in [conn.output_node, conn.input_node] {
            if let Some(n) = self.node_mut(endpoint) {
                n.edges.retain(|e| *e != edge);
            }
        }
        Some(conn)
    }

    /// The `(node, output_slot)` driving `node.input_slot`, if any.
    pub fn driver(&self, node: NodeId, input_slot: &str) -> Option<(NodeId, &str)> {
        self.node(node)?.edges.iter().find_map(|edge| {
            self.connection(*edge)
                .filter(|c| c.input_node == node && c.input_slot == input_slot)
                .map(|c| (c.output_node, c.output_slot.as_str()))
        })
    }

    /// Set the held value of an `In` pin.
    pub fn set_input(&mut self, id: NodeId, value: bool) -> Result<(), GraphError> {
        let node = self
            .node_mut(id)
            .ok_or_else(|| GraphError::UnknownNode(format!("#{}", id.0)))?;
        match node.kind {
            NodeKind::Pin(Pin::In) => {
                node.value = value;
                Ok(())
            }
            _ => Err(GraphError::NotAnInput(node.label())),
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
    }

    pub fn shape(&self) -> GraphShape {
        let nodes = self
            .nodes()
            .map(|(_, n)| NodeShape {
                kind: n.kind.type_name().to_string(),
                id: n.id.clone(),
                inputs: n.kind.input_slots().iter().map(|s| s.key.to_string()).collect(),
                outputs: n.kind.output_slots().iter().map(|s| s.key.to_string()).collect(),
            })
            .collect();
        let id_of = |id: NodeId| self.node(id).map(|n| n.id.clone()).unwrap_or_default();
        let edges = self
            .connections()
            .map(|(_, c)| {
                (
                    id_of(c.output_node),
                    c.output_slot.clone(),
                    id_of(c.input_node),
                    c.input_slot.clone(),
                )
            })
            .collect();
        GraphShape { nodes, edges }
    }
}
