//! # Serializer: live graph back to script text
//!
//! Output is the preserved `define` text verbatim, one declaration per node
//! in creation order, a blank line, then one connection per edge. Feeding the
//! text back through [`compile`](crate::script::compile) rebuilds the same
//! nodes and connections.

use crate::gates::Pin;
use crate::graph::{Graph, NodeId, NodeKind};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as FmtWrite;

/// Fresh `n{k}` ids for every node without one, avoiding every id in use.
fn missing_ids(graph: &Graph) -> HashMap<NodeId, String> {
    let taken: HashSet<&str> = graph.nodes().map(|(_, n)| n.id.as_str()).collect();
    let mut counter = 0usize;
    let mut fresh = HashMap::new();
    for (id, node) in graph.nodes() {
        if !node.id.is_empty() {
            continue;
        }
        let candidate = loop {
            let candidate = format!("n{counter}");
            counter += 1;
            if !taken.contains(candidate.as_str()) {
                break candidate;
            }
        };
        fresh.insert(id, candidate);
    }
    fresh
}

/// Give every unnamed node a collision-free id, in place.
pub fn assign_missing_ids(graph: &mut Graph) -> usize {
    let fresh = missing_ids(graph);
    let count = fresh.len();
    for (id, name) in fresh {
        if let Some(node) = graph.node_mut(id) {
            log::debug!("assigned id {name}");
            node.id = name;
        }
    }
    count
}

fn node_name<'a>(graph: &'a Graph, fresh: &'a HashMap<NodeId, String>, id: NodeId) -> &'a str {
    fresh
        .get(&id)
        .map(String::as_str)
        .or_else(|| graph.node(id).map(|n| n.id.as_str()))
        .unwrap_or_default()
}

pub fn serialize(graph: &Graph, definitions: &str) -> String {
    let fresh = missing_ids(graph);
    let name_of = |id: NodeId| node_name(graph, &fresh, id);

    let mut out = String::from(definitions);
    for (id, node) in graph.nodes() {
        let (x, y) = node.position;
        let _ = write!(out, "{} {} @ {}, {}", node.kind.type_name(), name_of(id), x, y);
        if node.momentary && matches!(node.kind, NodeKind::Pin(Pin::In)) {
            out.push_str(" momentary");
        }
        out.push('\n');
    }
    out.push('\n');
    for (_, conn) in graph.connections() {
        let _ = writeln!(
            out,
            "{}.{} -> {}.{}",
            name_of(conn.output_node),
            conn.output_slot,
            name_of(conn.input_node),
            conn.input_slot
        );
    }
    out
}
