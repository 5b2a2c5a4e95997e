//! # gatescript
//!
//! **Logic circuits as text**
//!
//! A small scripting language for digital logic. Gates are defined from two
//! primitives, `AND` and `NOT`, using boolean expressions, then placed and
//! wired as nodes of a graph that is evaluated frame by frame. The graph can
//! be written back out as script text at any time.
//!
//! ## Quick Start
//!
//! ```rust
//! use gatescript::{compile, serialize, Evaluator, Registry};
//!
//! let script = "\
//! define XOR(a, b) -> (out):
//!   out = (a AND NOT b) OR (b AND NOT a)
//! end
//!
//! In a @ 0, 0
//! In b @ 0, 60
//! XOR x @ 150, 30
//! Out led @ 300, 30
//!
//! a -> x.a
//! b -> x.b
//! x -> led
//! ";
//!
//! let mut registry = Registry::new();
//! let mut compiled = compile(script, &mut registry);
//! assert!(compiled.diagnostics.is_empty());
//!
//! let (a, led) = (compiled.graph.find("a").unwrap(), compiled.graph.find("led").unwrap());
//! compiled.graph.set_input(a, true).unwrap();
//!
//! let mut evaluator = Evaluator::new();
//! evaluator.advance();
//! assert!(evaluator.evaluate(&mut compiled.graph, led, None));
//!
//! let text = serialize(&compiled.graph, &compiled.definitions);
//! assert!(text.contains("a.out -> x.in0"));
//! ```
//!
//! ## Key Concepts
//!
//! - **Registry**: named [`GateDefinition`]s, filled by `define` blocks
//! - **Graph**: live nodes and connections built from node and connection lines
//! - **CustomGate**: a private expansion of a definition inside one node
//! - **Evaluator**: pulls values through the graph, memoized per frame;
//!   feedback loops advance one step per frame instead of recursing

pub mod custom;
pub mod define;
pub mod definition;
pub mod eval;
pub mod expr;
pub mod gates;
pub mod graph;
pub mod script;
pub mod serialize;

pub use custom::CustomGate;
pub use define::{define, DefineError};
pub use definition::{CaptureError, ConnectionDefinition, GateDefinition, NodeDefinition, Registration, Registry};
pub use eval::{truth_table, EvalError, Evaluator, TruthTable};
pub use expr::CompileError;
pub use gates::{Pin, Primitive};
pub use graph::{Connection, EdgeId, Graph, GraphError, Node, NodeId, NodeKind};
pub use script::{compile, Compilation, Diagnostic, Document};
pub use serialize::serialize;
