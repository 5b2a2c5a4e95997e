//! # Gates: primitives, boundary pins and the type factory
//!
//! Only two gates have hard-coded boolean semantics: `AND` and `NOT`.
//! Everything else is either a boundary pin (`In`, `Out`) or a custom gate
//! expanded from a [`GateDefinition`](crate::definition::GateDefinition).
//!
//! ```rust
//! use gatescript::gates::Primitive;
//!
//! assert!(Primitive::And.apply(&[true, true]));
//! assert!(!Primitive::Not.apply(&[true]));
//! ```

use crate::custom::CustomGate;
use crate::definition::Registry;
use crate::graph::{GraphError, NodeKind};

/// Names a `define` block may not take.
pub const RESERVED_NAMES: &[&str] = &["AND", "NOT", "In", "Out"];

/// Default output slot of every single-output node.
pub const OUT: &str = "out";
/// Default input slot of every single-input node.
pub const IN: &str = "in";

/// Gates with built-in boolean semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// Two-input conjunction
    And,
    /// Inverter
    Not,
}

impl Primitive {
    /// Parse primitive from its script type name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "AND" => Some(Primitive::And),
            "NOT" => Some(Primitive::Not),
            _ => None,
        }
    }

    /// Get canonical script type name.
    pub fn name(&self) -> &'static str {
        match self {
            Primitive::And => "AND",
            Primitive::Not => "NOT",
        }
    }

    pub fn input_slots(&self) -> &'static [&'static str] {
        match self {
            Primitive::And => &["in0", "in1"],
            Primitive::Not => &[IN],
        }
    }

    pub fn output_slots(&self) -> &'static [&'static str] {
        &[OUT]
    }

    /// Apply the boolean function. Missing inputs read as low.
    pub fn apply(&self, inputs: &[bool]) -> bool {
        let at = |i: usize| inputs.get(i).copied().unwrap_or(false);
        match self {
            Primitive::And => at(0) && at(1),
            Primitive::Not => !at(0),
        }
    }
}

/// Boundary pins marking a circuit's external inputs and outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pin {
    /// Externally driven switch; holds its own value
    In,
    /// Probe that mirrors its single driver
    Out,
}

impl Pin {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "In" => Some(Pin::In),
            "Out" => Some(Pin::Out),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Pin::In => "In",
            Pin::Out => "Out",
        }
    }

    pub fn input_slots(&self) -> &'static [&'static str] {
        match self {
            Pin::In => &[],
            Pin::Out => &[IN],
        }
    }

    pub fn output_slots(&self) -> &'static [&'static str] {
        match self {
            Pin::In => &[OUT],
            Pin::Out => &[],
        }
    }
}

pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

/// Positional slot key: bare `in`/`out` when the node has exactly one slot on
/// that side, `in0`, `in1`, ... otherwise.
pub fn slot_key(prefix: &str, index: usize, count: usize) -> String {
    if count == 1 {
        prefix.to_string()
    } else {
        format!("{prefix}{index}")
    }
}

/// Resolve a script type name: primitives first, then boundary pins, then the
/// custom-gate registry.
pub fn create_kind(type_name: &str, registry: &Registry) -> Result<NodeKind, GraphError> {
    if let Some(primitive) = Primitive::from_name(type_name) {
        return Ok(NodeKind::Primitive(primitive));
    }
    if let Some(pin) = Pin::from_name(type_name) {
        return Ok(NodeKind::Pin(pin));
    }
    let definition = registry
        .get(type_name)
        .ok_or_else(|| GraphError::UnknownType(type_name.to_string()))?;
    let gate = CustomGate::instantiate(definition.clone(), registry)?;
    Ok(NodeKind::Custom(Box::new(gate)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_truth() {
        assert!(!Primitive::And.apply(&[true, false]));
        assert!(Primitive::And.apply(&[true, true]));
        assert!(Primitive::Not.apply(&[false]));
        // undriven inputs default low
        assert!(!Primitive::And.apply(&[true]));
        assert!(Primitive::Not.apply(&[]));
    }

    #[test]
    fn slot_keys() {
        assert_eq!(slot_key("in", 0, 1), "in");
        assert_eq!(slot_key("in", 1, 2), "in1");
        assert_eq!(slot_key("out", 0, 3), "out0");
    }

    #[test]
    fn factory_order() {
        let registry = Registry::new();
        assert!(matches!(
            create_kind("AND", &registry),
            Ok(NodeKind::Primitive(Primitive::And))
        ));
        assert!(matches!(create_kind("Out", &registry), Ok(NodeKind::Pin(Pin::Out))));
        assert_eq!(
            create_kind("XOR", &registry).err(),
            Some(GraphError::UnknownType("XOR".into()))
        );
    }
}
