use thiserror::Error;

use crate::types::{HierarchyEdge, HierarchyShape, NodeKind};

/// Input rejected at the upsert boundary, before anything reaches the graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{kind} node has an empty natural key")]
    EmptyKey { kind: NodeKind },

    #[error("{kind} {key}: {field} must not be negative (got {value})")]
    NegativeCount {
        kind: NodeKind,
        key: String,
        field: &'static str,
        value: i64,
    },

    #[error("{key}: {field} must be within [0, 1] (got {value})")]
    ConfidenceOutOfRange {
        key: String,
        field: &'static str,
        value: f64,
    },

    #[error("{kind} nodes are not part of the {shape} hierarchy")]
    NodeNotInShape {
        kind: NodeKind,
        shape: HierarchyShape,
    },

    #[error("{edge} edges are not part of the {shape} hierarchy")]
    EdgeNotInShape {
        edge: HierarchyEdge,
        shape: HierarchyShape,
    },

    #[error("{edge} must link {expected_parent} -> {expected_child}, got {parent} -> {child}")]
    EndpointKindMismatch {
        edge: HierarchyEdge,
        expected_parent: NodeKind,
        expected_child: NodeKind,
        parent: NodeKind,
        child: NodeKind,
    },

    #[error("Unknown {what}: {value}")]
    Unknown { what: &'static str, value: String },
}
