//! Error types for layout operations.
//!
//! [`LayoutError`] covers the three failure families the engine reports:
//! malformed dataset items, rejected configuration, and broken clustering
//! invariants. Numeric degeneracies (coincident points, empty viewports) are
//! never errors; they are resolved by substitution where they occur.

use thiserror::Error;
use wasm_bindgen::JsValue;

use crate::graph::{EdgeId, NodeId};

/// The main error type for layout operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LayoutError {
    // Dataset items
    #[error("item is missing its id")]
    MissingId,

    #[error("{0} already exists")]
    DuplicateNode(NodeId),

    #[error("{0} already exists")]
    DuplicateEdge(EdgeId),

    #[error("{0} is missing an endpoint")]
    MissingEndpoint(EdgeId),

    #[error("{id} has unknown shape {shape:?}")]
    InvalidShape { id: NodeId, shape: String },

    #[error("item {id} has an invalid {field}")]
    InvalidNumber { id: u32, field: &'static str },

    #[error("{0} does not exist")]
    UnknownNode(NodeId),

    #[error("{0} does not exist")]
    UnknownEdge(EdgeId),

    // Configuration
    #[error("invalid option {key}: {reason}")]
    InvalidOption { key: &'static str, reason: String },

    #[error(
        "hierarchical layout needs levels on every node or on none \
         ({assigned} assigned, {unassigned} unassigned)"
    )]
    MixedHierarchicalLevels { assigned: usize, unassigned: usize },

    #[error("could not read input: {0}")]
    Deserialize(String),

    // Clustering invariants
    #[error("{0} cannot absorb itself")]
    SelfMerge(NodeId),

    #[error("{0} is not a cluster")]
    NotClustered(NodeId),

    #[error("{child} is not contained in {parent}")]
    NotContained { parent: NodeId, child: NodeId },

    #[error("{edge} is attached to {node} but does not reference it")]
    EdgeOwnership { node: NodeId, edge: EdgeId },

    #[error("cannot release {child} from {parent}: {edge} is still folded into another child")]
    OutOfOrderExpand {
        parent: NodeId,
        child: NodeId,
        edge: EdgeId,
    },

    // Sectors
    #[error("the default sector cannot be collapsed")]
    DefaultSector,
}

impl From<LayoutError> for JsValue {
    fn from(error: LayoutError) -> Self {
        JsValue::from_str(&error.to_string())
    }
}
