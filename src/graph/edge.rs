//! Edge type and related structures.
//!
//! Edges connect two nodes by id. Each edge has:
//! - A stable unique identifier supplied by the dataset
//! - Current endpoint ids, resolved against the active graph store
//! - Origin stacks recording every endpoint it was rerouted away from
//! - Rendering attributes the engine carries but never interprets

use std::fmt;

use super::node::NodeId;

/// Stable edge identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub u32);

impl EdgeId {
    /// Create a new EdgeId from a raw u32.
    #[inline]
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw u32 value.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Edge({})", self.0)
    }
}

impl From<u32> for EdgeId {
    #[inline]
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<EdgeId> for u32 {
    #[inline]
    fn from(id: EdgeId) -> Self {
        id.0
    }
}

/// Rendering attributes. Clustering must leave these untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeAttributes {
    pub width: f64,
    pub label: Option<String>,
    pub dashes: bool,
    pub arrows: Option<String>,
    pub color: Option<String>,
}

/// A network edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: EdgeId,
    pub from_id: NodeId,
    pub to_id: NodeId,
    /// Endpoints `from_id` pointed at before each reroute, oldest first.
    pub original_from_id: Vec<NodeId>,
    /// Endpoints `to_id` pointed at before each reroute, oldest first.
    pub original_to_id: Vec<NodeId>,
    /// Rest length override for the spring.
    pub length: Option<f64>,
    pub attributes: EdgeAttributes,
}

impl Edge {
    pub fn new(id: EdgeId, from_id: NodeId, to_id: NodeId) -> Self {
        Self {
            id,
            from_id,
            to_id,
            original_from_id: Vec::new(),
            original_to_id: Vec::new(),
            length: None,
            attributes: EdgeAttributes {
                width: 1.0,
                ..EdgeAttributes::default()
            },
        }
    }

    #[inline]
    pub fn is_self_loop(&self) -> bool {
        self.from_id == self.to_id
    }

    #[inline]
    pub fn touches(&self, id: NodeId) -> bool {
        self.from_id == id || self.to_id == id
    }

    /// True when the edge joins exactly `a` and `b`, in either direction.
    #[inline]
    pub fn joins(&self, a: NodeId, b: NodeId) -> bool {
        (self.from_id == a && self.to_id == b) || (self.from_id == b && self.to_id == a)
    }

    /// The endpoint opposite `id`, or `None` if the edge does not touch it.
    pub fn other_end(&self, id: NodeId) -> Option<NodeId> {
        if self.from_id == id {
            Some(self.to_id)
        } else if self.to_id == id {
            Some(self.from_id)
        } else {
            None
        }
    }

    /// Rewrite the endpoint equal to `child` to `parent`, remembering `child`.
    ///
    /// Returns false when the edge does not touch `child`.
    pub fn reroute(&mut self, child: NodeId, parent: NodeId) -> bool {
        if self.to_id == child {
            self.original_to_id.push(child);
            self.to_id = parent;
            true
        } else if self.from_id == child {
            self.original_from_id.push(child);
            self.from_id = parent;
            true
        } else {
            false
        }
    }

    /// Undo the most recent reroute that moved `child` away.
    ///
    /// Returns false when neither origin stack has `child` on top.
    pub fn restore(&mut self, child: NodeId) -> bool {
        if self.original_from_id.last() == Some(&child) {
            self.original_from_id.pop();
            self.from_id = child;
            true
        } else if self.original_to_id.last() == Some(&child) {
            self.original_to_id.pop();
            self.to_id = child;
            true
        } else {
            false
        }
    }

    /// Endpoints as the dataset defined them, before any reroute.
    pub fn original_endpoints(&self) -> (NodeId, NodeId) {
        (
            self.original_from_id.first().copied().unwrap_or(self.from_id),
            self.original_to_id.first().copied().unwrap_or(self.to_id),
        )
    }

    /// Every id this edge has pointed at, current endpoints included.
    pub fn all_endpoints(&self) -> impl Iterator<Item = NodeId> + '_ {
        [self.from_id, self.to_id]
            .into_iter()
            .chain(self.original_from_id.iter().copied())
            .chain(self.original_to_id.iter().copied())
    }
}
