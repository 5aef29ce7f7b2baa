//! Graph data structures and the engine that drives them.
//!
//! Nodes and edges live in id-keyed [`GraphStore`]s, one per sector. Edges
//! refer to nodes by id and nodes list the ids of their attached edges, so
//! clustering can move either side without ownership cycles.
//! [`GraphEngine`] owns the stores, the force model, the coarsener and the
//! viewport, and exposes the operations the host calls.

mod data;
mod edge;
mod engine;
mod node;
mod store;

pub use data::{EdgeData, NodeData};
pub use edge::{Edge, EdgeAttributes, EdgeId};
pub use engine::{GraphEngine, NodeLayout};
pub use node::{Body, ClusterSession, DEFAULT_FONT_SIZE, DEFAULT_RADIUS, Node, NodeId, Shape};
pub use store::{GraphStore, Scope};
