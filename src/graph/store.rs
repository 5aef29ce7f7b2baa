//! GraphStore - the id-keyed arena behind one sector.
//!
//! Nodes and edges live in ordered maps so iteration order, and therefore
//! every seeded simulation, is reproducible. Edges refer to nodes by id only;
//! whether an edge is simulated is decided by looking both endpoints up.
//!
//! [`Scope`] widens a store with the frozen stores of enclosing sectors:
//! an edge that leaves a drilled-into sector stays owned by the sector it was
//! created in, yet clustering inside the child sector must still reroute it.

use std::collections::BTreeMap;

use super::edge::{Edge, EdgeId};
use super::node::{Node, NodeId};

/// Node and edge maps of one sector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphStore {
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<EdgeId, Edge>,
}

impl GraphStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Node Operations
    // =========================================================================

    /// Insert a node, returning the node it replaced.
    pub fn insert_node(&mut self, node: Node) -> Option<Node> {
        self.nodes.insert(node.id, node)
    }

    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        self.nodes.remove(&id)
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// True when the node is active here (not absorbed into a cluster).
    #[inline]
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Active node ids in ascending order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.values_mut()
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// Find a node whether it is active or absorbed at any depth.
    pub fn find_node(&self, id: NodeId) -> Option<&Node> {
        if let Some(node) = self.nodes.get(&id) {
            return Some(node);
        }
        self.nodes.values().find_map(|node| node.find_contained(id))
    }

    /// Mutable variant of [`GraphStore::find_node`].
    pub fn find_node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        if self.nodes.contains_key(&id) {
            return self.nodes.get_mut(&id);
        }
        self.nodes
            .values_mut()
            .find_map(|node| node.find_contained_mut(id))
    }

    /// Clusters enclosing `id`, outermost (active) first.
    ///
    /// An active node has an empty path; an unknown node has none.
    pub fn path_to(&self, id: NodeId) -> Option<Vec<NodeId>> {
        if self.nodes.contains_key(&id) {
            return Some(Vec::new());
        }
        self.nodes.values().find_map(|node| node.path_to(id))
    }

    /// Visit every node, active or absorbed.
    pub fn for_each_node_mut(&mut self, mut f: impl FnMut(&mut Node)) {
        for node in self.nodes.values_mut() {
            node.for_each_mut(&mut f);
        }
    }

    // =========================================================================
    // Edge Operations
    // =========================================================================

    pub fn insert_edge(&mut self, edge: Edge) -> Option<Edge> {
        self.edges.insert(edge.id, edge)
    }

    pub fn remove_edge(&mut self, id: EdgeId) -> Option<Edge> {
        self.edges.remove(&id)
    }

    #[inline]
    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    #[inline]
    pub fn edge_mut(&mut self, id: EdgeId) -> Option<&mut Edge> {
        self.edges.get_mut(&id)
    }

    #[inline]
    pub fn contains_edge(&self, id: EdgeId) -> bool {
        self.edges.contains_key(&id)
    }

    pub fn edge_ids(&self) -> Vec<EdgeId> {
        self.edges.keys().copied().collect()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// An edge is connected when both endpoints are active in this store.
    pub fn is_connected(&self, edge: &Edge) -> bool {
        self.nodes.contains_key(&edge.from_id) && self.nodes.contains_key(&edge.to_id)
    }

    /// Connected edges, the ones the force model simulates.
    pub fn connected_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values().filter(|edge| self.is_connected(edge))
    }

    /// Find an edge folded into some cluster's contained edges.
    pub fn find_contained_edge(&self, id: EdgeId) -> Option<&Edge> {
        self.nodes.values().find_map(|node| contained_edge(node, id))
    }

    /// Mutable variant of [`GraphStore::find_contained_edge`].
    pub fn find_contained_edge_mut(&mut self, id: EdgeId) -> Option<&mut Edge> {
        self.nodes
            .values_mut()
            .find_map(|node| contained_edge_mut(node, id))
    }

    /// Remove an edge folded into some cluster's contained edges.
    pub fn take_contained_edge(&mut self, id: EdgeId) -> Option<Edge> {
        self.nodes
            .values_mut()
            .find_map(|node| take_contained_edge(node, id))
    }

    // =========================================================================
    // Utilities
    // =========================================================================

    /// Move every node and edge of `other` into this store.
    pub fn merge(&mut self, other: GraphStore) {
        self.nodes.extend(other.nodes);
        self.edges.extend(other.edges);
    }

    /// Bounding box of the active nodes' extents: (min_x, min_y, max_x, max_y).
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let mut nodes = self.nodes.values();
        let first = nodes.next()?;
        let init = node_box(first);
        Some(nodes.fold(init, |(min_x, min_y, max_x, max_y), node| {
            let (a, b, c, d) = node_box(node);
            (min_x.min(a), min_y.min(b), max_x.max(c), max_y.max(d))
        }))
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
    }
}

fn node_box(node: &Node) -> (f64, f64, f64, f64) {
    let half_w = 0.5 * node.width;
    let half_h = 0.5 * node.height;
    (
        node.body.x - half_w,
        node.body.y - half_h,
        node.body.x + half_w,
        node.body.y + half_h,
    )
}

fn contained_edge(node: &Node, id: EdgeId) -> Option<&Edge> {
    node.contained_edges
        .values()
        .flat_map(|edges| edges.iter())
        .find(|edge| edge.id == id)
        .or_else(|| {
            node.contained_nodes
                .values()
                .find_map(|child| contained_edge(child, id))
        })
}

fn contained_edge_mut(node: &mut Node, id: EdgeId) -> Option<&mut Edge> {
    let Node {
        contained_edges,
        contained_nodes,
        ..
    } = node;
    if let Some(edge) = contained_edges
        .values_mut()
        .flat_map(|edges| edges.iter_mut())
        .find(|edge| edge.id == id)
    {
        return Some(edge);
    }
    contained_nodes
        .values_mut()
        .find_map(|child| contained_edge_mut(child, id))
}

fn take_contained_edge(node: &mut Node, id: EdgeId) -> Option<Edge> {
    for edges in node.contained_edges.values_mut() {
        if let Some(index) = edges.iter().position(|edge| edge.id == id) {
            return Some(edges.remove(index));
        }
    }
    node.contained_nodes
        .values_mut()
        .find_map(|child| take_contained_edge(child, id))
}

// =============================================================================
// Scope
// =============================================================================

/// The active store plus read/write access to frozen stores.
///
/// Node lookups that drive clustering only see the active store; edge lookups
/// fall through to frozen stores.
pub struct Scope<'a> {
    pub store: &'a mut GraphStore,
    frozen: Vec<&'a mut GraphStore>,
}

impl<'a> Scope<'a> {
    /// A scope over a single store.
    pub fn new(store: &'a mut GraphStore) -> Self {
        Self {
            store,
            frozen: Vec::new(),
        }
    }

    pub fn with_frozen(store: &'a mut GraphStore, frozen: Vec<&'a mut GraphStore>) -> Self {
        Self { store, frozen }
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        if let Some(edge) = self.store.edge(id) {
            return Some(edge);
        }
        self.frozen.iter().find_map(|store| store.edge(id))
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> Option<&mut Edge> {
        if self.store.contains_edge(id) {
            return self.store.edge_mut(id);
        }
        self.frozen.iter_mut().find_map(|store| store.edge_mut(id))
    }

    /// Remove a live edge from whichever store owns it.
    pub fn take_edge(&mut self, id: EdgeId) -> Option<Edge> {
        if let Some(edge) = self.store.remove_edge(id) {
            return Some(edge);
        }
        self.frozen.iter_mut().find_map(|store| store.remove_edge(id))
    }

    /// Remove an edge folded into a cluster, from whichever store holds it.
    pub fn take_contained_edge(&mut self, id: EdgeId) -> Option<Edge> {
        if let Some(edge) = self.store.take_contained_edge(id) {
            return Some(edge);
        }
        self.frozen
            .iter_mut()
            .find_map(|store| store.take_contained_edge(id))
    }

    /// Mutable lookup of an edge, live or folded into a cluster, in any
    /// store.
    pub fn any_edge_mut(&mut self, id: EdgeId) -> Option<&mut Edge> {
        if self.edge(id).is_some() {
            return self.edge_mut(id);
        }
        if self.store.find_contained_edge(id).is_some() {
            return self.store.find_contained_edge_mut(id);
        }
        self.frozen
            .iter_mut()
            .find_map(|store| store.find_contained_edge_mut(id))
    }

    /// Find a node anywhere: active, frozen, or absorbed.
    pub fn find_node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        if self.store.find_node(id).is_some() {
            return self.store.find_node_mut(id);
        }
        self.frozen.iter_mut().find_map(|store| store.find_node_mut(id))
    }

    /// Number of attached edges, not counting parallel duplicates.
    ///
    /// Two edges are duplicates when they join the same pair of nodes in
    /// either direction.
    pub fn effective_degree(&self, node: &Node) -> usize {
        let edges: Vec<&Edge> = node
            .dynamic_edges
            .iter()
            .filter_map(|&id| self.edge(id))
            .collect();
        let mut duplicates = 0;
        for (j, a) in edges.iter().enumerate() {
            for b in &edges[j + 1..] {
                if b.joins(a.from_id, a.to_id) {
                    duplicates += 1;
                }
            }
        }
        node.dynamic_edges.len().saturating_sub(duplicates)
    }

    /// Effective degree of an active node; 0 when it is not active.
    pub fn degree_of(&self, id: NodeId) -> usize {
        self.store
            .node(id)
            .map(|node| self.effective_degree(node))
            .unwrap_or(0)
    }

    /// Drop every reference to a removed edge.
    ///
    /// Clears the id from the dynamic edges and rerouted lists of every node
    /// the edge ever pointed at, wherever that node currently lives.
    pub fn scrub_edge(&mut self, edge: &Edge) {
        let mut ids: Vec<NodeId> = edge.all_endpoints().collect();
        ids.sort();
        ids.dedup();
        for id in ids {
            if let Some(node) = self.find_node_mut(id) {
                node.dynamic_edges.retain(|&e| e != edge.id);
                for rerouted in node.rerouted_edges.values_mut() {
                    rerouted.retain(|&e| e != edge.id);
                }
            }
        }
    }
}
