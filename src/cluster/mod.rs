//! Cluster coarsener: absorbing nodes into clusters and releasing them.
//!
//! A cluster is an ordinary node that owns other nodes. Absorbing a child
//! sorts each of the child's attached edges into one of two buckets:
//!
//! - **contained**: self-loops of the child and edges joining it to the
//!   parent leave the live edge set and are stored on the parent, keyed by
//!   the child;
//! - **rerouted**: every other edge stays live, with the child endpoint
//!   rewritten to the parent and the old id pushed on the edge's origin
//!   stack.
//!
//! The child itself is stored unmodified. Releasing it (`expand`) undoes
//! exactly that, so absorbing and then releasing in reverse order restores
//! the edge set bit for bit.
//!
//! Absorptions are grouped into sessions, one per coarsening pass. Clusters
//! open one session at a time, most recent first.
//!
//! The formation passes (edge length, hubs, chains, level normalization and
//! the fit loop) live in [`strategies`].

mod strategies;

use log::{debug, trace};
use rand::Rng;
use rand::rngs::StdRng;

use crate::config::ClusteringOptions;
use crate::error::LayoutError;
use crate::graph::{ClusterSession, Node, NodeId, Scope};
use crate::viewport::Viewport;

/// Maximum rounds of [`Coarsener::cluster_to_fit`].
pub const MAX_FIT_LEVELS: usize = 50;

/// One coarsening run over the active sector.
///
/// Built by the engine for the duration of a clustering operation; the
/// session counter is read back afterwards.
pub struct Coarsener<'a> {
    scope: Scope<'a>,
    options: &'a ClusteringOptions,
    viewport: &'a Viewport,
    rng: &'a mut StdRng,
    /// Global clustering session, shared by every absorption of a pass.
    pub session: u32,
    /// Set when any node was absorbed or released.
    pub changed: bool,
    /// Nodes whose position was reset by a release.
    pub released: Vec<NodeId>,
}

impl<'a> Coarsener<'a> {
    pub fn new(
        scope: Scope<'a>,
        options: &'a ClusteringOptions,
        viewport: &'a Viewport,
        rng: &'a mut StdRng,
        session: u32,
    ) -> Self {
        Self {
            scope,
            options,
            viewport,
            rng,
            session,
            changed: false,
            released: Vec::new(),
        }
    }

    /// Number of active nodes in the sector.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.scope.store.node_count()
    }

    // =========================================================================
    // Absorb / Expand
    // =========================================================================

    /// Fold `child` into `parent`.
    ///
    /// `force` marks the cluster as formed regardless of zoom, so it may open
    /// at any scale.
    pub fn absorb(&mut self, parent_id: NodeId, child_id: NodeId, force: bool) -> Result<(), LayoutError> {
        if parent_id == child_id {
            return Err(LayoutError::SelfMerge(parent_id));
        }
        if !self.scope.store.contains_node(parent_id) {
            return Err(LayoutError::UnknownNode(parent_id));
        }
        let child = self
            .scope
            .store
            .remove_node(child_id)
            .ok_or(LayoutError::UnknownNode(child_id))?;
        let Some(mut parent) = self.scope.store.remove_node(parent_id) else {
            self.scope.store.insert_node(child);
            return Err(LayoutError::UnknownNode(parent_id));
        };

        let mut contained = Vec::new();
        let mut rerouted = Vec::new();
        for &edge_id in &child.dynamic_edges {
            let Some(edge) = self.scope.edge(edge_id) else {
                continue;
            };
            if edge.is_self_loop() || edge.joins(parent_id, child_id) {
                if let Some(edge) = self.scope.take_edge(edge_id) {
                    contained.push(edge);
                }
                parent.dynamic_edges.retain(|&e| e != edge_id);
            } else if let Some(edge) = self.scope.edge_mut(edge_id) {
                if edge.reroute(child_id, parent_id) {
                    rerouted.push(edge_id);
                    parent.dynamic_edges.push(edge_id);
                }
            }
        }

        let mass_before = parent.body.mass;
        parent.body.mass += child.body.mass;
        let damping = (mass_before / parent.body.mass).sqrt();
        parent.body.vx *= damping;
        parent.body.vy *= damping;

        parent.cluster_size += child.cluster_size;
        parent.update_cluster_appearance(self.options);
        parent.formation_scale = if force { 0.0 } else { self.viewport.scale };

        match parent.cluster_sessions.last_mut() {
            Some(session) if session.id == self.session => session.members.push(child_id),
            _ => parent.cluster_sessions.push(ClusterSession {
                id: self.session,
                members: vec![child_id],
            }),
        }

        trace!(
            parent = parent_id.raw(), child = child_id.raw(), contained = contained.len(),
            rerouted = rerouted.len(); "absorbed node"
        );
        if !contained.is_empty() {
            parent.contained_edges.insert(child_id, contained);
        }
        if !rerouted.is_empty() {
            parent.rerouted_edges.insert(child_id, rerouted);
        }
        parent.contained_nodes.insert(child_id, child);
        self.scope.store.insert_node(parent);
        self.changed = true;
        Ok(())
    }

    /// Release `child` from `parent`, undoing its absorption.
    pub fn expand(&mut self, parent_id: NodeId, child_id: NodeId) -> Result<(), LayoutError> {
        let mut parent = self
            .scope
            .store
            .remove_node(parent_id)
            .ok_or(LayoutError::UnknownNode(parent_id))?;
        let result = self.release(&mut parent, child_id);
        self.scope.store.insert_node(parent);
        result
    }

    fn release(&mut self, parent: &mut Node, child_id: NodeId) -> Result<(), LayoutError> {
        let parent_id = parent.id;
        if !parent.contained_nodes.contains_key(&child_id) {
            return Err(LayoutError::NotContained {
                parent: parent_id,
                child: child_id,
            });
        }

        // a rerouted edge can only be unwound while it is live and the child
        // is on top of its origin stack
        let rerouted = parent.rerouted_edges.get(&child_id).cloned().unwrap_or_default();
        for &edge_id in &rerouted {
            let unwindable = self.scope.edge(edge_id).is_some_and(|edge| {
                edge.original_from_id.last() == Some(&child_id)
                    || edge.original_to_id.last() == Some(&child_id)
            });
            if !unwindable {
                return Err(LayoutError::OutOfOrderExpand {
                    parent: parent_id,
                    child: child_id,
                    edge: edge_id,
                });
            }
        }

        let Some(mut child) = parent.contained_nodes.remove(&child_id) else {
            return Err(LayoutError::NotContained {
                parent: parent_id,
                child: child_id,
            });
        };
        parent.rerouted_edges.remove(&child_id);

        for edge in parent.contained_edges.remove(&child_id).unwrap_or_default() {
            if edge.touches(parent_id) && !edge.is_self_loop() {
                parent.dynamic_edges.push(edge.id);
            }
            self.scope.store.insert_edge(edge);
        }
        for edge_id in rerouted {
            if let Some(edge) = self.scope.edge_mut(edge_id) {
                edge.restore(child_id);
            }
            parent.dynamic_edges.retain(|&e| e != edge_id);
        }

        parent.body.mass -= child.body.mass;
        parent.cluster_size -= child.cluster_size;
        let growth = parent.growth_indicator;
        parent.update_cluster_appearance(self.options);

        if let Some(index) = parent
            .cluster_sessions
            .iter()
            .position(|session| session.members.contains(&child_id))
        {
            let session = &mut parent.cluster_sessions[index];
            session.members.retain(|&id| id != child_id);
            if session.members.is_empty() {
                parent.cluster_sessions.remove(index);
            }
        }

        child.body.x = parent.body.x + growth * (0.5 - self.rng.random::<f64>());
        child.body.y = parent.body.y + growth * (0.5 - self.rng.random::<f64>());

        let owned = self
            .check_ownership(parent)
            .and_then(|_| self.check_ownership(&child));

        trace!(parent = parent_id.raw(), child = child_id.raw(); "released node");
        self.scope.store.insert_node(child);
        self.released.push(child_id);
        self.released.push(parent_id);
        self.changed = true;
        owned
    }

    /// Every attached edge must be live and reference its owner.
    fn check_ownership(&self, node: &Node) -> Result<(), LayoutError> {
        for &edge_id in &node.dynamic_edges {
            match self.scope.edge(edge_id) {
                Some(edge) if edge.touches(node.id) => {}
                _ => {
                    return Err(LayoutError::EdgeOwnership {
                        node: node.id,
                        edge: edge_id,
                    });
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Opening
    // =========================================================================

    /// Open a cluster in place.
    ///
    /// Without `force` the cluster only opens once the view has zoomed past
    /// the scale it formed at, it sits in the active area and it covers more
    /// than `screenSizeThreshold` of the canvas. Clusters smaller than
    /// `sectorThreshold` open completely. A larger cluster opened without
    /// `open_all` unwinds a single level: only the members of its most
    /// recent session are released, and earlier sessions stay folded.
    pub fn expand_cluster_node(
        &mut self,
        parent_id: NodeId,
        recursive: bool,
        force: bool,
        open_all: bool,
    ) -> Result<(), LayoutError> {
        let Some(parent) = self.scope.store.node(parent_id) else {
            return Ok(());
        };
        if !parent.is_cluster() {
            return Ok(());
        }
        let open_all = open_all || parent.cluster_size < self.options.sector_threshold;
        let recursive = recursive || open_all;

        if !force {
            let view = self.viewport;
            let ready = parent.formation_scale < view.scale
                && view.covers(parent.width, parent.height, self.options.screen_size_threshold)
                && view.in_active_area(parent.body.x, parent.body.y, self.options.active_area_box_size);
            if !ready {
                return Ok(());
            }
        }

        let members: Vec<NodeId> = if open_all {
            parent
                .cluster_sessions
                .iter()
                .rev()
                .flat_map(|session| session.members.iter().rev().copied())
                .collect()
        } else {
            parent
                .cluster_sessions
                .last()
                .map(|session| session.members.iter().rev().copied().collect())
                .unwrap_or_default()
        };

        for child_id in members {
            self.expand(parent_id, child_id)?;
            if recursive {
                self.expand_cluster_node(child_id, recursive, force, open_all)?;
            }
        }
        Ok(())
    }

    /// Force-open every cluster of the sector, one session each.
    pub fn open_clusters(&mut self, recursive: bool, force: bool) -> Result<(), LayoutError> {
        for id in self.scope.store.node_ids() {
            self.expand_cluster_node(id, recursive, force, false)?;
        }
        Ok(())
    }

    /// Open every cluster completely, nested ones included.
    pub fn open_all(&mut self) -> Result<(), LayoutError> {
        for id in self.scope.store.node_ids() {
            self.expand_cluster_node(id, true, true, true)?;
        }
        Ok(())
    }

    /// Reveal `target` by unwinding its outermost enclosing cluster.
    ///
    /// Each step releases the most recent session of the active ancestor,
    /// so nested clusters open in the reverse of their formation order.
    pub fn reveal(&mut self, target: NodeId) -> Result<(), LayoutError> {
        loop {
            let Some(path) = self.scope.store.path_to(target) else {
                return Err(LayoutError::UnknownNode(target));
            };
            let Some(&outer) = path.first() else {
                return Ok(());
            };
            let before = self.scope.store.node_count();
            self.expand_cluster_node(outer, false, true, false)?;
            if self.scope.store.node_count() == before {
                return Err(LayoutError::NotClustered(outer));
            }
        }
    }

    /// Fold clusters back one level: the inverse step of a forced zoom out.
    pub fn decrease_cluster_level(&mut self) -> Result<(), LayoutError> {
        debug!(nodes = self.node_count(); "decreasing cluster level");
        self.open_clusters(false, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, EdgeId, GraphStore};
    use proptest::prelude::*;
    use rand::SeedableRng;
    use std::collections::BTreeMap;

    /// Build a store from an edge list; every node starts at a distinct spot.
    pub(crate) fn build_store(nodes: u32, edges: &[(u32, u32)]) -> GraphStore {
        let mut store = GraphStore::new();
        for i in 0..nodes {
            store.insert_node(Node::new(NodeId(i), 10.0 * i as f64, (i % 3) as f64));
        }
        for (k, &(from, to)) in edges.iter().enumerate() {
            let mut edge = Edge::new(EdgeId(k as u32), NodeId(from), NodeId(to));
            edge.attributes.label = Some(format!("e{k}"));
            edge.attributes.width = 1.0 + k as f64;
            for id in [from, to] {
                let node = store.node_mut(NodeId(id)).unwrap();
                if !node.dynamic_edges.contains(&edge.id) {
                    node.dynamic_edges.push(edge.id);
                }
            }
            store.insert_edge(edge);
        }
        store
    }

    /// Topology snapshot: every edge plus each node's attached edge set.
    fn snapshot(store: &GraphStore) -> (Vec<Edge>, BTreeMap<NodeId, Vec<EdgeId>>, Vec<(NodeId, f64, usize)>) {
        let edges = store.edges().cloned().collect();
        let attached = store
            .nodes()
            .map(|node| {
                let mut ids = node.dynamic_edges.clone();
                ids.sort();
                (node.id, ids)
            })
            .collect();
        let sizes = store
            .nodes()
            .map(|node| (node.id, node.body.mass, node.cluster_size))
            .collect();
        (edges, attached, sizes)
    }

    fn coarsener<'a>(
        store: &'a mut GraphStore,
        options: &'a ClusteringOptions,
        viewport: &'a Viewport,
        rng: &'a mut StdRng,
    ) -> Coarsener<'a> {
        Coarsener::new(Scope::new(store), options, viewport, rng, 1)
    }

    #[test]
    fn test_absorb_buckets_edges() {
        // 0-1, 1-2, 1-1 (loop), 1-2 (parallel)
        let mut store = build_store(3, &[(0, 1), (1, 2), (1, 1), (1, 2)]);
        let options = ClusteringOptions::default();
        let viewport = Viewport::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut c = coarsener(&mut store, &options, &viewport, &mut rng);

        c.absorb(NodeId(2), NodeId(1), false).unwrap();
        assert!(c.changed);
        drop(c);

        assert!(!store.contains_node(NodeId(1)));
        let parent = store.node(NodeId(2)).unwrap();
        assert_eq!(parent.cluster_size, 2);
        assert_eq!(parent.body.mass, 2.0);
        assert_eq!(parent.formation_scale, 1.0);
        assert_eq!(parent.cluster_sessions, vec![ClusterSession { id: 1, members: vec![NodeId(1)] }]);

        let mut contained: Vec<EdgeId> =
            parent.contained_edges[&NodeId(1)].iter().map(|e| e.id).collect();
        contained.sort();
        assert_eq!(contained, vec![EdgeId(1), EdgeId(2), EdgeId(3)]);
        assert_eq!(parent.rerouted_edges[&NodeId(1)], vec![EdgeId(0)]);
        assert_eq!(parent.dynamic_edges, vec![EdgeId(0)]);

        let rerouted = store.edge(EdgeId(0)).unwrap();
        assert_eq!((rerouted.from_id, rerouted.to_id), (NodeId(0), NodeId(2)));
        assert_eq!(rerouted.original_to_id, vec![NodeId(1)]);
        assert_eq!(store.edge_count(), 1);
    }

    #[test]
    fn test_absorb_then_expand_restores_topology() {
        let mut store = build_store(4, &[(0, 1), (1, 2), (2, 3), (3, 1), (1, 1), (2, 1)]);
        let before = snapshot(&store);
        let options = ClusteringOptions::default();
        let viewport = Viewport::default();
        let mut rng = StdRng::seed_from_u64(2);
        let mut c = coarsener(&mut store, &options, &viewport, &mut rng);

        c.absorb(NodeId(2), NodeId(1), true).unwrap();
        c.absorb(NodeId(2), NodeId(3), true).unwrap();
        c.expand(NodeId(2), NodeId(3)).unwrap();
        c.expand(NodeId(2), NodeId(1)).unwrap();
        drop(c);

        assert_eq!(snapshot(&store), before);
        assert!(store.node(NodeId(2)).unwrap().cluster_sessions.is_empty());
    }

    #[test]
    fn test_velocity_rescaled_by_mass_ratio() {
        let mut store = build_store(2, &[(0, 1)]);
        {
            let parent = store.node_mut(NodeId(0)).unwrap();
            parent.body.vx = 4.0;
            parent.body.vy = -2.0;
        }
        store.node_mut(NodeId(1)).unwrap().body.mass = 3.0;
        let options = ClusteringOptions::default();
        let viewport = Viewport::default();
        let mut rng = StdRng::seed_from_u64(3);
        coarsener(&mut store, &options, &viewport, &mut rng)
            .absorb(NodeId(0), NodeId(1), true)
            .unwrap();

        let parent = store.node(NodeId(0)).unwrap();
        assert_eq!(parent.body.mass, 4.0);
        assert_eq!((parent.body.vx, parent.body.vy), (2.0, -1.0));
        assert_eq!(parent.formation_scale, 0.0);
    }

    #[test]
    fn test_nested_clusters_unwind_one_level_at_a_time() {
        let mut store = build_store(3, &[(0, 1), (1, 2)]);
        let before = snapshot(&store);
        let options = ClusteringOptions::default();
        let viewport = Viewport::default();
        let mut rng = StdRng::seed_from_u64(4);
        let mut c = coarsener(&mut store, &options, &viewport, &mut rng);

        c.absorb(NodeId(1), NodeId(0), true).unwrap();
        c.session += 1;
        c.absorb(NodeId(2), NodeId(1), true).unwrap();
        assert_eq!(c.node_count(), 1);

        // the inner cluster cannot be opened while its parent is absorbed
        assert_eq!(
            c.expand(NodeId(1), NodeId(0)),
            Err(LayoutError::UnknownNode(NodeId(1)))
        );
        c.expand(NodeId(2), NodeId(1)).unwrap();
        assert_eq!(c.node_count(), 2);
        c.expand(NodeId(1), NodeId(0)).unwrap();
        drop(c);
        assert_eq!(snapshot(&store), before);
    }

    #[test]
    fn test_out_of_order_expand_is_rejected() {
        // 0 and 2 both join 1, and are joined to each other
        let mut store = build_store(3, &[(0, 1), (1, 2), (0, 2)]);
        let options = ClusteringOptions::default();
        let viewport = Viewport::default();
        let mut rng = StdRng::seed_from_u64(5);
        let mut c = coarsener(&mut store, &options, &viewport, &mut rng);

        c.absorb(NodeId(1), NodeId(0), true).unwrap();
        c.absorb(NodeId(1), NodeId(2), true).unwrap();
        assert_eq!(
            c.expand(NodeId(1), NodeId(0)),
            Err(LayoutError::OutOfOrderExpand {
                parent: NodeId(1),
                child: NodeId(0),
                edge: EdgeId(2),
            })
        );
        // nothing was released by the failed attempt
        assert_eq!(c.node_count(), 1);
        c.expand(NodeId(1), NodeId(2)).unwrap();
        c.expand(NodeId(1), NodeId(0)).unwrap();
        assert_eq!(c.node_count(), 3);
    }

    #[test]
    fn test_expand_errors() {
        let mut store = build_store(2, &[(0, 1)]);
        let options = ClusteringOptions::default();
        let viewport = Viewport::default();
        let mut rng = StdRng::seed_from_u64(6);
        let mut c = coarsener(&mut store, &options, &viewport, &mut rng);
        assert_eq!(
            c.expand(NodeId(0), NodeId(1)),
            Err(LayoutError::NotContained {
                parent: NodeId(0),
                child: NodeId(1),
            })
        );
        assert_eq!(c.absorb(NodeId(0), NodeId(0), true), Err(LayoutError::SelfMerge(NodeId(0))));
        assert_eq!(c.absorb(NodeId(0), NodeId(9), true), Err(LayoutError::UnknownNode(NodeId(9))));
        assert_eq!(c.node_count(), 2);
    }

    #[test]
    fn test_released_child_lands_near_parent() {
        let mut store = build_store(2, &[(0, 1)]);
        store.node_mut(NodeId(0)).unwrap().body.x = 500.0;
        let options = ClusteringOptions::default();
        let viewport = Viewport::default();
        let mut rng = StdRng::seed_from_u64(7);
        let mut c = coarsener(&mut store, &options, &viewport, &mut rng);
        c.absorb(NodeId(0), NodeId(1), true).unwrap();
        c.expand(NodeId(0), NodeId(1)).unwrap();
        assert_eq!(c.released, vec![NodeId(1), NodeId(0)]);
        drop(c);
        // growth indicator of a two-node cluster is one width step
        let child = store.node(NodeId(1)).unwrap();
        assert!((child.body.x - 500.0).abs() <= 0.5);
    }

    #[test]
    fn test_reveal_unwinds_enclosing_clusters() {
        let mut store = build_store(4, &[(0, 1), (1, 2), (2, 3)]);
        let options = ClusteringOptions::default();
        let viewport = Viewport::default();
        let mut rng = StdRng::seed_from_u64(8);
        let mut c = coarsener(&mut store, &options, &viewport, &mut rng);
        c.absorb(NodeId(1), NodeId(0), true).unwrap();
        c.session += 1;
        c.absorb(NodeId(2), NodeId(1), true).unwrap();
        c.absorb(NodeId(2), NodeId(3), true).unwrap();

        c.reveal(NodeId(0)).unwrap();
        drop(c);
        assert!(store.contains_node(NodeId(0)));
    }

    fn check_roundtrip(nodes: u32, edges: &[(u32, u32)], merges: &[(usize, usize)]) -> Result<(), TestCaseError> {
        let mut store = build_store(nodes, edges);
        let before = snapshot(&store);
        let options = ClusteringOptions::default();
        let viewport = Viewport::default();
        let mut rng = StdRng::seed_from_u64(9);
        let mut c = coarsener(&mut store, &options, &viewport, &mut rng);

        let mut done = Vec::new();
        for (k, &(p, q)) in merges.iter().enumerate() {
            let active = c.scope.store.node_ids();
            if active.len() < 2 {
                break;
            }
            let parent = active[p % active.len()];
            let child = active[q % active.len()];
            if parent == child {
                continue;
            }
            c.session = 1 + (k / 3) as u32;
            c.absorb(parent, child, true).map_err(|e| TestCaseError::fail(e.to_string()))?;
            done.push((parent, child));
        }
        for &(parent, child) in done.iter().rev() {
            c.expand(parent, child).map_err(|e| TestCaseError::fail(e.to_string()))?;
        }
        drop(c);
        prop_assert_eq!(snapshot(&store), before);
        Ok(())
    }

    fn graph_strategy() -> impl Strategy<Value = (u32, Vec<(u32, u32)>)> {
        (2u32..10).prop_flat_map(|n| (Just(n), prop::collection::vec((0..n, 0..n), 0..20)))
    }

    proptest! {
        #[test]
        fn prop_absorb_expand_roundtrip(
            (nodes, edges) in graph_strategy(),
            merges in prop::collection::vec((0usize..16, 0usize..16), 1..12),
        ) {
            check_roundtrip(nodes, &edges, &merges)?;
        }
    }
}
