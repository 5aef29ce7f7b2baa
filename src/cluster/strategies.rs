//! Formation passes that decide which nodes to absorb.
//!
//! # Algorithm Overview
//!
//! A zoom-out step runs, in order:
//! 1. Edge-length formation: short edges fold their degree-1 endpoint into
//!    the other end (or forced formation: every degree-1 node joins its
//!    neighbour)
//! 2. Hub aggregation, only when step 1 changed nothing
//! 3. Chain reduction, when degree-2 nodes dominate
//! 4. Level normalization, when anything was absorbed
//!
//! [`Coarsener::cluster_to_fit`] repeats forced steps until the sector holds
//! few enough nodes.

use std::f64::consts::PI;

use log::debug;
use rand::Rng;

use super::{Coarsener, MAX_FIT_LEVELS};
use crate::error::LayoutError;
use crate::graph::NodeId;

impl Coarsener<'_> {
    // =========================================================================
    // Orchestration
    // =========================================================================

    /// One zoom-out step.
    pub fn zoom_out(&mut self, force: bool) -> Result<(), LayoutError> {
        let before = self.node_count();
        if force {
            self.force_clusters_by_zoom()?;
        } else {
            self.form_clusters_by_zoom()?;
        }
        if self.node_count() == before {
            self.aggregate_hubs(force)?;
        }
        self.handle_chains()?;

        if self.node_count() < before {
            self.session += 1;
            self.normalize_levels()?;
        }
        Ok(())
    }

    /// Forced zoom-out step.
    pub fn increase_cluster_level(&mut self) -> Result<(), LayoutError> {
        debug!(nodes = self.node_count(); "increasing cluster level");
        self.zoom_out(true)
    }

    /// Fold every hub's light neighbours into it regardless of zoom.
    pub fn force_aggregate_hubs(&mut self) -> Result<(), LayoutError> {
        let before = self.node_count();
        self.aggregate_hubs(true)?;
        if self.node_count() != before {
            self.session += 1;
        }
        Ok(())
    }

    /// Coarsen until at most `max_nodes` remain, giving up after
    /// [`MAX_FIT_LEVELS`] rounds.
    ///
    /// Every third round aggregates hubs and normalizes levels, the others
    /// run a forced zoom-out. With `reposition`, the survivors are scattered
    /// on a circle sized by their count and mass.
    pub fn cluster_to_fit(&mut self, max_nodes: usize, reposition: bool) -> Result<(), LayoutError> {
        let start = self.node_count();
        let mut level = 0;
        while self.node_count() > max_nodes && level < MAX_FIT_LEVELS {
            if level % 3 == 0 {
                self.force_aggregate_hubs()?;
                self.normalize_levels()?;
            } else {
                self.increase_cluster_level()?;
            }
            level += 1;
        }
        if level > 0 && reposition {
            self.reposition();
        }
        debug!(from = start, to = self.node_count(), levels = level; "clustered to fit");
        Ok(())
    }

    fn reposition(&mut self) {
        let count = self.scope.store.node_count() as f64;
        for node in self.scope.store.nodes_mut() {
            let radius = count * node.body.mass.min(100.0);
            let angle = 2.0 * PI * self.rng.random::<f64>();
            if !node.body.x_fixed {
                node.body.x = radius * angle.cos();
            }
            if !node.body.y_fixed {
                node.body.y = radius * angle.sin();
            }
        }
    }

    // =========================================================================
    // Formation Passes
    // =========================================================================

    /// Fold the leaf end of every edge shorter than the zoom-scaled
    /// threshold.
    pub fn form_clusters_by_zoom(&mut self) -> Result<(), LayoutError> {
        let min_length = self.options.cluster_edge_threshold / self.viewport.scale;
        for edge_id in self.scope.store.edge_ids() {
            let Some(edge) = self.scope.store.edge(edge_id) else {
                continue;
            };
            if edge.is_self_loop() {
                continue;
            }
            let (Some(from), Some(to)) = (
                self.scope.store.node(edge.from_id),
                self.scope.store.node(edge.to_id),
            ) else {
                continue;
            };
            let length = (from.body.x - to.body.x).hypot(from.body.y - to.body.y);
            if length >= min_length {
                continue;
            }

            let (parent, child) = if to.body.mass > from.body.mass {
                (to.id, from.id)
            } else {
                (from.id, to.id)
            };
            if self.scope.degree_of(child) == 1 {
                self.absorb(parent, child, false)?;
            } else if self.scope.degree_of(parent) == 1 {
                self.absorb(child, parent, false)?;
            }
        }
        Ok(())
    }

    /// Fold every degree-1 node into its neighbour; the heavier of the two
    /// becomes the parent.
    pub fn force_clusters_by_zoom(&mut self) -> Result<(), LayoutError> {
        for id in self.scope.store.node_ids() {
            let Some(node) = self.scope.store.node(id) else {
                continue;
            };
            if node.dynamic_edges.is_empty() || self.scope.effective_degree(node) != 1 {
                continue;
            }
            let neighbour = node
                .dynamic_edges
                .iter()
                .filter_map(|&edge_id| self.scope.edge(edge_id))
                .filter_map(|edge| edge.other_end(id))
                .filter(|&other| other != id)
                .find_map(|other| self.scope.store.node(other));
            let Some(other) = neighbour else {
                continue;
            };

            let (parent, child) = if node.body.mass > other.body.mass {
                (id, other.id)
            } else {
                (other.id, id)
            };
            self.absorb(parent, child, true)?;
        }
        Ok(())
    }

    /// `floor(mean + 2·std)` of the effective degree, capped at the largest
    /// degree present.
    pub fn hub_threshold(&self) -> usize {
        let degrees: Vec<usize> = self
            .scope
            .store
            .nodes()
            .map(|node| self.scope.effective_degree(node))
            .collect();
        let Some(&largest) = degrees.iter().max() else {
            return 0;
        };
        let n = degrees.len() as f64;
        let mean = degrees.iter().sum::<usize>() as f64 / n;
        let variance = degrees
            .iter()
            .map(|&d| (d as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        ((mean + 2.0 * variance.sqrt()).floor() as usize).min(largest)
    }

    /// Let every hub absorb its light neighbours.
    pub fn aggregate_hubs(&mut self, force: bool) -> Result<(), LayoutError> {
        let threshold = self.hub_threshold();
        for id in self.scope.store.node_ids() {
            self.form_cluster_from_hub(id, force, false, 0, threshold)?;
        }
        Ok(())
    }

    /// Absorb the neighbours of `hub` whose dynamic-edge count is at most
    /// `threshold + offset`.
    ///
    /// The hub qualifies when its effective degree reaches `threshold`, or
    /// equals it when `only_equal` is set. Unforced formation also needs one
    /// of the hub's edges to be shorter than the zoom-scaled edge threshold.
    fn form_cluster_from_hub(
        &mut self,
        hub: NodeId,
        force: bool,
        only_equal: bool,
        offset: usize,
        threshold: usize,
    ) -> Result<(), LayoutError> {
        let Some(node) = self.scope.store.node(hub) else {
            return Ok(());
        };
        let degree = self.scope.effective_degree(node);
        let qualifies = if only_equal {
            degree == threshold
        } else {
            degree >= threshold
        };
        if !qualifies {
            return Ok(());
        }

        if !force {
            let min_length = self.options.cluster_edge_threshold / self.viewport.scale;
            let (x, y) = (node.body.x, node.body.y);
            let has_short_edge = node
                .dynamic_edges
                .iter()
                .filter_map(|&edge_id| self.scope.edge(edge_id))
                .filter_map(|edge| edge.other_end(hub))
                .filter_map(|other| self.scope.store.node(other))
                .any(|other| (other.body.x - x).hypot(other.body.y - y) < min_length);
            if !has_short_edge {
                return Ok(());
            }
        }

        let edges = node.dynamic_edges.clone();
        for edge_id in edges {
            let Some(edge) = self.scope.edge(edge_id) else {
                continue;
            };
            if !self.scope.store.is_connected(edge) {
                continue;
            }
            let Some(other) = edge.other_end(hub).filter(|&other| other != hub) else {
                continue;
            };
            let light = self
                .scope
                .store
                .node(other)
                .is_some_and(|child| child.dynamic_edges.len() <= threshold + offset);
            if light {
                self.absorb(hub, other, force)?;
            }
        }
        Ok(())
    }

    /// Fold chains when degree-2 nodes make up more than `chainThreshold` of
    /// the sector.
    pub fn handle_chains(&mut self) -> Result<(), LayoutError> {
        let total = self.node_count();
        if total == 0 {
            return Ok(());
        }
        let ids = self.scope.store.node_ids();
        let chain_nodes = ids.iter().filter(|&&id| self.scope.degree_of(id) == 2).count();
        let fraction = chain_nodes as f64 / total as f64;
        let threshold = self.options.chain_threshold;
        if fraction <= threshold {
            return Ok(());
        }

        let mut remaining = (total as f64 * (1.0 - threshold / fraction)).floor() as usize;
        debug!(fraction = fraction, folds = remaining; "reducing chains");
        for id in ids {
            if remaining == 0 {
                break;
            }
            if self.scope.degree_of(id) == 2 {
                // attempts count against the budget whether or not they fold
                self.form_cluster_from_hub(id, true, true, 1, 2)?;
                remaining -= 1;
            }
        }
        Ok(())
    }

    /// Fold nodes lagging too many sessions behind the deepest cluster into
    /// their shallowest neighbour.
    pub fn normalize_levels(&mut self) -> Result<(), LayoutError> {
        let levels = self.scope.store.nodes().map(|node| node.cluster_level());
        let (min, max) = levels.fold((usize::MAX, 0), |(min, max), level| {
            (min.min(level), max.max(level))
        });
        let difference = self.options.cluster_level_difference;
        if max < min || max - min <= difference {
            return Ok(());
        }

        let cutoff = max - difference;
        let before = self.node_count();
        for id in self.scope.store.node_ids() {
            let Some(node) = self.scope.store.node(id) else {
                continue;
            };
            if node.cluster_level() >= cutoff {
                continue;
            }
            let target = node
                .dynamic_edges
                .iter()
                .filter_map(|&edge_id| self.scope.edge(edge_id))
                .filter_map(|edge| edge.other_end(id))
                .filter(|&other| other != id)
                .filter_map(|other| self.scope.store.node(other))
                .map(|other| (other.cluster_level(), other.id))
                .min();
            if let Some((_, parent)) = target {
                self.absorb(parent, id, true)?;
            }
        }
        if self.node_count() != before {
            self.session += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::build_store;
    use super::*;
    use crate::config::ClusteringOptions;
    use crate::graph::{ClusterSession, GraphStore, Scope};
    use crate::viewport::Viewport;
    use float_cmp::approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn star(leaves: u32) -> GraphStore {
        let edges: Vec<(u32, u32)> = (1..=leaves).map(|i| (0, i)).collect();
        build_store(leaves + 1, &edges)
    }

    fn path(n: u32) -> GraphStore {
        let edges: Vec<(u32, u32)> = (1..n).map(|i| (i - 1, i)).collect();
        build_store(n, &edges)
    }

    fn total_size(store: &GraphStore) -> usize {
        store.nodes().map(|node| node.cluster_size).sum()
    }

    #[test]
    fn test_hub_absorbs_all_leaves() {
        let mut store = star(20);
        let options = ClusteringOptions::default();
        let viewport = Viewport::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut c = Coarsener::new(Scope::new(&mut store), &options, &viewport, &mut rng, 1);

        assert_eq!(c.hub_threshold(), 9);
        c.force_aggregate_hubs().unwrap();
        assert_eq!(c.node_count(), 1);
        assert_eq!(c.session, 2);
        drop(c);

        let hub = store.node(NodeId(0)).unwrap();
        assert_eq!(hub.cluster_size, 21);
        assert_eq!(hub.cluster_sessions.len(), 1);
        assert_eq!(hub.cluster_sessions[0].members.len(), 20);
        assert_eq!(store.edge_count(), 0);
    }

    #[test]
    fn test_edge_length_formation_depends_on_scale() {
        let mut store = path(3);
        for node in store.nodes_mut() {
            node.body.x *= 10.0;
        }
        let options = ClusteringOptions::default();
        let mut rng = StdRng::seed_from_u64(2);

        // edges are ~100 long, threshold is 20 at unit scale
        let viewport = Viewport::default();
        let mut c = Coarsener::new(Scope::new(&mut store), &options, &viewport, &mut rng, 1);
        c.form_clusters_by_zoom().unwrap();
        assert_eq!(c.node_count(), 3);
        assert!(!c.changed);
        drop(c);

        let zoomed_out = Viewport {
            scale: 0.1,
            ..Viewport::default()
        };
        let mut c = Coarsener::new(Scope::new(&mut store), &options, &zoomed_out, &mut rng, 1);
        c.form_clusters_by_zoom().unwrap();
        assert_eq!(c.node_count(), 1);
        drop(c);

        let cluster = store.nodes().next().unwrap();
        assert_eq!(cluster.cluster_size, 3);
        assert_eq!(cluster.formation_scale, 0.1);
    }

    #[test]
    fn test_forced_formation_collapses_leaves() {
        let mut store = path(4);
        let options = ClusteringOptions::default();
        let viewport = Viewport::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut c = Coarsener::new(Scope::new(&mut store), &options, &viewport, &mut rng, 1);
        c.force_clusters_by_zoom().unwrap();
        drop(c);

        assert_eq!(store.node_count(), 1);
        let cluster = store.node(NodeId(1)).unwrap();
        assert_eq!(cluster.cluster_size, 4);
        assert_eq!(cluster.formation_scale, 0.0);
    }

    #[test]
    fn test_chain_reduction_folds_paths() {
        let mut store = path(10);
        let options = ClusteringOptions::default();
        let viewport = Viewport::default();
        let mut rng = StdRng::seed_from_u64(4);
        let mut c = Coarsener::new(Scope::new(&mut store), &options, &viewport, &mut rng, 1);
        c.handle_chains().unwrap();
        assert!(c.node_count() < 10);
        drop(c);
        assert_eq!(total_size(&store), 10);
    }

    #[test]
    fn test_chain_reduction_ignores_trees() {
        let mut store = star(6);
        let options = ClusteringOptions::default();
        let viewport = Viewport::default();
        let mut rng = StdRng::seed_from_u64(5);
        let mut c = Coarsener::new(Scope::new(&mut store), &options, &viewport, &mut rng, 1);
        c.handle_chains().unwrap();
        assert_eq!(c.node_count(), 7);
    }

    #[test]
    fn test_chain_budget_counts_failed_folds() {
        // bridges 0..=3 sit between the heavy hubs 4 and 5; 7 is a foldable link
        let mut edges: Vec<(u32, u32)> = (0..4).flat_map(|i| [(i, 4), (i, 5)]).collect();
        edges.extend([(6, 7), (7, 8)]);
        let mut store = build_store(9, &edges);
        let options = ClusteringOptions::default();
        let viewport = Viewport::default();
        let mut rng = StdRng::seed_from_u64(11);
        let mut c = Coarsener::new(Scope::new(&mut store), &options, &viewport, &mut rng, 1);

        // 5 of 9 nodes have degree 2, so two attempts are allowed, both on bridges
        c.handle_chains().unwrap();
        assert_eq!(c.node_count(), 9);
        assert!(!c.changed);
    }

    #[test]
    fn test_normalize_folds_lagging_nodes() {
        let mut store = path(3);
        store.node_mut(NodeId(2)).unwrap().cluster_sessions = (0..3)
            .map(|id| ClusterSession {
                id,
                members: vec![NodeId(100 + id)],
            })
            .collect();
        let options = ClusteringOptions::default();
        let viewport = Viewport::default();
        let mut rng = StdRng::seed_from_u64(6);
        let mut c = Coarsener::new(Scope::new(&mut store), &options, &viewport, &mut rng, 1);
        c.normalize_levels().unwrap();
        assert_eq!(c.node_count(), 2);
        assert_eq!(c.session, 2);
        drop(c);
        assert_eq!(store.node(NodeId(1)).unwrap().cluster_size, 2);
    }

    #[test]
    fn test_cluster_to_fit_reaches_target() {
        let mut store = path(30);
        let options = ClusteringOptions::default();
        let viewport = Viewport::default();
        let mut rng = StdRng::seed_from_u64(7);
        let mut c = Coarsener::new(Scope::new(&mut store), &options, &viewport, &mut rng, 1);
        c.cluster_to_fit(5, true).unwrap();
        assert!(c.node_count() <= 5);
        drop(c);

        assert_eq!(total_size(&store), 30);
        let count = store.node_count() as f64;
        for node in store.nodes() {
            let radius = node.body.x.hypot(node.body.y);
            let expected = count * node.body.mass.min(100.0);
            assert!(approx_eq!(f64, radius, expected, epsilon = 1e-6));
        }
    }

    #[test]
    fn test_cluster_to_fit_leaves_small_graphs_alone() {
        let mut store = path(4);
        let before = store.clone();
        let options = ClusteringOptions::default();
        let viewport = Viewport::default();
        let mut rng = StdRng::seed_from_u64(8);
        Coarsener::new(Scope::new(&mut store), &options, &viewport, &mut rng, 1)
            .cluster_to_fit(10, true)
            .unwrap();
        assert_eq!(store, before);
    }

    #[test]
    fn test_unforced_open_waits_for_zoom_in() {
        let mut store = star(3);
        let options = ClusteringOptions {
            screen_size_threshold: 0.01,
            ..ClusteringOptions::default()
        };
        let mut rng = StdRng::seed_from_u64(9);

        let viewport = Viewport::default();
        let mut c = Coarsener::new(Scope::new(&mut store), &options, &viewport, &mut rng, 1);
        c.aggregate_hubs(false).unwrap();
        assert_eq!(c.node_count(), 1);
        // formed at this scale, so it stays closed
        c.expand_cluster_node(NodeId(0), false, false, false).unwrap();
        assert_eq!(c.node_count(), 1);
        drop(c);

        let mut zoomed_in = Viewport::default();
        zoomed_in.zoom(2.0, (400.0, 300.0));
        let mut c = Coarsener::new(Scope::new(&mut store), &options, &zoomed_in, &mut rng, 2);
        c.expand_cluster_node(NodeId(0), false, false, false).unwrap();
        assert_eq!(c.node_count(), 4);
    }

    #[test]
    fn test_unforced_open_releases_latest_session() {
        let mut store = star(3);
        let options = ClusteringOptions {
            screen_size_threshold: 0.01,
            sector_threshold: 2,
            ..ClusteringOptions::default()
        };
        let viewport = Viewport::default();
        let mut rng = StdRng::seed_from_u64(12);
        let mut c = Coarsener::new(Scope::new(&mut store), &options, &viewport, &mut rng, 1);

        c.absorb(NodeId(0), NodeId(1), true).unwrap();
        c.session += 1;
        c.absorb(NodeId(0), NodeId(2), true).unwrap();
        c.absorb(NodeId(0), NodeId(3), true).unwrap();
        assert_eq!(c.node_count(), 1);

        c.expand_cluster_node(NodeId(0), false, false, false).unwrap();
        assert_eq!(c.node_count(), 3);
        c.expand_cluster_node(NodeId(0), false, false, false).unwrap();
        assert_eq!(c.node_count(), 4);
    }

    #[test]
    fn test_increase_then_decrease_restores_nodes() {
        let mut store = star(5);
        let options = ClusteringOptions::default();
        let viewport = Viewport::default();
        let mut rng = StdRng::seed_from_u64(10);
        let mut c = Coarsener::new(Scope::new(&mut store), &options, &viewport, &mut rng, 1);
        c.increase_cluster_level().unwrap();
        assert_eq!(c.node_count(), 1);
        c.decrease_cluster_level().unwrap();
        assert_eq!(c.node_count(), 6);
    }
}
