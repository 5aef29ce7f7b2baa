//! Level-based placement for hierarchical layouts.
//!
//! # Algorithm Overview
//!
//! 1. **Levels:** taken from the dataset when every node has one, otherwise
//!    derived by breadth-first search over a petgraph view of the active
//!    nodes. `Hubsize` starts from the highest-degree nodes of each
//!    component; `Direction` follows edge direction (`to` one level below
//!    `from`) and shifts the result so the smallest level is 0.
//! 2. **Distribution:** each level gets a slot spacing of
//!    `(maxCount + 1) · nodeSpacing / (count + 1)`, centered on the origin.
//! 3. **Placement:** levels are walked top-down. Each unplaced node takes the
//!    next slot of its level, then pulls its deeper neighbours breadth-first
//!    into the next slots of theirs, so subtrees stay together.
//!
//! The level axis is pinned; the in-level axis is free for the simulation.

use std::collections::{BTreeMap, HashMap, VecDeque};

use log::debug;
use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableGraph, StableUnGraph};
use petgraph::visit::{Bfs, EdgeRef, VisitMap};

use crate::config::{HierarchicalLayoutOptions, LevelMethod};
use crate::error::LayoutError;
use crate::graph::{GraphStore, NodeId};

/// Views of the active nodes; node weights are the store ids.
///
/// Both graphs receive the nodes in the same order, so a `NodeIndex` means
/// the same node in either.
struct LevelGraph {
    directed: StableGraph<NodeId, ()>,
    undirected: StableUnGraph<NodeId, ()>,
    index: BTreeMap<NodeId, NodeIndex>,
}

impl LevelGraph {
    fn from_store(store: &GraphStore) -> Self {
        let mut directed = StableGraph::with_capacity(store.node_count(), store.edge_count());
        let mut undirected = StableUnGraph::with_capacity(store.node_count(), store.edge_count());
        let mut index = BTreeMap::new();
        for id in store.node_ids() {
            let ix = directed.add_node(id);
            undirected.add_node(id);
            index.insert(id, ix);
        }
        for edge in store.connected_edges() {
            if edge.is_self_loop() {
                continue;
            }
            if let (Some(&from), Some(&to)) = (index.get(&edge.from_id), index.get(&edge.to_id)) {
                directed.add_edge(from, to, ());
                undirected.add_edge(from, to, ());
            }
        }
        Self {
            directed,
            undirected,
            index,
        }
    }

    fn id(&self, ix: NodeIndex) -> Option<NodeId> {
        self.directed.node_weight(ix).copied()
    }

    fn neighbours(&self, ix: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.undirected.neighbors(ix)
    }

    fn degree(&self, ix: NodeIndex) -> usize {
        self.undirected.edges(ix).count()
    }

    /// Breadth-first distance from the highest-degree nodes, component by
    /// component.
    fn hubsize_levels(&self) -> HashMap<NodeIndex, i32> {
        let mut levels: HashMap<NodeIndex, i32> = HashMap::with_capacity(self.index.len());
        loop {
            let unlevelled: Vec<NodeIndex> = self
                .index
                .values()
                .copied()
                .filter(|ix| !levels.contains_key(ix))
                .collect();
            let Some(hub_degree) = unlevelled.iter().map(|&ix| self.degree(ix)).max() else {
                break;
            };
            let hubs: Vec<NodeIndex> = unlevelled
                .into_iter()
                .filter(|&ix| self.degree(ix) == hub_degree)
                .collect();

            // multi-source search: every hub starts at level 0
            let mut bfs = Bfs::new(&self.undirected, hubs[0]);
            for &hub in &hubs[1..] {
                bfs.discovered.visit(hub);
                bfs.stack.push_back(hub);
            }
            for &hub in &hubs {
                levels.insert(hub, 0);
            }
            while let Some(ix) = bfs.next(&self.undirected) {
                if levels.contains_key(&ix) {
                    continue;
                }
                let level = self
                    .neighbours(ix)
                    .filter_map(|n| levels.get(&n))
                    .min()
                    .map_or(0, |&parent| parent + 1);
                levels.insert(ix, level);
            }
        }
        levels
    }

    /// Levels following edge direction, shifted so the minimum is 0.
    fn direction_levels(&self) -> HashMap<NodeIndex, i32> {
        let mut levels: HashMap<NodeIndex, i32> = HashMap::with_capacity(self.index.len());
        for &root in self.index.values() {
            if levels.contains_key(&root) {
                continue;
            }
            levels.insert(root, 0);
            let mut queue = VecDeque::from([root]);
            while let Some(ix) = queue.pop_front() {
                let level = levels.get(&ix).copied().unwrap_or(0);
                let below = self
                    .directed
                    .edges_directed(ix, Direction::Outgoing)
                    .map(|edge| (edge.target(), level + 1));
                let above = self
                    .directed
                    .edges_directed(ix, Direction::Incoming)
                    .map(|edge| (edge.source(), level - 1));
                let next: Vec<(NodeIndex, i32)> = below.chain(above).collect();
                for (n, l) in next {
                    if !levels.contains_key(&n) {
                        levels.insert(n, l);
                        queue.push_back(n);
                    }
                }
            }
        }
        let min = levels.values().copied().min().unwrap_or(0);
        for level in levels.values_mut() {
            *level -= min;
        }
        levels
    }
}

// =============================================================================
// Placement
// =============================================================================

/// Slot spacing and first slot position of each level.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Distribution {
    spacing: f64,
    min_pos: f64,
}

fn distributions(counts: &BTreeMap<i32, usize>, node_spacing: f64) -> BTreeMap<i32, Distribution> {
    let max_count = counts.values().copied().max().unwrap_or(0) as f64;
    counts
        .iter()
        .map(|(&level, &count)| {
            let spacing = (max_count + 1.0) * node_spacing / (count as f64 + 1.0);
            let min_pos = spacing - 0.5 * (count as f64 + 1.0) * spacing;
            (level, Distribution { spacing, min_pos })
        })
        .collect()
}

/// Assign levels and place every active node of `store`.
///
/// Returns the level of each node. Fails without touching the store when
/// only some nodes carry a dataset level.
pub fn apply_hierarchical_layout(
    store: &mut GraphStore,
    options: &HierarchicalLayoutOptions,
) -> Result<BTreeMap<NodeId, i32>, LayoutError> {
    let assigned = store.nodes().filter(|node| node.user_level.is_some()).count();
    let unassigned = store.node_count() - assigned;
    if assigned > 0 && unassigned > 0 {
        return Err(LayoutError::MixedHierarchicalLevels {
            assigned,
            unassigned,
        });
    }

    let graph = LevelGraph::from_store(store);
    let levels: BTreeMap<NodeId, i32> = if unassigned == 0 {
        store
            .nodes()
            .filter_map(|node| node.user_level.map(|level| (node.id, level)))
            .collect()
    } else {
        let by_index = match options.layout {
            LevelMethod::Hubsize => graph.hubsize_levels(),
            LevelMethod::Direction => graph.direction_levels(),
        };
        by_index
            .into_iter()
            .filter_map(|(ix, level)| graph.id(ix).map(|id| (id, level)))
            .collect()
    };

    let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
    for &level in levels.values() {
        *counts.entry(level).or_default() += 1;
    }
    let distributions = distributions(&counts, options.node_spacing);

    // slot order: level by level, pulling deeper neighbours along
    let mut by_level: BTreeMap<i32, Vec<NodeId>> = BTreeMap::new();
    for (&id, &level) in &levels {
        by_level.entry(level).or_default().push(id);
    }
    let mut next_slot: BTreeMap<i32, usize> = BTreeMap::new();
    let mut positions: BTreeMap<NodeId, f64> = BTreeMap::new();
    let mut take_slot = |id: NodeId, level: i32, positions: &mut BTreeMap<NodeId, f64>| {
        let slot = next_slot.entry(level).or_default();
        let pos = distributions
            .get(&level)
            .map_or(0.0, |d| d.min_pos + *slot as f64 * d.spacing);
        *slot += 1;
        positions.insert(id, pos);
    };

    for ids in by_level.values() {
        for &id in ids {
            if positions.contains_key(&id) {
                continue;
            }
            let Some(&level) = levels.get(&id) else {
                continue;
            };
            take_slot(id, level, &mut positions);

            let mut queue = VecDeque::from([(id, level)]);
            while let Some((current, current_level)) = queue.pop_front() {
                let Some(&ix) = graph.index.get(&current) else {
                    continue;
                };
                let mut children: Vec<NodeId> = graph
                    .neighbours(ix)
                    .filter_map(|n| graph.id(n))
                    .collect();
                children.sort();
                children.dedup();
                for child in children {
                    let Some(&child_level) = levels.get(&child) else {
                        continue;
                    };
                    if child_level > current_level && !positions.contains_key(&child) {
                        take_slot(child, child_level, &mut positions);
                        queue.push_back((child, child_level));
                    }
                }
            }
        }
    }

    let sign = if options.direction.is_reversed() { -1.0 } else { 1.0 };
    let vertical = options.direction.is_vertical();
    for node in store.nodes_mut() {
        let (Some(&level), Some(&pos)) = (levels.get(&node.id), positions.get(&node.id)) else {
            continue;
        };
        let depth = sign * options.level_separation * level as f64;
        node.level = Some(level);
        node.body.clear_velocity();
        if vertical {
            node.body.x = pos;
            node.body.y = depth;
            node.body.x_fixed = false;
            node.body.y_fixed = true;
        } else {
            node.body.x = depth;
            node.body.y = pos;
            node.body.x_fixed = true;
            node.body.y_fixed = false;
        }
    }

    debug!(nodes = levels.len(), levels = counts.len(); "placed hierarchical levels");
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutDirection;
    use crate::graph::{Edge, EdgeId, Node};

    fn store(nodes: u32, edges: &[(u32, u32)]) -> GraphStore {
        let mut store = GraphStore::new();
        for i in 0..nodes {
            store.insert_node(Node::new(NodeId(i), 0.0, 0.0));
        }
        for (k, &(from, to)) in edges.iter().enumerate() {
            let edge = Edge::new(EdgeId(k as u32), NodeId(from), NodeId(to));
            store.node_mut(NodeId(from)).unwrap().dynamic_edges.push(edge.id);
            store.node_mut(NodeId(to)).unwrap().dynamic_edges.push(edge.id);
            store.insert_edge(edge);
        }
        store
    }

    fn with_levels(mut store: GraphStore, levels: &[i32]) -> GraphStore {
        for (i, &level) in levels.iter().enumerate() {
            let node = store.node_mut(NodeId(i as u32)).unwrap();
            node.level = Some(level);
            node.user_level = Some(level);
        }
        store
    }

    #[test]
    fn test_mixed_levels_rejected() {
        let mut store = store(3, &[(0, 1), (1, 2)]);
        store.node_mut(NodeId(0)).unwrap().user_level = Some(0);
        let before = store.clone();
        let result = apply_hierarchical_layout(&mut store, &HierarchicalLayoutOptions::default());
        assert_eq!(
            result,
            Err(LayoutError::MixedHierarchicalLevels {
                assigned: 1,
                unassigned: 2,
            })
        );
        assert_eq!(store, before);
    }

    #[test]
    fn test_user_levels_are_placed_and_pinned() {
        let mut store = with_levels(store(3, &[(0, 1), (0, 2)]), &[0, 1, 1]);
        apply_hierarchical_layout(&mut store, &HierarchicalLayoutOptions::default()).unwrap();

        let root = store.node(NodeId(0)).unwrap();
        assert_eq!((root.body.x, root.body.y), (0.0, 0.0));
        assert!(root.body.y_fixed && !root.body.x_fixed);

        let a = store.node(NodeId(1)).unwrap();
        let b = store.node(NodeId(2)).unwrap();
        assert_eq!((a.body.x, a.body.y), (-50.0, 150.0));
        assert_eq!((b.body.x, b.body.y), (50.0, 150.0));
    }

    #[test]
    fn test_hubsize_levels_from_highest_degree() {
        // star around 0 plus a separate pair
        let mut store = store(6, &[(0, 1), (0, 2), (3, 0), (4, 5)]);
        let levels = apply_hierarchical_layout(&mut store, &HierarchicalLayoutOptions::default()).unwrap();
        assert_eq!(levels[&NodeId(0)], 0);
        assert_eq!(levels[&NodeId(1)], 1);
        assert_eq!(levels[&NodeId(3)], 1);
        // both ends of the pair share the component's top degree
        assert_eq!(levels[&NodeId(4)], 0);
        assert_eq!(levels[&NodeId(5)], 0);
        assert_eq!(store.node(NodeId(2)).unwrap().level, Some(1));
    }

    #[test]
    fn test_hubsize_takes_shortest_distance() {
        // 0 is the hub; 3 ends the path 0-1-2-3 but also hangs off 0
        let mut store = store(5, &[(0, 1), (1, 2), (2, 3), (0, 3), (0, 4)]);
        let levels = apply_hierarchical_layout(&mut store, &HierarchicalLayoutOptions::default()).unwrap();
        assert_eq!(levels[&NodeId(0)], 0);
        assert_eq!(levels[&NodeId(3)], 1);
        assert_eq!(levels[&NodeId(4)], 1);
        assert_eq!(levels[&NodeId(2)], 2);
    }

    #[test]
    fn test_direction_levels_follow_edges() {
        // 2 -> 0 -> 1
        let mut store = store(3, &[(0, 1), (2, 0)]);
        let options = HierarchicalLayoutOptions {
            layout: LevelMethod::Direction,
            direction: LayoutDirection::DownUp,
            ..HierarchicalLayoutOptions::default()
        };
        let levels = apply_hierarchical_layout(&mut store, &options).unwrap();
        assert_eq!(levels[&NodeId(2)], 0);
        assert_eq!(levels[&NodeId(0)], 1);
        assert_eq!(levels[&NodeId(1)], 2);
        assert_eq!(store.node(NodeId(1)).unwrap().body.y, -300.0);
    }

    #[test]
    fn test_horizontal_direction_pins_x() {
        let mut store = with_levels(store(2, &[(0, 1)]), &[0, 1]);
        let options = HierarchicalLayoutOptions {
            direction: LayoutDirection::LeftRight,
            ..HierarchicalLayoutOptions::default()
        };
        apply_hierarchical_layout(&mut store, &options).unwrap();
        let child = store.node(NodeId(1)).unwrap();
        assert_eq!(child.body.x, 150.0);
        assert!(child.body.x_fixed && !child.body.y_fixed);
    }

    #[test]
    fn test_siblings_never_overlap() {
        // complete binary tree of 15 nodes
        let edges: Vec<(u32, u32)> = (1..15).map(|i| ((i - 1) / 2, i)).collect();
        let mut store = store(15, &edges);
        let options = HierarchicalLayoutOptions::default();
        let levels = apply_hierarchical_layout(&mut store, &options).unwrap();

        let mut by_level: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
        for node in store.nodes() {
            by_level.entry(levels[&node.id]).or_default().push(node.body.x);
        }
        for xs in by_level.values_mut() {
            xs.sort_by(f64::total_cmp);
            for pair in xs.windows(2) {
                assert!(pair[1] - pair[0] >= options.node_spacing - 1e-9);
            }
        }
    }

    #[test]
    fn test_subtrees_stay_together() {
        // two roots at level 0, each with two children at level 1
        let mut store = with_levels(store(6, &[(0, 2), (0, 3), (1, 4), (1, 5)]), &[0, 0, 1, 1, 1, 1]);
        apply_hierarchical_layout(&mut store, &HierarchicalLayoutOptions::default()).unwrap();
        let x = |i: u32| store.node(NodeId(i)).unwrap().body.x;
        assert!(x(2) < x(4) && x(3) < x(4));
        assert!(x(2) < x(5) && x(3) < x(5));
    }

    #[test]
    fn test_distribution_is_centered() {
        let counts = BTreeMap::from([(0, 1), (1, 3)]);
        let d = distributions(&counts, 100.0);
        assert_eq!(d[&0], Distribution { spacing: 200.0, min_pos: 0.0 });
        assert_eq!(d[&1], Distribution { spacing: 100.0, min_pos: -100.0 });
    }
}
