//! Sectors: drilling into a large cluster without disturbing the rest.
//!
//! Opening a big cluster freezes the current sector and starts a new one
//! holding only that cluster, which is then declustered in isolation. The
//! frozen sectors keep their nodes and edges untouched; edges leaving the new
//! sector stay owned by the frozen store they were created in and are reached
//! through a [`Scope`] when clustering needs to reroute them.
//!
//! Via-nodes of curved edges live in a support map keyed by edge id, shared
//! by every sector.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use log::info;

use crate::error::LayoutError;
use crate::graph::{Body, Edge, EdgeId, GraphStore, NodeId, Scope};
use crate::viewport::Viewport;

/// Sector identifier. The default sector is never frozen or collapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectorId(pub u32);

impl SectorId {
    pub const DEFAULT: SectorId = SectorId(0);
}

impl fmt::Display for SectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sector({})", self.0)
    }
}

/// One level of the sector stack.
#[derive(Debug, Clone, PartialEq)]
pub struct Sector {
    pub id: SectorId,
    pub store: GraphStore,
    /// Cluster the sector was opened from; `None` for the default sector.
    pub origin: Option<NodeId>,
}

impl Sector {
    fn new(id: SectorId, store: GraphStore, origin: Option<NodeId>) -> Self {
        Self { id, store, origin }
    }
}

/// The sector stack plus the shared via-node support map.
#[derive(Debug)]
pub struct SectorManager {
    /// Ids of the frozen sectors, bottom (default) first.
    stack: Vec<SectorId>,
    active: Sector,
    frozen: BTreeMap<SectorId, Sector>,
    support: BTreeMap<EdgeId, Body>,
    next_id: u32,
}

impl Default for SectorManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SectorManager {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            active: Sector::new(SectorId::DEFAULT, GraphStore::new(), None),
            frozen: BTreeMap::new(),
            support: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Drop every sector and via-node, leaving an empty default sector.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    #[inline]
    pub fn current(&self) -> &Sector {
        &self.active
    }

    #[inline]
    pub fn current_mut(&mut self) -> &mut Sector {
        &mut self.active
    }

    #[inline]
    pub fn store(&self) -> &GraphStore {
        &self.active.store
    }

    #[inline]
    pub fn store_mut(&mut self) -> &mut GraphStore {
        &mut self.active.store
    }

    #[inline]
    pub fn is_default(&self) -> bool {
        self.active.id == SectorId::DEFAULT
    }

    /// Number of frozen sectors below the active one.
    #[inline]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    // =========================================================================
    // Enter / Exit
    // =========================================================================

    /// Freeze the active sector and open a new one holding only `node_id`.
    pub fn enter(&mut self, node_id: NodeId) -> Result<SectorId, LayoutError> {
        let node = self
            .active
            .store
            .remove_node(node_id)
            .ok_or(LayoutError::UnknownNode(node_id))?;
        let mut store = GraphStore::new();
        store.insert_node(node);

        let id = SectorId(self.next_id);
        self.next_id += 1;
        let previous = std::mem::replace(&mut self.active, Sector::new(id, store, Some(node_id)));
        self.stack.push(previous.id);
        self.frozen.insert(previous.id, previous);

        info!(sector = id.0, origin = node_id.raw(), depth = self.depth(); "entered sector");
        Ok(id)
    }

    /// Merge the active sector back into the one below it and reactivate it.
    pub fn exit(&mut self) -> Result<SectorId, LayoutError> {
        if self.is_default() {
            return Err(LayoutError::DefaultSector);
        }
        let Some(parent) = self.stack.pop().and_then(|id| self.frozen.remove(&id)) else {
            return Err(LayoutError::DefaultSector);
        };
        let exited = std::mem::replace(&mut self.active, parent);
        self.active.store.merge(exited.store);

        info!(sector = exited.id.0, depth = self.depth(); "collapsed sector");
        Ok(exited.id)
    }

    /// The active store widened with every frozen store.
    pub fn scope_mut(&mut self) -> Scope<'_> {
        let frozen = self.frozen.values_mut().map(|sector| &mut sector.store).collect();
        Scope::with_frozen(&mut self.active.store, frozen)
    }

    /// Edges the force model simulates: every edge, wherever it is owned,
    /// whose endpoints are both active.
    pub fn simulated_edges(&self) -> Vec<&Edge> {
        let store = &self.active.store;
        store
            .edges()
            .chain(self.frozen.values().flat_map(|sector| sector.store.edges()))
            .filter(|edge| !edge.is_self_loop() && store.is_connected(edge))
            .collect()
    }

    /// Look an edge up in any sector.
    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.active
            .store
            .edge(id)
            .or_else(|| self.frozen.values().find_map(|sector| sector.store.edge(id)))
    }

    /// Look a node up in any sector, active or absorbed.
    pub fn find_node(&self, id: NodeId) -> Option<&crate::graph::Node> {
        self.active
            .store
            .find_node(id)
            .or_else(|| self.frozen.values().find_map(|sector| sector.store.find_node(id)))
    }

    /// Every store, active first.
    pub fn stores(&self) -> impl Iterator<Item = &GraphStore> {
        std::iter::once(&self.active.store).chain(self.frozen.values().map(|sector| &sector.store))
    }

    /// Mutable access to every store, active first.
    pub fn stores_mut(&mut self) -> impl Iterator<Item = &mut GraphStore> {
        std::iter::once(&mut self.active.store)
            .chain(self.frozen.values_mut().map(|sector| &mut sector.store))
    }

    /// True when the active sector should fold back into its parent.
    ///
    /// Only a sector entered from a cluster collapses: when one node is left,
    /// or its nodes' extent on screen has shrunk below `fraction` of the
    /// canvas.
    pub fn should_collapse(&self, viewport: &Viewport, fraction: f64) -> bool {
        if self.is_default() {
            return false;
        }
        if self.active.store.node_count() <= 1 {
            return true;
        }
        match self.active.store.bounds() {
            Some((min_x, min_y, max_x, max_y)) => {
                !viewport.covers(max_x - min_x, max_y - min_y, fraction)
            }
            None => true,
        }
    }

    // =========================================================================
    // Support Sector
    // =========================================================================

    #[inline]
    pub fn support(&self) -> &BTreeMap<EdgeId, Body> {
        &self.support
    }

    /// Split borrow of the active store and the via-nodes, for writing back
    /// a simulated step.
    pub fn parts_mut(&mut self) -> (&mut GraphStore, &mut BTreeMap<EdgeId, Body>) {
        (&mut self.active.store, &mut self.support)
    }

    /// Bring the via-nodes in line with the simulated edges.
    ///
    /// Missing via-nodes are created at their edge's midpoint, and so are
    /// re-placed the ones whose edge touches a node in `moved`. Via-nodes of
    /// edges that are not simulated keep their position but lose their
    /// motion. With `enabled` false every via-node is dropped.
    pub fn sync_support(&mut self, enabled: bool, moved: &[NodeId]) {
        if !enabled {
            self.support.clear();
            return;
        }
        let moved: BTreeSet<NodeId> = moved.iter().copied().collect();
        let store = &self.active.store;
        let mut live = BTreeSet::new();
        let mut placements = Vec::new();
        for edge in self.simulated_edges() {
            live.insert(edge.id);
            let stale = !self.support.contains_key(&edge.id)
                || moved.contains(&edge.from_id)
                || moved.contains(&edge.to_id);
            if !stale {
                continue;
            }
            if let (Some(from), Some(to)) = (store.node(edge.from_id), store.node(edge.to_id)) {
                let x = 0.5 * (from.body.x + to.body.x);
                let y = 0.5 * (from.body.y + to.body.y);
                placements.push((edge.id, Body::at(x, y)));
            }
        }

        for (id, body) in placements {
            self.support.insert(id, body);
        }
        for (id, body) in self.support.iter_mut() {
            if !live.contains(id) {
                body.fx = 0.0;
                body.fy = 0.0;
                body.clear_velocity();
            }
        }
    }

    /// Forget the via-node of a deleted edge.
    pub fn drop_support(&mut self, id: EdgeId) {
        self.support.remove(&id);
    }
}
