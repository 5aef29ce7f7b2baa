//! GraphEngine - the layout engine the host drives.
//!
//! The engine owns the sector stack (and through it every node and edge), the
//! force model, the viewport and the frame clock. Data mutations are
//! validated as a batch before anything is inserted. Clustering operations
//! borrow the active sector through a short-lived [`Coarsener`].

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet};
use std::f64::consts::PI;

use log::{debug, info, trace, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use super::data::{EdgeData, NodeData};
use super::edge::{Edge, EdgeId};
use super::node::NodeId;
use super::store::GraphStore;
use crate::clock::{FrameReport, SimulationClock, TimeSource};
use crate::cluster::Coarsener;
use crate::config::NetworkOptions;
use crate::error::LayoutError;
use crate::layout::apply_hierarchical_layout;
use crate::physics::{ForceModel, Integrator};
use crate::sector::SectorManager;
use crate::spatial::{NodeBox, SpatialIndex};
use crate::viewport::{Viewport, ZoomDirection};

/// Sector opening declusters at most this many levels.
const MAX_SECTOR_OPEN_LEVELS: usize = 10;

/// Position and size of one active node, as handed to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeLayout {
    pub id: u32,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub width: f64,
    pub height: f64,
    pub font_size: f64,
    pub cluster_size: usize,
}

/// The layout engine.
///
/// This struct manages:
/// - Nodes and edges, per sector, through [`SectorManager`]
/// - The force model and integrator for the active sector
/// - Clustering sessions and the zoom-driven coarsening state
/// - Viewport and frame pacing
/// - Spatial index for hit testing
pub struct GraphEngine {
    options: NetworkOptions,
    model: ForceModel,
    integrator: Integrator,
    sectors: SectorManager,
    viewport: Viewport,
    /// Scale at the last cluster update, for zoom direction detection.
    previous_scale: f64,
    /// Global clustering session counter.
    session: u32,
    rng: StdRng,
    moving: bool,
    clock: SimulationClock,

    /// Edges waiting for an endpoint that does not exist yet.
    pending_edges: BTreeMap<EdgeId, Edge>,

    /// Pin state of dragged nodes, restored when the drag ends.
    dragged: Vec<(NodeId, bool, bool)>,

    /// Spatial index for hit testing
    spatial: RefCell<SpatialIndex>,

    /// Whether the spatial index needs rebuilding
    spatial_dirty: Cell<bool>,
}

impl GraphEngine {
    /// Create an empty engine with the given options.
    pub fn new(options: NetworkOptions) -> Result<Self, LayoutError> {
        options.validate()?;
        Ok(Self::build(options))
    }

    fn build(options: NetworkOptions) -> Self {
        Self {
            model: ForceModel::from_options(&options),
            integrator: integrator_for(&options),
            clock: SimulationClock::new(&options),
            rng: StdRng::seed_from_u64(options.random_seed),
            options,
            sectors: SectorManager::new(),
            viewport: Viewport::default(),
            previous_scale: 1.0,
            session: 0,
            moving: false,
            pending_edges: BTreeMap::new(),
            dragged: Vec::new(),
            spatial: RefCell::new(SpatialIndex::new()),
            spatial_dirty: Cell::new(false),
        }
    }

    #[inline]
    pub fn options(&self) -> &NetworkOptions {
        &self.options
    }

    #[inline]
    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    #[inline]
    pub fn sectors(&self) -> &SectorManager {
        &self.sectors
    }

    /// True while the simulation has not settled.
    #[inline]
    pub fn is_moving(&self) -> bool {
        self.moving
    }

    /// Number of active nodes in the active sector.
    pub fn node_count(&self) -> usize {
        self.sectors.store().node_count()
    }

    /// Number of live edges in the active sector.
    pub fn edge_count(&self) -> usize {
        self.sectors.store().edge_count()
    }

    /// Number of edges waiting for a missing endpoint.
    pub fn pending_edge_count(&self) -> usize {
        self.pending_edges.len()
    }

    // =========================================================================
    // Data Loading
    // =========================================================================

    /// Replace the whole network.
    ///
    /// On error the previous network is left as it was.
    pub fn set_data(&mut self, nodes: Vec<NodeData>, edges: Vec<EdgeData>) -> Result<(), LayoutError> {
        let mut store = GraphStore::new();
        for data in nodes {
            let node = data.into_node(&self.options.clustering)?;
            if store.contains_node(node.id) {
                return Err(LayoutError::DuplicateNode(node.id));
            }
            store.insert_node(node);
        }

        let mut pending = BTreeMap::new();
        let mut seen = HashSet::new();
        for data in edges {
            let edge = data.into_edge()?;
            if !seen.insert(edge.id) {
                return Err(LayoutError::DuplicateEdge(edge.id));
            }
            if store.contains_node(edge.from_id) && store.contains_node(edge.to_id) {
                attach(&mut store, edge);
            } else {
                pending.insert(edge.id, edge);
            }
        }

        let ids = store.node_ids();
        scatter(&mut store, &ids, &mut self.rng);
        if self.options.hierarchical_layout.enabled {
            apply_hierarchical_layout(&mut store, &self.options.hierarchical_layout)?;
        }

        self.sectors.reset();
        *self.sectors.store_mut() = store;
        self.pending_edges = pending;
        self.session = 0;
        self.dragged.clear();
        self.previous_scale = self.viewport.scale;
        info!(
            nodes = self.node_count(),
            edges = self.edge_count(),
            pending = self.pending_edges.len();
            "loaded network"
        );

        let initial_max = self.options.clustering.initial_max_nodes;
        if self.options.clustering_enabled() && self.node_count() > initial_max {
            self.with_coarsener(|c| c.cluster_to_fit(initial_max, true))?;
        }
        self.touch(&[]);

        if self.options.stabilize {
            self.stabilize()?;
        }
        Ok(())
    }

    // =========================================================================
    // Node Operations
    // =========================================================================

    /// Insert new nodes into the active sector.
    ///
    /// Pending edges whose endpoints now all exist are connected.
    pub fn add_nodes(&mut self, nodes: Vec<NodeData>) -> Result<(), LayoutError> {
        let mut built = Vec::with_capacity(nodes.len());
        let mut seen = HashSet::new();
        for data in nodes {
            let node = data.into_node(&self.options.clustering)?;
            if !seen.insert(node.id) || self.sectors.find_node(node.id).is_some() {
                return Err(LayoutError::DuplicateNode(node.id));
            }
            built.push(node);
        }

        let ids: Vec<NodeId> = built.iter().map(|node| node.id).collect();
        for node in built {
            self.sectors.store_mut().insert_node(node);
        }
        scatter(self.sectors.store_mut(), &ids, &mut self.rng);
        self.connect_pending()?;
        if self.options.hierarchical_layout.enabled {
            self.relayout()?;
        }
        debug!(count = ids.len(); "added nodes");
        self.touch(&ids);
        Ok(())
    }

    /// Overwrite the fields each item carries on existing nodes, wherever
    /// they live.
    pub fn update_nodes(&mut self, nodes: Vec<NodeData>) -> Result<(), LayoutError> {
        for data in &nodes {
            let id = data.validate()?;
            if self.sectors.find_node(id).is_none() {
                return Err(LayoutError::UnknownNode(id));
            }
        }

        let mut moved = Vec::new();
        let mut relevel = false;
        let clustering = &self.options.clustering;
        for data in &nodes {
            let id = data.validate()?;
            for store in self.sectors.stores_mut() {
                let Some(path) = store.path_to(id) else {
                    continue;
                };
                let Some(node) = store.find_node_mut(id) else {
                    continue;
                };
                let mass = node.body.mass;
                data.apply_to(node, clustering);
                let delta = node.body.mass - mass;
                if delta != 0.0 {
                    for ancestor in path {
                        if let Some(cluster) = store.find_node_mut(ancestor) {
                            cluster.body.mass += delta;
                        }
                    }
                }
                break;
            }
            if data.x.is_some() || data.y.is_some() {
                moved.push(id);
            }
            relevel |= data.level.is_some();
        }

        if relevel && self.options.hierarchical_layout.enabled {
            self.relayout()?;
        }
        self.touch(&moved);
        Ok(())
    }

    /// Delete nodes and every edge attached to them.
    ///
    /// An absorbed node is revealed first. A removed cluster releases its
    /// children before it goes, so only the named node disappears.
    pub fn remove_nodes(&mut self, ids: &[u32]) -> Result<(), LayoutError> {
        for &raw in ids {
            let id = NodeId(raw);
            if self.sectors.find_node(id).is_none() {
                return Err(LayoutError::UnknownNode(id));
            }
        }

        for &raw in ids {
            let id = NodeId(raw);
            if self.sectors.find_node(id).is_none() {
                continue;
            }
            self.ensure_live(id)?;
            self.with_coarsener(|c| c.expand_cluster_node(id, true, true, true))?;

            let attached = self
                .sectors
                .store()
                .node(id)
                .map(|node| node.dynamic_edges.clone())
                .unwrap_or_default();
            for edge_id in attached {
                self.detach_edge(edge_id);
            }
            self.sectors.store_mut().remove_node(id);
        }
        debug!(count = ids.len(); "removed nodes");
        self.touch(&[]);
        Ok(())
    }

    /// Set the size the renderer measured for a node.
    pub fn set_node_size(&mut self, raw: u32, radius: f64, width: f64, height: f64) -> Result<(), LayoutError> {
        for (field, value) in [("radius", radius), ("width", width), ("height", height)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(LayoutError::InvalidNumber { id: raw, field });
            }
        }
        let id = NodeId(raw);
        let clustering = &self.options.clustering;
        let node = self
            .sectors
            .stores_mut()
            .find_map(|store| store.find_node_mut(id))
            .ok_or(LayoutError::UnknownNode(id))?;
        node.set_base_size(radius, width, height, clustering);
        self.spatial_dirty.set(true);
        Ok(())
    }

    /// Positions and sizes of every active node.
    pub fn node_layouts(&self) -> Vec<NodeLayout> {
        self.sectors
            .store()
            .nodes()
            .map(|node| NodeLayout {
                id: node.id.raw(),
                x: node.body.x,
                y: node.body.y,
                radius: node.radius,
                width: node.width,
                height: node.height,
                font_size: node.font_size,
                cluster_size: node.cluster_size,
            })
            .collect()
    }

    /// Ids of the clusters enclosing a node, outermost first. Empty for an
    /// active node.
    pub fn cluster_membership(&self, raw: u32) -> Result<Vec<u32>, LayoutError> {
        let id = NodeId(raw);
        self.sectors
            .stores()
            .find_map(|store| store.path_to(id))
            .map(|path| path.into_iter().map(NodeId::raw).collect())
            .ok_or(LayoutError::UnknownNode(id))
    }

    // =========================================================================
    // Edge Operations
    // =========================================================================

    /// Insert new edges. An edge with a missing endpoint waits until the
    /// endpoint is added.
    pub fn add_edges(&mut self, edges: Vec<EdgeData>) -> Result<(), LayoutError> {
        let mut built = Vec::with_capacity(edges.len());
        let mut seen = HashSet::new();
        for data in edges {
            let edge = data.into_edge()?;
            if !seen.insert(edge.id) || self.edge_exists(edge.id) {
                return Err(LayoutError::DuplicateEdge(edge.id));
            }
            built.push(edge);
        }
        let count = built.len();
        for edge in built {
            self.insert_edge(edge)?;
        }
        debug!(count = count; "added edges");
        self.touch(&[]);
        Ok(())
    }

    /// Overwrite the fields each item carries. Changing an endpoint detaches
    /// the edge and inserts it again.
    pub fn update_edges(&mut self, edges: Vec<EdgeData>) -> Result<(), LayoutError> {
        for data in &edges {
            let id = data.validate_update()?;
            if !self.edge_exists(id) {
                return Err(LayoutError::UnknownEdge(id));
            }
        }

        for data in &edges {
            let id = data.validate_update()?;
            let moves = self.find_edge(id).is_some_and(|edge| data.changes_endpoints(edge));
            if moves {
                let Some(old) = self.detach_edge(id) else {
                    continue;
                };
                let (from, to) = old.original_endpoints();
                let mut edge = Edge::new(
                    id,
                    data.from.map(NodeId).unwrap_or(from),
                    data.to.map(NodeId).unwrap_or(to),
                );
                edge.length = old.length;
                edge.attributes = old.attributes;
                data.apply_to(&mut edge);
                self.insert_edge(edge)?;
            } else if let Some(edge) = self.pending_edges.get_mut(&id) {
                data.apply_to(edge);
            } else if let Some(edge) = self.sectors.scope_mut().any_edge_mut(id) {
                data.apply_to(edge);
            }
        }
        self.touch(&[]);
        Ok(())
    }

    /// Delete edges, live, folded into a cluster, or pending.
    pub fn remove_edges(&mut self, ids: &[u32]) -> Result<(), LayoutError> {
        for &raw in ids {
            let id = EdgeId(raw);
            if !self.edge_exists(id) {
                return Err(LayoutError::UnknownEdge(id));
            }
        }
        for &raw in ids {
            self.detach_edge(EdgeId(raw));
        }
        self.touch(&[]);
        Ok(())
    }

    fn edge_exists(&self, id: EdgeId) -> bool {
        self.find_edge(id).is_some()
    }

    fn find_edge(&self, id: EdgeId) -> Option<&Edge> {
        self.pending_edges
            .get(&id)
            .or_else(|| self.sectors.edge(id))
            .or_else(|| self.sectors.stores().find_map(|store| store.find_contained_edge(id)))
    }

    /// Attach an edge to the active sector, revealing its endpoints first.
    fn insert_edge(&mut self, edge: Edge) -> Result<(), LayoutError> {
        let known = self.sectors.find_node(edge.from_id).is_some()
            && self.sectors.find_node(edge.to_id).is_some();
        if !known {
            self.pending_edges.insert(edge.id, edge);
            return Ok(());
        }
        self.ensure_live(edge.from_id)?;
        self.ensure_live(edge.to_id)?;
        attach(self.sectors.store_mut(), edge);
        Ok(())
    }

    /// Remove an edge from wherever it is held and from every node list
    /// naming it.
    fn detach_edge(&mut self, id: EdgeId) -> Option<Edge> {
        if let Some(edge) = self.pending_edges.remove(&id) {
            return Some(edge);
        }
        let edge = {
            let mut scope = self.sectors.scope_mut();
            let edge = scope.take_edge(id).or_else(|| scope.take_contained_edge(id))?;
            scope.scrub_edge(&edge);
            edge
        };
        self.sectors.drop_support(id);
        Some(edge)
    }

    fn connect_pending(&mut self) -> Result<(), LayoutError> {
        let ready: Vec<EdgeId> = self
            .pending_edges
            .values()
            .filter(|edge| {
                self.sectors.find_node(edge.from_id).is_some()
                    && self.sectors.find_node(edge.to_id).is_some()
            })
            .map(|edge| edge.id)
            .collect();
        for id in ready {
            if let Some(edge) = self.pending_edges.remove(&id) {
                self.insert_edge(edge)?;
            }
        }
        Ok(())
    }

    /// Make a node active in the active sector: fold nested sectors back
    /// when it lives in a frozen one, then open the clusters around it.
    fn ensure_live(&mut self, id: NodeId) -> Result<(), LayoutError> {
        if self.sectors.store().contains_node(id) {
            return Ok(());
        }
        if self.sectors.store().find_node(id).is_none() {
            if self.sectors.find_node(id).is_none() {
                return Err(LayoutError::UnknownNode(id));
            }
            while !self.sectors.is_default() {
                self.sectors.exit()?;
            }
        }
        self.with_coarsener(|c| c.reveal(id))
    }

    // =========================================================================
    // Simulation
    // =========================================================================

    /// Run one physics tick over the active sector. Returns whether the
    /// system is still moving.
    pub fn tick(&mut self) -> Result<bool, LayoutError> {
        let threshold = self.options.clustering.cluster_threshold;
        if self.options.clustering_enabled() && self.node_count() > threshold {
            let target = self.options.clustering.reduce_to_nodes;
            self.with_coarsener(|c| c.cluster_to_fit(target, false))?;
        }

        let mut system = self.model.gather(
            self.sectors.store(),
            self.sectors.simulated_edges(),
            self.sectors.support(),
        );
        let gravity = self.sectors.is_default();
        self.model.compute_forces(&mut system, gravity, &mut self.rng);
        self.integrator.step(&mut system.particles);
        self.moving = self.integrator.is_moving(&system.particles, self.viewport.scale);

        let (store, vias) = self.sectors.parts_mut();
        system.scatter(store, vias);
        self.spatial_dirty.set(true);
        trace!(particles = system.particles.len(), moving = self.moving; "physics tick");
        Ok(self.moving)
    }

    /// Tick synchronously until the system settles or
    /// `stabilizationIterations` is reached. Returns the ticks run.
    pub fn stabilize(&mut self) -> Result<usize, LayoutError> {
        if self.sectors.store().is_empty() {
            self.moving = false;
            return Ok(0);
        }

        let mut frozen = Vec::new();
        if self.options.freeze_for_stabilization {
            for node in self.sectors.store_mut().nodes_mut() {
                if node.user_positioned {
                    frozen.push((node.id, node.body.x_fixed, node.body.y_fixed));
                    node.body.x_fixed = true;
                    node.body.y_fixed = true;
                }
            }
        }

        self.moving = true;
        let mut count = 0;
        let mut outcome = Ok(());
        while self.moving && count < self.options.stabilization_iterations {
            if let Err(err) = self.tick() {
                outcome = Err(err);
                break;
            }
            count += 1;
        }
        self.restore_pins(&frozen);
        outcome?;

        if self.options.zoom_extent_on_stabilize {
            self.zoom_extent();
        }
        info!(iterations = count, nodes = self.node_count(), moving = self.moving; "stabilized");
        Ok(count)
    }

    /// Run one animation frame: apply navigation, then as many ticks as the
    /// frame budget allows.
    pub fn animation_step<S: TimeSource + ?Sized>(&mut self, time: &S) -> Result<FrameReport, LayoutError> {
        self.apply_navigation()?;
        let clock = self.clock;
        let ticks = if self.moving {
            clock.run_frame(time, || self.tick())?
        } else {
            0
        };
        Ok(self.clock.finish_frame(ticks, self.moving))
    }

    /// Render time the host measured for the last frame.
    pub fn report_render_time(&mut self, ms: f64) {
        self.clock.report_render_time(ms);
    }

    /// Per-frame pan and zoom applied by [`GraphEngine::animation_step`].
    pub fn set_navigation(&mut self, x_increment: f64, y_increment: f64, zoom_increment: f64) {
        self.clock.x_increment = x_increment;
        self.clock.y_increment = y_increment;
        self.clock.zoom_increment = zoom_increment;
    }

    fn apply_navigation(&mut self) -> Result<(), LayoutError> {
        let clock = self.clock;
        if clock.x_increment != 0.0 || clock.y_increment != 0.0 {
            self.pan(clock.x_increment, clock.y_increment);
        }
        if clock.zoom_increment != 0.0 {
            let center_x = 0.5 * self.viewport.canvas_width;
            let center_y = 0.5 * self.viewport.canvas_height;
            let scale = self.viewport.scale * (1.0 + clock.zoom_increment);
            self.zoom(scale, center_x, center_y)?;
        }
        Ok(())
    }

    /// Replace the options. Invalid options are rejected and change nothing.
    pub fn set_options(&mut self, options: NetworkOptions) -> Result<(), LayoutError> {
        if let Err(err) = options.validate() {
            warn!(error = err.to_string(); "rejected options");
            return Err(err);
        }
        let layout_changed = options.hierarchical_layout != self.options.hierarchical_layout;
        let clustering_dropped = self.options.clustering_enabled() && !options.clustering_enabled();

        self.model = ForceModel::from_options(&options);
        self.integrator = integrator_for(&options);
        self.clock.configure(&options);
        self.options = options;

        if clustering_dropped {
            self.open_all_clusters()?;
        }
        if layout_changed && self.options.hierarchical_layout.enabled {
            self.relayout()?;
            self.touch(&[]);
            self.stabilize()?;
        } else {
            self.touch(&[]);
        }
        Ok(())
    }

    fn relayout(&mut self) -> Result<(), LayoutError> {
        apply_hierarchical_layout(self.sectors.store_mut(), &self.options.hierarchical_layout)?;
        Ok(())
    }

    // =========================================================================
    // Drag
    // =========================================================================

    /// Pin the given nodes for dragging, remembering their pin state.
    pub fn start_drag(&mut self, ids: &[u32]) -> Result<(), LayoutError> {
        for &raw in ids {
            if !self.sectors.store().contains_node(NodeId(raw)) {
                return Err(LayoutError::UnknownNode(NodeId(raw)));
            }
        }
        self.end_drag();
        for &raw in ids {
            if let Some(node) = self.sectors.store_mut().node_mut(NodeId(raw)) {
                self.dragged.push((node.id, node.body.x_fixed, node.body.y_fixed));
                node.body.x_fixed = true;
                node.body.y_fixed = true;
                node.body.clear_velocity();
            }
        }
        self.moving = true;
        Ok(())
    }

    /// Move a node to a canvas point.
    pub fn drag_to(&mut self, raw: u32, canvas_x: f64, canvas_y: f64) -> Result<(), LayoutError> {
        let id = NodeId(raw);
        let (x, y) = self.viewport.canvas_to_world(canvas_x, canvas_y);
        let node = self
            .sectors
            .store_mut()
            .node_mut(id)
            .ok_or(LayoutError::UnknownNode(id))?;
        node.body.x = x;
        node.body.y = y;
        node.body.clear_velocity();
        self.touch(&[id]);
        Ok(())
    }

    /// Release dragged nodes, restoring their pin state.
    pub fn end_drag(&mut self) {
        let dragged = std::mem::take(&mut self.dragged);
        if !dragged.is_empty() {
            self.restore_pins(&dragged);
            self.moving = true;
        }
    }

    fn restore_pins(&mut self, pins: &[(NodeId, bool, bool)]) {
        for &(id, x_fixed, y_fixed) in pins {
            if let Some(node) = self.sectors.store_mut().node_mut(id) {
                node.body.x_fixed = x_fixed;
                node.body.y_fixed = y_fixed;
            }
        }
    }

    // =========================================================================
    // Viewport
    // =========================================================================

    pub fn set_canvas_size(&mut self, width: f64, height: f64) {
        self.viewport.set_canvas_size(width, height);
    }

    /// Zoom around a canvas point, then let clustering follow the new scale.
    /// Returns the clamped scale.
    pub fn zoom(&mut self, scale: f64, pointer_x: f64, pointer_y: f64) -> Result<f64, LayoutError> {
        let scale = self.viewport.zoom(scale, (pointer_x, pointer_y));
        if self.options.clustering_enabled() {
            self.update_clusters(ZoomDirection::Detect, false, false)?;
        }
        self.moving = true;
        Ok(scale)
    }

    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.viewport.pan(dx, dy);
    }

    /// Fit the active sector into the canvas.
    pub fn zoom_extent(&mut self) {
        if let Some(bounds) = self.sectors.store().bounds() {
            self.viewport.fit(bounds);
            self.previous_scale = self.viewport.scale;
        }
    }

    // =========================================================================
    // Clustering
    // =========================================================================

    /// React to a zoom step.
    ///
    /// Zooming out collapses a sector that has shrunk on screen and then
    /// forms clusters; zooming in opens clusters that are big enough on
    /// screen, large ones into a sector of their own.
    pub fn update_clusters(
        &mut self,
        direction: ZoomDirection,
        recursive: bool,
        force: bool,
    ) -> Result<(), LayoutError> {
        let scale = self.viewport.scale;
        let direction = match direction {
            ZoomDirection::Detect if scale < self.previous_scale => ZoomDirection::Out,
            ZoomDirection::Detect if scale > self.previous_scale => ZoomDirection::In,
            other => other,
        };
        let before = self.node_count();
        match direction {
            ZoomDirection::Out => {
                let fraction = self.options.clustering.screen_size_threshold;
                if self.sectors.should_collapse(&self.viewport, fraction) {
                    self.collapse_sector()?;
                }
                self.with_coarsener(|c| c.zoom_out(force))?;
            }
            ZoomDirection::In if force => {
                self.with_coarsener(|c| c.open_clusters(recursive, true))?;
            }
            ZoomDirection::In => self.open_clusters_in_view(recursive)?,
            ZoomDirection::Detect => {}
        }
        self.previous_scale = scale;
        debug!(from = before, to = self.node_count(), scale = scale; "updated clusters");
        Ok(())
    }

    /// Open one cluster: into a new sector when it is large and under the
    /// pointer, otherwise in place.
    pub fn open_cluster(&mut self, raw: u32) -> Result<(), LayoutError> {
        let id = NodeId(raw);
        let node = self.sectors.store().node(id).ok_or(LayoutError::UnknownNode(id))?;
        if !node.is_cluster() {
            return Err(LayoutError::NotClustered(id));
        }
        if self.opens_into_sector(id) {
            self.open_in_sector(id)
        } else {
            self.with_coarsener(|c| c.expand_cluster_node(id, false, true, false))
        }
    }

    /// Fold every sector back and open every cluster completely.
    pub fn open_all_clusters(&mut self) -> Result<(), LayoutError> {
        while !self.sectors.is_default() {
            self.sectors.exit()?;
        }
        self.with_coarsener(|c| c.open_all())?;
        self.touch(&[]);
        Ok(())
    }

    pub fn increase_cluster_level(&mut self) -> Result<(), LayoutError> {
        self.with_coarsener(|c| c.increase_cluster_level())
    }

    pub fn decrease_cluster_level(&mut self) -> Result<(), LayoutError> {
        self.with_coarsener(|c| c.decrease_cluster_level())
    }

    pub fn force_aggregate_hubs(&mut self) -> Result<(), LayoutError> {
        self.with_coarsener(|c| c.force_aggregate_hubs())
    }

    /// Coarsen the active sector down to at most `max_nodes` nodes.
    pub fn cluster_to_fit(&mut self, max_nodes: usize, reposition: bool) -> Result<(), LayoutError> {
        self.with_coarsener(|c| c.cluster_to_fit(max_nodes, reposition))
    }

    fn opens_into_sector(&self, id: NodeId) -> bool {
        let Some(node) = self.sectors.store().node(id) else {
            return false;
        };
        let clustering = &self.options.clustering;
        node.cluster_size > clustering.sector_threshold
            && self
                .viewport
                .in_active_area(node.body.x, node.body.y, clustering.active_area_box_size)
            && !(self.sectors.is_default() && self.node_count() == 1)
    }

    fn open_in_sector(&mut self, id: NodeId) -> Result<(), LayoutError> {
        self.sectors.enter(id)?;
        let wanted = self.options.clustering.initial_max_nodes;
        for _ in 0..MAX_SECTOR_OPEN_LEVELS {
            let before = self.node_count();
            if before >= wanted {
                break;
            }
            self.with_coarsener(|c| c.decrease_cluster_level())?;
            if self.node_count() == before {
                break;
            }
        }
        self.touch(&[]);
        Ok(())
    }

    fn open_clusters_in_view(&mut self, recursive: bool) -> Result<(), LayoutError> {
        let clustering = &self.options.clustering;
        let view = &self.viewport;
        let ready: Vec<NodeId> = self
            .sectors
            .store()
            .nodes()
            .filter(|node| {
                node.is_cluster()
                    && node.formation_scale < view.scale
                    && view.covers(node.width, node.height, clustering.screen_size_threshold)
                    && view.in_active_area(node.body.x, node.body.y, clustering.active_area_box_size)
            })
            .map(|node| node.id)
            .collect();

        for id in ready {
            if self.opens_into_sector(id) {
                // the sector now holds only this cluster
                return self.open_in_sector(id);
            }
            self.with_coarsener(|c| c.expand_cluster_node(id, recursive, false, false))?;
        }
        Ok(())
    }

    /// Reduce the active sector to one cluster and merge it into its parent.
    fn collapse_sector(&mut self) -> Result<(), LayoutError> {
        self.with_coarsener(|c| c.cluster_to_fit(1, false))?;
        let exited = self.sectors.exit()?;
        info!(sector = exited.to_string(); "collapsed sector");
        self.touch(&[]);
        Ok(())
    }

    /// Run a clustering operation over the active sector and pick up its
    /// side effects.
    fn with_coarsener<T>(
        &mut self,
        f: impl FnOnce(&mut Coarsener<'_>) -> Result<T, LayoutError>,
    ) -> Result<T, LayoutError> {
        let mut coarsener = Coarsener::new(
            self.sectors.scope_mut(),
            &self.options.clustering,
            &self.viewport,
            &mut self.rng,
            self.session,
        );
        let result = f(&mut coarsener);
        let session = coarsener.session;
        let changed = coarsener.changed;
        let released = std::mem::take(&mut coarsener.released);
        drop(coarsener);

        self.session = session;
        if changed {
            self.touch(&released);
        }
        result
    }

    // =========================================================================
    // Spatial Queries
    // =========================================================================

    /// Active node under a canvas point.
    pub fn node_at(&self, canvas_x: f64, canvas_y: f64) -> Option<u32> {
        let (x, y) = self.viewport.canvas_to_world(canvas_x, canvas_y);
        self.ensure_spatial_index();
        self.spatial.borrow().at_point(x, y).map(NodeId::raw)
    }

    /// Active nodes whose box intersects the visible part of the world.
    pub fn nodes_in_view(&self) -> Vec<u32> {
        let (min_x, min_y, max_x, max_y) = self.viewport.visible_rect();
        self.ensure_spatial_index();
        self.spatial
            .borrow()
            .in_rect(min_x, min_y, max_x, max_y)
            .into_iter()
            .map(NodeId::raw)
            .collect()
    }

    fn ensure_spatial_index(&self) {
        if !self.spatial_dirty.get() {
            return;
        }
        let boxes = self
            .sectors
            .store()
            .nodes()
            .map(|node| NodeBox::centered(node.id, node.body.x, node.body.y, node.width, node.height))
            .collect();
        self.spatial.borrow_mut().rebuild(boxes);
        self.spatial_dirty.set(false);
    }

    /// Re-arm the simulation after a mutation and bring via-nodes in line.
    fn touch(&mut self, moved: &[NodeId]) {
        let curves = self.options.dynamic_curves();
        self.sectors.sync_support(curves, moved);
        self.moving = true;
        self.spatial_dirty.set(true);
    }
}

fn integrator_for(options: &NetworkOptions) -> Integrator {
    Integrator {
        damping: options.active_physics().damping,
        max_velocity: options.max_velocity,
        min_velocity: options.min_velocity,
    }
}

/// Insert an edge and list it on its endpoints.
fn attach(store: &mut GraphStore, edge: Edge) {
    if let Some(node) = store.node_mut(edge.from_id) {
        node.dynamic_edges.push(edge.id);
    }
    if !edge.is_self_loop() {
        if let Some(node) = store.node_mut(edge.to_id) {
            node.dynamic_edges.push(edge.id);
        }
    }
    store.insert_edge(edge);
}

/// Place nodes without dataset coordinates on a random circle sized by the
/// node count. Pinned axes keep their value.
fn scatter(store: &mut GraphStore, ids: &[NodeId], rng: &mut StdRng) {
    let radius = store.node_count() as f64 + 10.0;
    for &id in ids {
        let Some(node) = store.node_mut(id) else {
            continue;
        };
        if node.user_positioned {
            continue;
        }
        let angle = 2.0 * PI * rng.random::<f64>();
        if !node.body.x_fixed {
            node.body.x = radius * angle.cos();
        }
        if !node.body.y_fixed {
            node.body.y = radius * angle.sin();
        }
    }
}

impl Default for GraphEngine {
    fn default() -> Self {
        Self::build(NetworkOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    fn node(id: u32, x: f64, y: f64) -> NodeData {
        NodeData {
            id: Some(id),
            x: Some(x),
            y: Some(y),
            ..Default::default()
        }
    }

    fn edge(id: u32, from: u32, to: u32) -> EdgeData {
        EdgeData {
            id: Some(id),
            from: Some(from),
            to: Some(to),
            ..Default::default()
        }
    }

    fn quiet_options() -> NetworkOptions {
        NetworkOptions {
            stabilize: false,
            ..Default::default()
        }
    }

    fn engine_with(nodes: Vec<NodeData>, edges: Vec<EdgeData>) -> GraphEngine {
        let mut engine = GraphEngine::new(quiet_options()).unwrap();
        engine.set_data(nodes, edges).unwrap();
        engine
    }

    fn path(n: u32) -> GraphEngine {
        let nodes = (0..n).map(|i| node(i, 50.0 * i as f64, 0.0)).collect();
        let edges = (1..n).map(|i| edge(i, i - 1, i)).collect();
        engine_with(nodes, edges)
    }

    fn position(engine: &GraphEngine, id: u32) -> (f64, f64) {
        let node = engine.sectors.store().node(NodeId(id)).unwrap();
        (node.body.x, node.body.y)
    }

    #[test]
    fn test_set_data() {
        let engine = path(3);
        assert_eq!(engine.node_count(), 3);
        assert_eq!(engine.edge_count(), 2);
        assert!(engine.is_moving());
        let middle = engine.sectors.store().node(NodeId(1)).unwrap();
        assert_eq!(middle.dynamic_edges.len(), 2);
    }

    #[test]
    fn test_set_data_rejects_duplicates_and_keeps_old_network() {
        let mut engine = path(3);
        let err = engine
            .set_data(vec![node(7, 0.0, 0.0), node(7, 1.0, 1.0)], vec![])
            .unwrap_err();
        assert_eq!(err, LayoutError::DuplicateNode(NodeId(7)));
        assert_eq!(engine.node_count(), 3);
    }

    #[test]
    fn test_unpositioned_nodes_scattered() {
        let nodes = (0..4)
            .map(|i| NodeData {
                id: Some(i),
                ..Default::default()
            })
            .collect();
        let engine = engine_with(nodes, vec![]);
        for layout in engine.node_layouts() {
            let r = layout.x.hypot(layout.y);
            assert!(approx_eq!(f64, r, 14.0, epsilon = 1e-9));
        }
    }

    #[test]
    fn test_add_nodes_connects_pending_edges() {
        let mut engine = path(2);
        engine.add_edges(vec![edge(10, 1, 5)]).unwrap();
        assert_eq!(engine.pending_edge_count(), 1);
        assert_eq!(engine.edge_count(), 1);

        engine.add_nodes(vec![node(5, 100.0, 0.0)]).unwrap();
        assert_eq!(engine.pending_edge_count(), 0);
        assert_eq!(engine.edge_count(), 2);
        assert!(engine.sectors.store().node(NodeId(5)).unwrap().dynamic_edges.contains(&EdgeId(10)));
    }

    #[test]
    fn test_add_nodes_rejects_whole_batch() {
        let mut engine = path(2);
        let err = engine.add_nodes(vec![node(5, 0.0, 0.0), node(1, 0.0, 0.0)]).unwrap_err();
        assert_eq!(err, LayoutError::DuplicateNode(NodeId(1)));
        assert_eq!(engine.node_count(), 2);
    }

    #[test]
    fn test_add_duplicate_edge() {
        let mut engine = path(3);
        let err = engine.add_edges(vec![edge(1, 0, 2)]).unwrap_err();
        assert_eq!(err, LayoutError::DuplicateEdge(EdgeId(1)));
    }

    #[test]
    fn test_remove_node_removes_edges() {
        let mut engine = path(3);
        engine.remove_nodes(&[1]).unwrap();
        assert_eq!(engine.node_count(), 2);
        assert_eq!(engine.edge_count(), 0);
        assert!(engine.sectors.store().node(NodeId(0)).unwrap().dynamic_edges.is_empty());
        assert_eq!(engine.remove_nodes(&[1]), Err(LayoutError::UnknownNode(NodeId(1))));
    }

    #[test]
    fn test_remove_clustered_node() {
        let mut engine = path(4);
        engine.cluster_to_fit(1, false).unwrap();
        assert_eq!(engine.node_count(), 1);

        engine.remove_nodes(&[3]).unwrap();
        assert!(engine.sectors.find_node(NodeId(3)).is_none());
        assert!(engine.find_edge(EdgeId(3)).is_none());
        let total: usize = engine.node_layouts().iter().map(|n| n.cluster_size).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_remove_contained_edge() {
        let mut engine = path(3);
        engine.cluster_to_fit(1, false).unwrap();
        engine.remove_edges(&[2]).unwrap();
        assert!(engine.find_edge(EdgeId(2)).is_none());

        engine.open_all_clusters().unwrap();
        assert_eq!(engine.node_count(), 3);
        assert_eq!(engine.edge_count(), 1);
        assert!(engine.sectors.store().node(NodeId(2)).unwrap().dynamic_edges.is_empty());
    }

    #[test]
    fn test_update_edge_endpoints() {
        let mut engine = path(3);
        engine
            .update_edges(vec![EdgeData {
                id: Some(2),
                to: Some(0),
                ..Default::default()
            }])
            .unwrap();
        let moved = engine.sectors.store().edge(EdgeId(2)).unwrap();
        assert_eq!((moved.from_id, moved.to_id), (NodeId(1), NodeId(0)));
        assert!(engine.sectors.store().node(NodeId(2)).unwrap().dynamic_edges.is_empty());
    }

    #[test]
    fn test_update_edge_length_in_place() {
        let mut engine = path(2);
        engine
            .update_edges(vec![EdgeData {
                id: Some(1),
                length: Some(40.0),
                ..Default::default()
            }])
            .unwrap();
        assert_eq!(engine.sectors.store().edge(EdgeId(1)).unwrap().length, Some(40.0));
        assert_eq!(
            engine.update_edges(vec![EdgeData {
                id: Some(9),
                ..Default::default()
            }]),
            Err(LayoutError::UnknownEdge(EdgeId(9)))
        );
    }

    #[test]
    fn test_update_absorbed_mass_reaches_cluster() {
        let mut engine = path(2);
        engine.cluster_to_fit(1, false).unwrap();
        let cluster = engine.node_layouts()[0].id;
        let child = if cluster == 0 { 1 } else { 0 };
        engine
            .update_nodes(vec![NodeData {
                id: Some(child),
                mass: Some(3.0),
                ..Default::default()
            }])
            .unwrap();
        let mass = engine.sectors.store().node(NodeId(cluster)).unwrap().body.mass;
        assert!(approx_eq!(f64, mass, 4.0));
    }

    #[test]
    fn test_set_node_size() {
        let mut engine = path(2);
        engine.set_node_size(0, 20.0, 40.0, 30.0).unwrap();
        let layout = engine.node_layouts().into_iter().find(|n| n.id == 0).unwrap();
        assert_eq!((layout.width, layout.height), (40.0, 30.0));
        assert_eq!(
            engine.set_node_size(0, -1.0, 1.0, 1.0),
            Err(LayoutError::InvalidNumber { id: 0, field: "radius" })
        );
    }

    #[test]
    fn test_node_at_and_in_view() {
        let engine = engine_with(vec![node(0, 0.0, 0.0), node(1, 5000.0, 0.0)], vec![]);
        let (cx, cy) = engine.viewport.world_to_canvas(0.0, 0.0);
        assert_eq!(engine.node_at(cx, cy), Some(0));
        assert_eq!(engine.node_at(cx + 200.0, cy), None);
        assert_eq!(engine.nodes_in_view(), vec![0]);
    }

    #[test]
    fn test_cluster_membership() {
        let mut engine = path(2);
        engine.cluster_to_fit(1, false).unwrap();
        let cluster = engine.node_layouts()[0].id;
        let child = if cluster == 0 { 1 } else { 0 };
        assert_eq!(engine.cluster_membership(child).unwrap(), vec![cluster]);
        assert!(engine.cluster_membership(cluster).unwrap().is_empty());
        assert_eq!(engine.cluster_membership(42), Err(LayoutError::UnknownNode(NodeId(42))));
    }

    #[test]
    fn test_large_cluster_opens_into_sector() {
        let mut options = quiet_options();
        options.clustering.sector_threshold = 3;
        options.clustering.initial_max_nodes = 4;
        let mut engine = GraphEngine::new(options).unwrap();
        let mut nodes: Vec<NodeData> = (0..8).map(|i| node(i, 30.0 * i as f64, 0.0)).collect();
        nodes.push(node(100, 5000.0, 5000.0));
        let edges = (1..8).map(|i| edge(i, 0, i)).collect();
        engine.set_data(nodes, edges).unwrap();
        engine.force_aggregate_hubs().unwrap();
        assert_eq!(engine.node_count(), 2);

        let (x, y) = position(&engine, 0);
        engine.viewport.area_center_x = x;
        engine.viewport.area_center_y = y;
        engine.open_cluster(0).unwrap();
        assert!(!engine.sectors.is_default());
        assert!(engine.node_count() >= 4);
        assert!(!engine.sectors.store().contains_node(NodeId(100)));
    }

    #[test]
    fn test_small_cluster_opens_in_place() {
        let mut engine = path(3);
        engine.cluster_to_fit(1, false).unwrap();
        let cluster = engine.node_layouts()[0].id;
        engine.open_cluster(cluster).unwrap();
        assert!(engine.sectors.is_default());
        assert_eq!(engine.node_count(), 3);
        assert_eq!(engine.open_cluster(cluster), Err(LayoutError::NotClustered(NodeId(cluster))));
    }

    #[test]
    fn test_zoom_out_clusters_short_edges() {
        let mut options = quiet_options();
        options.clustering.enabled = true;
        let mut engine = GraphEngine::new(options).unwrap();
        let nodes = (0..4).map(|i| node(i, 50.0 * i as f64, 0.0)).collect();
        let edges = (1..4).map(|i| edge(i, i - 1, i)).collect();
        engine.set_data(nodes, edges).unwrap();

        engine.zoom(0.05, 400.0, 300.0).unwrap();
        assert!(engine.node_count() < 4);
    }

    #[test]
    fn test_drag_restores_pins() {
        let mut engine = path(2);
        engine
            .update_nodes(vec![NodeData {
                id: Some(1),
                allowed_to_move_y: Some(false),
                ..Default::default()
            }])
            .unwrap();
        engine.start_drag(&[0, 1]).unwrap();
        assert!(engine.sectors.store().node(NodeId(0)).unwrap().body.is_fixed());

        let (cx, cy) = engine.viewport.world_to_canvas(70.0, 30.0);
        engine.drag_to(0, cx, cy).unwrap();
        let (x, y) = position(&engine, 0);
        assert!(approx_eq!(f64, x, 70.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, y, 30.0, epsilon = 1e-9));

        engine.end_drag();
        let body = engine.sectors.store().node(NodeId(0)).unwrap().body;
        assert!(!body.x_fixed && !body.y_fixed);
        let body = engine.sectors.store().node(NodeId(1)).unwrap().body;
        assert!(!body.x_fixed && body.y_fixed);
    }

    #[test]
    fn test_drag_moves_via_node() {
        let mut engine = path(2);
        let (cx, cy) = engine.viewport.world_to_canvas(50.0, 100.0);
        engine.drag_to(0, cx, cy).unwrap();
        let via = engine.sectors.support()[&EdgeId(1)];
        assert!(approx_eq!(f64, via.x, 50.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, via.y, 50.0, epsilon = 1e-9));
    }

    #[test]
    fn test_invalid_options_rejected() {
        let mut engine = path(2);
        let mut options = quiet_options();
        options.max_physics_ticks_per_render = 0;
        assert!(matches!(engine.set_options(options), Err(LayoutError::InvalidOption { .. })));
        assert_eq!(engine.options().max_physics_ticks_per_render, 3);
    }

    #[test]
    fn test_disabling_curves_drops_vias() {
        let mut engine = path(3);
        assert_eq!(engine.sectors.support().len(), 2);
        let mut options = quiet_options();
        options.smooth_curves.enabled = false;
        engine.set_options(options).unwrap();
        assert!(engine.sectors.support().is_empty());
    }

    #[test]
    fn test_freeze_for_stabilization() {
        let mut options = quiet_options();
        options.freeze_for_stabilization = true;
        let mut engine = GraphEngine::new(options).unwrap();
        engine
            .set_data(vec![node(0, 0.0, 0.0), node(1, 10.0, 0.0)], vec![edge(1, 0, 1)])
            .unwrap();
        engine.stabilize().unwrap();
        assert_eq!(position(&engine, 0), (0.0, 0.0));
        assert_eq!(position(&engine, 1), (10.0, 0.0));
        assert!(!engine.sectors.store().node(NodeId(0)).unwrap().body.is_fixed());
    }

    #[test]
    fn test_stabilize_settles() {
        let mut engine = path(5);
        let count = engine.stabilize().unwrap();
        assert!(count > 0 && count < 1000);
        assert!(!engine.is_moving());
    }

    #[test]
    fn test_stabilize_empty() {
        let mut engine = GraphEngine::default();
        assert_eq!(engine.stabilize().unwrap(), 0);
    }
}
