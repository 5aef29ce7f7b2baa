//! Netlayout - WASM Module
//!
//! Force-directed layout for interactive network views, with zoom-driven
//! clustering and level-based placement. The host owns rendering and input;
//! this module owns node positions and the cluster hierarchy, and is
//! compiled to WebAssembly with a JavaScript-friendly API via wasm-bindgen.
//!
//! # Architecture
//!
//! - `graph`: node and edge stores plus the [`graph::GraphEngine`] facade
//! - `physics`: spring, repulsion and gravity forces, Barnes-Hut, integration
//! - `cluster`: coarsening strategies and cluster opening
//! - `sector`: isolated sub-views for drilling into large clusters
//! - `layout`: hierarchical placement
//! - `spatial`: R-tree spatial indexing for hit testing
//! - `viewport`, `clock`: camera and frame pacing

use js_sys::Float64Array;
use wasm_bindgen::prelude::*;

pub mod clock;
pub mod cluster;
pub mod config;
pub mod error;
pub mod graph;
pub mod layout;
pub mod physics;
pub mod sector;
pub mod spatial;
pub mod viewport;

use clock::DateSource;
use config::NetworkOptions;
use error::LayoutError;
use graph::{EdgeData, GraphEngine, NodeData};
use serde::de::DeserializeOwned;

/// Initialize the WASM module: route `log` to the console and panics to
/// `console.error`.
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
    // a second init (module re-instantiated) keeps the first logger
    let _ = console_log::init_with_level(log::Level::Info);
}

fn from_js<T: DeserializeOwned + Default>(value: JsValue) -> Result<T, LayoutError> {
    if value.is_undefined() || value.is_null() {
        return Ok(T::default());
    }
    serde_wasm_bindgen::from_value(value).map_err(|err| LayoutError::Deserialize(err.to_string()))
}

fn to_js<T: serde::Serialize>(value: &T) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(value).map_err(|err| JsValue::from_str(&err.to_string()))
}

/// Main entry point for the layout engine.
///
/// This struct wraps the internal GraphEngine and provides the public API
/// exposed to JavaScript.
#[wasm_bindgen]
pub struct NetworkLayoutWasm {
    engine: GraphEngine,
}

#[wasm_bindgen]
impl NetworkLayoutWasm {
    /// Create an empty engine. `options` is a partial options object, or
    /// undefined for the defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(options: JsValue) -> Result<NetworkLayoutWasm, JsValue> {
        let options: NetworkOptions = from_js(options)?;
        Ok(Self {
            engine: GraphEngine::new(options)?,
        })
    }

    /// Replace the options.
    #[wasm_bindgen(js_name = setOptions)]
    pub fn set_options(&mut self, options: JsValue) -> Result<(), JsValue> {
        let options: NetworkOptions = from_js(options)?;
        Ok(self.engine.set_options(options)?)
    }

    // =========================================================================
    // Data
    // =========================================================================

    /// Replace the whole network with arrays of node and edge items.
    #[wasm_bindgen(js_name = setData)]
    pub fn set_data(&mut self, nodes: JsValue, edges: JsValue) -> Result<(), JsValue> {
        let nodes: Vec<NodeData> = from_js(nodes)?;
        let edges: Vec<EdgeData> = from_js(edges)?;
        Ok(self.engine.set_data(nodes, edges)?)
    }

    #[wasm_bindgen(js_name = addNodes)]
    pub fn add_nodes(&mut self, nodes: JsValue) -> Result<(), JsValue> {
        let nodes: Vec<NodeData> = from_js(nodes)?;
        Ok(self.engine.add_nodes(nodes)?)
    }

    #[wasm_bindgen(js_name = updateNodes)]
    pub fn update_nodes(&mut self, nodes: JsValue) -> Result<(), JsValue> {
        let nodes: Vec<NodeData> = from_js(nodes)?;
        Ok(self.engine.update_nodes(nodes)?)
    }

    #[wasm_bindgen(js_name = removeNodes)]
    pub fn remove_nodes(&mut self, ids: &[u32]) -> Result<(), JsValue> {
        Ok(self.engine.remove_nodes(ids)?)
    }

    #[wasm_bindgen(js_name = addEdges)]
    pub fn add_edges(&mut self, edges: JsValue) -> Result<(), JsValue> {
        let edges: Vec<EdgeData> = from_js(edges)?;
        Ok(self.engine.add_edges(edges)?)
    }

    #[wasm_bindgen(js_name = updateEdges)]
    pub fn update_edges(&mut self, edges: JsValue) -> Result<(), JsValue> {
        let edges: Vec<EdgeData> = from_js(edges)?;
        Ok(self.engine.update_edges(edges)?)
    }

    #[wasm_bindgen(js_name = removeEdges)]
    pub fn remove_edges(&mut self, ids: &[u32]) -> Result<(), JsValue> {
        Ok(self.engine.remove_edges(ids)?)
    }

    /// Report the size the renderer measured for a node's shape and label.
    #[wasm_bindgen(js_name = setNodeSize)]
    pub fn set_node_size(&mut self, id: u32, radius: f64, width: f64, height: f64) -> Result<(), JsValue> {
        Ok(self.engine.set_node_size(id, radius, width, height)?)
    }

    /// Get the number of active nodes.
    #[wasm_bindgen(js_name = nodeCount)]
    pub fn node_count(&self) -> usize {
        self.engine.node_count()
    }

    /// Get the number of live edges.
    #[wasm_bindgen(js_name = edgeCount)]
    pub fn edge_count(&self) -> usize {
        self.engine.edge_count()
    }

    // =========================================================================
    // Layout Output
    // =========================================================================

    /// Array of `{ id, x, y, radius, width, height, fontSize, clusterSize }`
    /// for every active node.
    #[wasm_bindgen(js_name = nodeLayouts)]
    pub fn node_layouts(&self) -> Result<JsValue, JsValue> {
        to_js(&self.engine.node_layouts())
    }

    /// Active node ids, in the order of [`NetworkLayoutWasm::positions`].
    #[wasm_bindgen(js_name = nodeIds)]
    pub fn node_ids(&self) -> Vec<u32> {
        self.engine.node_layouts().iter().map(|node| node.id).collect()
    }

    /// Active node positions as [x0, y0, x1, y1, ...].
    #[wasm_bindgen]
    pub fn positions(&self) -> Float64Array {
        let positions: Vec<f64> = self
            .engine
            .node_layouts()
            .iter()
            .flat_map(|node| [node.x, node.y])
            .collect();
        Float64Array::from(&positions[..])
    }

    // =========================================================================
    // Simulation
    // =========================================================================

    /// Run one physics tick. Returns whether the system still moves.
    #[wasm_bindgen]
    pub fn tick(&mut self) -> Result<bool, JsValue> {
        Ok(self.engine.tick()?)
    }

    /// Tick until settled. Returns the number of ticks run.
    #[wasm_bindgen]
    pub fn stabilize(&mut self) -> Result<usize, JsValue> {
        Ok(self.engine.stabilize()?)
    }

    /// Run one animation frame. Returns `{ ticks, scheduleNext, stabilized }`.
    #[wasm_bindgen(js_name = animationStep)]
    pub fn animation_step(&mut self) -> Result<JsValue, JsValue> {
        let report = self.engine.animation_step(&DateSource)?;
        to_js(&report)
    }

    #[wasm_bindgen(js_name = isMoving)]
    pub fn is_moving(&self) -> bool {
        self.engine.is_moving()
    }

    /// Milliseconds the host spent rendering the last frame.
    #[wasm_bindgen(js_name = reportRenderTime)]
    pub fn report_render_time(&mut self, ms: f64) {
        self.engine.report_render_time(ms);
    }

    /// Continuous pan and zoom applied every frame (keyboard navigation).
    #[wasm_bindgen(js_name = setNavigation)]
    pub fn set_navigation(&mut self, x_increment: f64, y_increment: f64, zoom_increment: f64) {
        self.engine.set_navigation(x_increment, y_increment, zoom_increment);
    }

    // =========================================================================
    // Viewport
    // =========================================================================

    #[wasm_bindgen(js_name = setCanvasSize)]
    pub fn set_canvas_size(&mut self, width: f64, height: f64) {
        self.engine.set_canvas_size(width, height);
    }

    /// Zoom around a canvas point. Returns the clamped scale.
    #[wasm_bindgen]
    pub fn zoom(&mut self, scale: f64, pointer_x: f64, pointer_y: f64) -> Result<f64, JsValue> {
        Ok(self.engine.zoom(scale, pointer_x, pointer_y)?)
    }

    #[wasm_bindgen]
    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.engine.pan(dx, dy);
    }

    #[wasm_bindgen(js_name = zoomExtent)]
    pub fn zoom_extent(&mut self) {
        self.engine.zoom_extent();
    }

    /// The current `{ canvasWidth, canvasHeight, translationX, translationY,
    /// scale, areaCenterX, areaCenterY }`.
    #[wasm_bindgen]
    pub fn viewport(&self) -> Result<JsValue, JsValue> {
        to_js(self.engine.viewport())
    }

    // =========================================================================
    // Spatial Queries
    // =========================================================================

    /// Node under a canvas point, if any.
    #[wasm_bindgen(js_name = nodeAt)]
    pub fn node_at(&self, x: f64, y: f64) -> Option<u32> {
        self.engine.node_at(x, y)
    }

    /// Nodes intersecting the visible area.
    #[wasm_bindgen(js_name = nodesInView)]
    pub fn nodes_in_view(&self) -> Vec<u32> {
        self.engine.nodes_in_view()
    }

    // =========================================================================
    // Clustering
    // =========================================================================

    /// Clusters enclosing a node, outermost first.
    #[wasm_bindgen(js_name = clusterMembership)]
    pub fn cluster_membership(&self, id: u32) -> Result<Vec<u32>, JsValue> {
        Ok(self.engine.cluster_membership(id)?)
    }

    #[wasm_bindgen(js_name = openCluster)]
    pub fn open_cluster(&mut self, id: u32) -> Result<(), JsValue> {
        Ok(self.engine.open_cluster(id)?)
    }

    #[wasm_bindgen(js_name = openAllClusters)]
    pub fn open_all_clusters(&mut self) -> Result<(), JsValue> {
        Ok(self.engine.open_all_clusters()?)
    }

    #[wasm_bindgen(js_name = increaseClusterLevel)]
    pub fn increase_cluster_level(&mut self) -> Result<(), JsValue> {
        Ok(self.engine.increase_cluster_level()?)
    }

    #[wasm_bindgen(js_name = decreaseClusterLevel)]
    pub fn decrease_cluster_level(&mut self) -> Result<(), JsValue> {
        Ok(self.engine.decrease_cluster_level()?)
    }

    #[wasm_bindgen(js_name = forceAggregateHubs)]
    pub fn force_aggregate_hubs(&mut self) -> Result<(), JsValue> {
        Ok(self.engine.force_aggregate_hubs()?)
    }

    #[wasm_bindgen(js_name = clusterToFit)]
    pub fn cluster_to_fit(&mut self, max_nodes: usize, reposition: bool) -> Result<(), JsValue> {
        Ok(self.engine.cluster_to_fit(max_nodes, reposition)?)
    }

    // =========================================================================
    // Drag
    // =========================================================================

    #[wasm_bindgen(js_name = startDrag)]
    pub fn start_drag(&mut self, ids: &[u32]) -> Result<(), JsValue> {
        Ok(self.engine.start_drag(ids)?)
    }

    /// Move a dragged node to a canvas point.
    #[wasm_bindgen(js_name = dragTo)]
    pub fn drag_to(&mut self, id: u32, x: f64, y: f64) -> Result<(), JsValue> {
        Ok(self.engine.drag_to(id, x, y)?)
    }

    #[wasm_bindgen(js_name = endDrag)]
    pub fn end_drag(&mut self) {
        self.engine.end_drag();
    }
}
