//! Configuration for the layout engine.
//!
//! Every option is optional: [`NetworkOptions`] deserializes from a partial
//! camelCase object (the shape the host passes in) and fills everything it
//! does not mention with the defaults documented on each field.
//!
//! # Overview
//!
//! - [`PhysicsOptions`] - constants for the three repulsion strategies; the
//!   enabled one is resolved into [`ActivePhysics`] once per option change.
//! - [`ClusteringOptions`] - thresholds for coarsening and sector opening.
//! - [`HierarchicalLayoutOptions`] - level-based placement.
//! - [`SmoothCurvesOptions`] - whether edges carry simulated via-nodes.
//!
//! # Example
//!
//! ```
//! # use netlayout_wasm::config::{NetworkOptions, PhysicsKind};
//! let options: NetworkOptions =
//!     serde_json::from_str(r#"{ "physics": { "repulsion": { "enabled": true } } }"#).unwrap();
//! // Barnes-Hut still wins while it is enabled
//! assert_eq!(options.active_physics().kind, PhysicsKind::BarnesHut);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::LayoutError;

/// Top-level engine options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkOptions {
    /// Force model constants.
    pub physics: PhysicsOptions,
    /// Coarsening and sector thresholds.
    pub clustering: ClusteringOptions,
    /// Level-based placement.
    pub hierarchical_layout: HierarchicalLayoutOptions,
    /// Via-node simulation for curved edges.
    pub smooth_curves: SmoothCurvesOptions,
    /// Per-axis velocity clamp; 0 disables the clamp (default: 10.0).
    pub max_velocity: f64,
    /// Screen-space settle threshold (default: 0.1).
    pub min_velocity: f64,
    /// Ceiling on synchronous stabilization ticks (default: 1000).
    pub stabilization_iterations: usize,
    /// Stabilize after every `set_data` (default: true).
    pub stabilize: bool,
    /// Pin nodes with user-supplied coordinates while stabilizing (default: false).
    pub freeze_for_stabilization: bool,
    /// Refit the viewport when stabilization finishes (default: true).
    pub zoom_extent_on_stabilize: bool,
    /// Seed for every random offset the engine applies (default: 0).
    pub random_seed: u64,
    /// Upper bound on physics ticks per animation frame (default: 3).
    pub max_physics_ticks_per_render: u32,
    /// Target frame interval in milliseconds (default: 1000 / 60).
    pub render_timestep: f64,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            physics: PhysicsOptions::default(),
            clustering: ClusteringOptions::default(),
            hierarchical_layout: HierarchicalLayoutOptions::default(),
            smooth_curves: SmoothCurvesOptions::default(),
            max_velocity: 10.0,
            min_velocity: 0.1,
            stabilization_iterations: 1000,
            stabilize: true,
            freeze_for_stabilization: false,
            zoom_extent_on_stabilize: true,
            random_seed: 0,
            max_physics_ticks_per_render: 3,
            render_timestep: 1000.0 / 60.0,
        }
    }
}

impl NetworkOptions {
    /// Resolve the constants of the repulsion strategy currently in force.
    ///
    /// Hierarchical layout always runs on hierarchical repulsion; otherwise
    /// Barnes-Hut is preferred, then hierarchical repulsion, then pairwise
    /// repulsion.
    pub fn active_physics(&self) -> ActivePhysics {
        let physics = &self.physics;
        if self.hierarchical_layout.enabled
            || (physics.hierarchical_repulsion.enabled && !physics.barnes_hut.enabled)
        {
            let h = &physics.hierarchical_repulsion;
            return ActivePhysics {
                kind: PhysicsKind::HierarchicalRepulsion,
                central_gravity: h.central_gravity,
                spring_length: h.spring_length,
                spring_constant: h.spring_constant,
                damping: h.damping,
                node_distance: h.node_distance,
                gravitational_constant: 0.0,
                theta: 0.0,
            };
        }
        if physics.barnes_hut.enabled {
            let b = &physics.barnes_hut;
            return ActivePhysics {
                kind: PhysicsKind::BarnesHut,
                central_gravity: b.central_gravity,
                spring_length: b.spring_length,
                spring_constant: b.spring_constant,
                damping: b.damping,
                node_distance: 0.0,
                gravitational_constant: b.gravitational_constant,
                theta: b.theta,
            };
        }
        let r = &physics.repulsion;
        ActivePhysics {
            kind: PhysicsKind::Repulsion,
            central_gravity: r.central_gravity,
            spring_length: r.spring_length,
            spring_constant: r.spring_constant,
            damping: r.damping,
            node_distance: r.node_distance,
            gravitational_constant: 0.0,
            theta: 0.0,
        }
    }

    /// True when edges are simulated through via-nodes.
    ///
    /// Hierarchical layout keeps edges straight.
    pub fn dynamic_curves(&self) -> bool {
        self.smooth_curves.enabled && self.smooth_curves.dynamic && !self.hierarchical_layout.enabled
    }

    /// True when the coarsener may run. Hierarchical layout turns it off.
    pub fn clustering_enabled(&self) -> bool {
        self.clustering.enabled && !self.hierarchical_layout.enabled
    }

    /// Check every numeric option for a usable value.
    pub fn validate(&self) -> Result<(), LayoutError> {
        non_negative("maxVelocity", self.max_velocity)?;
        non_negative("minVelocity", self.min_velocity)?;
        positive("renderTimestep", self.render_timestep)?;
        if self.max_physics_ticks_per_render == 0 {
            return Err(invalid("maxPhysicsTicksPerRender", "must be at least 1"));
        }

        let b = &self.physics.barnes_hut;
        finite("physics.barnesHut.gravitationalConstant", b.gravitational_constant)?;
        positive("physics.barnesHut.theta", b.theta)?;
        check_common("physics.barnesHut", b.central_gravity, b.spring_length, b.spring_constant, b.damping)?;

        let r = &self.physics.repulsion;
        positive("physics.repulsion.nodeDistance", r.node_distance)?;
        check_common("physics.repulsion", r.central_gravity, r.spring_length, r.spring_constant, r.damping)?;

        let h = &self.physics.hierarchical_repulsion;
        positive("physics.hierarchicalRepulsion.nodeDistance", h.node_distance)?;
        check_common(
            "physics.hierarchicalRepulsion",
            h.central_gravity,
            h.spring_length,
            h.spring_constant,
            h.damping,
        )?;

        let c = &self.clustering;
        positive("clustering.clusterEdgeThreshold", c.cluster_edge_threshold)?;
        non_negative("clustering.chainThreshold", c.chain_threshold)?;
        non_negative("clustering.screenSizeThreshold", c.screen_size_threshold)?;
        positive("clustering.activeAreaBoxSize", c.active_area_box_size)?;
        non_negative("clustering.forceAmplification", c.force_amplification)?;
        non_negative("clustering.distanceAmplification", c.distance_amplification)?;
        non_negative("clustering.edgeGrowth", c.edge_growth)?;
        if c.reduce_to_nodes > c.cluster_threshold {
            return Err(invalid(
                "clustering.reduceToNodes",
                format!("must not exceed clusterThreshold ({})", c.cluster_threshold),
            ));
        }

        let l = &self.hierarchical_layout;
        finite("hierarchicalLayout.levelSeparation", l.level_separation)?;
        positive("hierarchicalLayout.nodeSpacing", l.node_spacing)?;
        Ok(())
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> LayoutError {
    LayoutError::InvalidOption {
        key,
        reason: reason.into(),
    }
}

fn finite(key: &'static str, value: f64) -> Result<(), LayoutError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(invalid(key, "must be finite"))
    }
}

fn non_negative(key: &'static str, value: f64) -> Result<(), LayoutError> {
    finite(key, value)?;
    if value < 0.0 {
        return Err(invalid(key, format!("must not be negative, got {value}")));
    }
    Ok(())
}

fn positive(key: &'static str, value: f64) -> Result<(), LayoutError> {
    finite(key, value)?;
    if value <= 0.0 {
        return Err(invalid(key, format!("must be positive, got {value}")));
    }
    Ok(())
}

fn check_common(
    key: &'static str,
    central_gravity: f64,
    spring_length: f64,
    spring_constant: f64,
    damping: f64,
) -> Result<(), LayoutError> {
    non_negative(key, central_gravity)?;
    non_negative(key, spring_length)?;
    non_negative(key, spring_constant)?;
    non_negative(key, damping)
}

// =============================================================================
// Physics
// =============================================================================

/// Which repulsion strategy drives the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicsKind {
    BarnesHut,
    Repulsion,
    HierarchicalRepulsion,
}

/// Constants of the enabled strategy, flattened for the force model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivePhysics {
    pub kind: PhysicsKind,
    pub central_gravity: f64,
    pub spring_length: f64,
    pub spring_constant: f64,
    pub damping: f64,
    /// Only meaningful for the two pairwise strategies.
    pub node_distance: f64,
    /// Only meaningful for Barnes-Hut.
    pub gravitational_constant: f64,
    /// Pre-inverted opening criterion; only meaningful for Barnes-Hut.
    pub theta: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PhysicsOptions {
    pub barnes_hut: BarnesHutOptions,
    pub repulsion: RepulsionOptions,
    pub hierarchical_repulsion: HierarchicalRepulsionOptions,
}

/// Barnes-Hut constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BarnesHutOptions {
    /// (default: true)
    pub enabled: bool,
    /// Stored inverted: a region is merged when `distance / size > theta`
    /// (default: 1 / 0.6).
    pub theta: f64,
    /// Negative values repel (default: -2000.0).
    pub gravitational_constant: f64,
    /// Pull toward the origin per unit of distance (default: 0.005).
    pub central_gravity: f64,
    /// (default: 95.0)
    pub spring_length: f64,
    /// (default: 0.04)
    pub spring_constant: f64,
    /// (default: 0.09)
    pub damping: f64,
}

impl Default for BarnesHutOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            theta: 1.0 / 0.6,
            gravitational_constant: -2000.0,
            central_gravity: 0.005,
            spring_length: 95.0,
            spring_constant: 0.04,
            damping: 0.09,
        }
    }
}

/// Pairwise repulsion constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RepulsionOptions {
    /// (default: false)
    pub enabled: bool,
    /// Radius inside which two plain nodes push apart (default: 100.0).
    pub node_distance: f64,
    /// (default: 0.002)
    pub central_gravity: f64,
    /// (default: 200.0)
    pub spring_length: f64,
    /// (default: 0.05)
    pub spring_constant: f64,
    /// (default: 0.09)
    pub damping: f64,
}

impl Default for RepulsionOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            node_distance: 100.0,
            central_gravity: 0.002,
            spring_length: 200.0,
            spring_constant: 0.05,
            damping: 0.09,
        }
    }
}

/// Same-level repulsion constants used by the hierarchical layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HierarchicalRepulsionOptions {
    /// (default: false)
    pub enabled: bool,
    /// (default: 60.0)
    pub node_distance: f64,
    /// (default: 0.0)
    pub central_gravity: f64,
    /// (default: 100.0)
    pub spring_length: f64,
    /// (default: 0.01)
    pub spring_constant: f64,
    /// (default: 0.09)
    pub damping: f64,
}

impl Default for HierarchicalRepulsionOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            node_distance: 60.0,
            central_gravity: 0.0,
            spring_length: 100.0,
            spring_constant: 0.01,
            damping: 0.09,
        }
    }
}

// =============================================================================
// Clustering
// =============================================================================

/// Coarsening thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusteringOptions {
    /// (default: false)
    pub enabled: bool,
    /// Cluster down to this many nodes on load (default: 100).
    pub initial_max_nodes: usize,
    /// Re-cluster inside a tick above this many active nodes (default: 500).
    pub cluster_threshold: usize,
    /// Target of the in-tick re-cluster (default: 300).
    pub reduce_to_nodes: usize,
    /// Fraction of degree-2 nodes above which chains are folded (default: 0.4).
    pub chain_threshold: f64,
    /// On-screen edge length below which its leaf is absorbed (default: 20.0).
    pub cluster_edge_threshold: f64,
    /// Clusters larger than this open into a sector (default: 100).
    pub sector_threshold: usize,
    /// Fraction of the canvas a cluster must cover to open on zoom (default: 0.2).
    pub screen_size_threshold: f64,
    /// (default: 4.0)
    pub font_size_multiplier: f64,
    /// (default: 1000.0)
    pub max_font_size: f64,
    /// Extra repulsion per absorbed node (default: 0.1).
    pub force_amplification: f64,
    /// Extra repulsion radius per absorbed node (default: 0.1).
    pub distance_amplification: f64,
    /// Extra spring length per absorbed node (default: 20.0).
    pub edge_growth: f64,
    /// Size growth per absorbed node.
    pub node_scaling: NodeScaling,
    /// Cap on the number of growth steps (default: 600).
    pub max_node_size_increments: usize,
    /// Half-extent of the zoom-centered area where clusters may open (default: 80.0).
    pub active_area_box_size: f64,
    /// Allowed spread of nesting depth before normalization (default: 2).
    pub cluster_level_difference: usize,
}

impl Default for ClusteringOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_max_nodes: 100,
            cluster_threshold: 500,
            reduce_to_nodes: 300,
            chain_threshold: 0.4,
            cluster_edge_threshold: 20.0,
            sector_threshold: 100,
            screen_size_threshold: 0.2,
            font_size_multiplier: 4.0,
            max_font_size: 1000.0,
            force_amplification: 0.1,
            distance_amplification: 0.1,
            edge_growth: 20.0,
            node_scaling: NodeScaling::default(),
            max_node_size_increments: 600,
            active_area_box_size: 80.0,
            cluster_level_difference: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeScaling {
    pub width: f64,
    pub height: f64,
    pub radius: f64,
}

impl Default for NodeScaling {
    fn default() -> Self {
        Self {
            width: 1.0,
            height: 1.0,
            radius: 1.0,
        }
    }
}

// =============================================================================
// Hierarchical layout
// =============================================================================

/// Direction levels grow in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutDirection {
    /// Up-down: levels along +y.
    #[default]
    #[serde(rename = "UD")]
    UpDown,
    #[serde(rename = "DU")]
    DownUp,
    #[serde(rename = "LR")]
    LeftRight,
    #[serde(rename = "RL")]
    RightLeft,
}

impl LayoutDirection {
    /// True when levels are laid out along the y axis.
    pub fn is_vertical(self) -> bool {
        matches!(self, Self::UpDown | Self::DownUp)
    }

    /// True when levels grow toward negative coordinates.
    pub fn is_reversed(self) -> bool {
        matches!(self, Self::DownUp | Self::RightLeft)
    }
}

/// How levels are derived when the data does not supply them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelMethod {
    /// Breadth-first distance from the highest-degree nodes.
    #[default]
    Hubsize,
    /// Follow edge direction: `to` sits one level below `from`.
    Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HierarchicalLayoutOptions {
    /// (default: false)
    pub enabled: bool,
    /// (default: UD)
    pub direction: LayoutDirection,
    /// Distance between consecutive levels (default: 150.0).
    pub level_separation: f64,
    /// Base distance between neighbours within a level (default: 100.0).
    pub node_spacing: f64,
    /// (default: hubsize)
    pub layout: LevelMethod,
}

impl Default for HierarchicalLayoutOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            direction: LayoutDirection::UpDown,
            level_separation: 150.0,
            node_spacing: 100.0,
            layout: LevelMethod::Hubsize,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothCurvesOptions {
    /// (default: true)
    pub enabled: bool,
    /// Simulate a via-node per edge (default: true).
    pub dynamic: bool,
}

impl Default for SmoothCurvesOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            dynamic: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_object() {
        let options: NetworkOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, NetworkOptions::default());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_partial_nested_override_keeps_strategy_defaults() {
        let options: NetworkOptions = serde_json::from_str(
            r#"{
                "physics": { "repulsion": { "springLength": 80 } },
                "clustering": { "enabled": true, "initialMaxNodes": 10 },
                "maxVelocity": 20
            }"#,
        )
        .unwrap();
        assert_eq!(options.physics.repulsion.spring_length, 80.0);
        assert_eq!(options.physics.repulsion.node_distance, 100.0);
        assert_eq!(options.clustering.initial_max_nodes, 10);
        assert_eq!(options.clustering.cluster_threshold, 500);
        assert_eq!(options.max_velocity, 20.0);
    }

    #[test]
    fn test_json_roundtrip() {
        let mut options = NetworkOptions::default();
        options.hierarchical_layout.direction = LayoutDirection::RightLeft;
        options.hierarchical_layout.layout = LevelMethod::Direction;
        let json = serde_json::to_string(&options).unwrap();
        assert!(json.contains("\"direction\":\"RL\""));
        assert!(json.contains("\"layout\":\"direction\""));
        let back: NetworkOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, options);
    }

    #[test]
    fn test_active_physics_selection() {
        let mut options = NetworkOptions::default();
        assert_eq!(options.active_physics().kind, PhysicsKind::BarnesHut);
        assert_eq!(options.active_physics().gravitational_constant, -2000.0);

        options.physics.barnes_hut.enabled = false;
        assert_eq!(options.active_physics().kind, PhysicsKind::Repulsion);
        assert_eq!(options.active_physics().node_distance, 100.0);

        options.physics.hierarchical_repulsion.enabled = true;
        assert_eq!(options.active_physics().kind, PhysicsKind::HierarchicalRepulsion);

        let mut options = NetworkOptions::default();
        options.hierarchical_layout.enabled = true;
        assert_eq!(options.active_physics().kind, PhysicsKind::HierarchicalRepulsion);
        assert!(!options.dynamic_curves());
        options.clustering.enabled = true;
        assert!(!options.clustering_enabled());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut options = NetworkOptions::default();
        options.physics.barnes_hut.theta = 0.0;
        assert!(matches!(
            options.validate(),
            Err(LayoutError::InvalidOption { key: "physics.barnesHut.theta", .. })
        ));

        let mut options = NetworkOptions::default();
        options.min_velocity = f64::NAN;
        assert!(options.validate().is_err());

        let mut options = NetworkOptions::default();
        options.clustering.reduce_to_nodes = 600;
        assert!(matches!(
            options.validate(),
            Err(LayoutError::InvalidOption { key: "clustering.reduceToNodes", .. })
        ));
    }

    #[test]
    fn test_unknown_direction_is_rejected() {
        let result: Result<NetworkOptions, _> =
            serde_json::from_str(r#"{ "hierarchicalLayout": { "direction": "XY" } }"#);
        assert!(result.is_err());
    }
}
