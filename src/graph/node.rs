//! Node type and related structures.
//!
//! A node is a vertex of the network. Each node has:
//! - A stable unique identifier supplied by the dataset
//! - A [`Body`]: position, velocity, force accumulator, mass and axis pins
//! - Shape-derived sizes fed back by the renderer
//! - Cluster bookkeeping: the nodes and edges it has absorbed, grouped into
//!   LIFO sessions so a cluster opens exactly the way it was formed

use std::collections::HashMap;
use std::fmt;

use super::edge::{Edge, EdgeId};
use crate::config::ClusteringOptions;

/// Stable node identifier.
///
/// This ID survives clustering: an absorbed node keeps it while it lives
/// inside its parent, and gets it back unchanged when released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Create a new NodeId from a raw u32.
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

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

impl From<u32> for NodeId {
    #[inline]
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<NodeId> for u32 {
    #[inline]
    fn from(id: NodeId) -> Self {
        id.0
    }
}

/// Node shapes the renderer knows how to measure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Shape {
    #[default]
    Ellipse,
    Circle,
    Box,
    Database,
    Image,
    CircularImage,
    Label,
    Text,
    Dot,
    Star,
    Triangle,
    TriangleDown,
    Square,
    Icon,
}

impl Shape {
    /// Parse a dataset shape name. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let shape = match name {
            "ellipse" => Self::Ellipse,
            "circle" => Self::Circle,
            "box" => Self::Box,
            "database" => Self::Database,
            "image" => Self::Image,
            "circularImage" => Self::CircularImage,
            "label" => Self::Label,
            "text" => Self::Text,
            "dot" => Self::Dot,
            "star" => Self::Star,
            "triangle" => Self::Triangle,
            "triangleDown" => Self::TriangleDown,
            "square" => Self::Square,
            "icon" => Self::Icon,
            _ => return None,
        };
        Some(shape)
    }

    /// Shapes whose size is a radius rather than a measured label box.
    pub fn is_radial(self) -> bool {
        matches!(
            self,
            Self::Dot | Self::Star | Self::Triangle | Self::TriangleDown | Self::Square | Self::Icon
        )
    }
}

// =============================================================================
// Body
// =============================================================================

/// The kinematic state of one simulated particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub fx: f64,
    pub fy: f64,
    pub mass: f64,
    pub x_fixed: bool,
    pub y_fixed: bool,
}

impl Body {
    /// A body at rest with unit mass.
    pub fn at(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            vx: 0.0,
            vy: 0.0,
            fx: 0.0,
            fy: 0.0,
            mass: 1.0,
            x_fixed: false,
            y_fixed: false,
        }
    }

    /// Advance one semi-implicit Euler step.
    ///
    /// A pinned axis discards its accumulated force and velocity. A positive
    /// `max_velocity` clamps each velocity component.
    pub fn discrete_step(&mut self, dt: f64, damping: f64, max_velocity: f64) {
        if self.x_fixed {
            self.fx = 0.0;
            self.vx = 0.0;
        } else {
            let ax = (self.fx - damping * self.vx) / self.mass;
            self.vx = clamp_velocity(self.vx + ax * dt, max_velocity);
            self.x += self.vx * dt;
        }

        if self.y_fixed {
            self.fy = 0.0;
            self.vy = 0.0;
        } else {
            let ay = (self.fy - damping * self.vy) / self.mass;
            self.vy = clamp_velocity(self.vy + ay * dt, max_velocity);
            self.y += self.vy * dt;
        }
    }

    /// Euclidean speed.
    #[inline]
    pub fn speed(&self) -> f64 {
        self.vx.hypot(self.vy)
    }

    #[inline]
    pub fn is_moving(&self, min_velocity: f64) -> bool {
        self.speed() > min_velocity
    }

    pub fn clear_velocity(&mut self) {
        self.vx = 0.0;
        self.vy = 0.0;
    }

    /// True when both axes are pinned.
    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.x_fixed && self.y_fixed
    }
}

#[inline]
fn clamp_velocity(v: f64, max_velocity: f64) -> f64 {
    if max_velocity > 0.0 {
        v.clamp(-max_velocity, max_velocity)
    } else {
        v
    }
}

// =============================================================================
// Node
// =============================================================================

/// One clustering generation of a parent: the children absorbed during a
/// single coarsening pass, in absorption order.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSession {
    pub id: u32,
    pub members: Vec<NodeId>,
}

/// Default label font size before cluster growth.
pub const DEFAULT_FONT_SIZE: f64 = 14.0;
/// Default radius for nodes the renderer has not measured yet.
pub const DEFAULT_RADIUS: f64 = 10.0;

/// A network node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub body: Body,
    pub shape: Shape,
    pub label: Option<String>,
    /// Hierarchical level in force, either user supplied or assigned by the
    /// placer.
    pub level: Option<i32>,
    /// Level supplied by the dataset.
    pub user_level: Option<i32>,
    /// Whether the dataset supplied coordinates for this node.
    pub user_positioned: bool,

    // Sizes reported by the renderer, before cluster growth.
    pub base_radius: f64,
    pub base_width: f64,
    pub base_height: f64,
    pub base_font_size: f64,

    // Effective sizes including cluster growth.
    pub radius: f64,
    pub width: f64,
    pub height: f64,
    pub font_size: f64,
    /// Width gained through clustering; bounds where released children land.
    pub growth_indicator: f64,

    /// Number of original nodes this node stands for (1 for a plain node).
    pub cluster_size: usize,
    pub cluster_sessions: Vec<ClusterSession>,
    /// Zoom scale at which the last child was absorbed; 0 when forced.
    pub formation_scale: f64,

    /// Edges currently attached to this node.
    pub dynamic_edges: Vec<EdgeId>,
    /// Absorbed children, owned by this node.
    pub contained_nodes: HashMap<NodeId, Node>,
    /// Edges between this node and a child (or a child's self-loops),
    /// removed from the live edge set while the child is absorbed.
    pub contained_edges: HashMap<NodeId, Vec<Edge>>,
    /// Live edges whose endpoint was rewritten from a child to this node.
    pub rerouted_edges: HashMap<NodeId, Vec<EdgeId>>,
}

impl Node {
    /// Create a plain node at the given position.
    pub fn new(id: NodeId, x: f64, y: f64) -> Self {
        Self {
            id,
            body: Body::at(x, y),
            shape: Shape::default(),
            label: None,
            level: None,
            user_level: None,
            user_positioned: false,
            base_radius: DEFAULT_RADIUS,
            base_width: 2.0 * DEFAULT_RADIUS,
            base_height: 2.0 * DEFAULT_RADIUS,
            base_font_size: DEFAULT_FONT_SIZE,
            radius: DEFAULT_RADIUS,
            width: 2.0 * DEFAULT_RADIUS,
            height: 2.0 * DEFAULT_RADIUS,
            font_size: DEFAULT_FONT_SIZE,
            growth_indicator: 0.0,
            cluster_size: 1,
            cluster_sessions: Vec::new(),
            formation_scale: 0.0,
            dynamic_edges: Vec::new(),
            contained_nodes: HashMap::new(),
            contained_edges: HashMap::new(),
            rerouted_edges: HashMap::new(),
        }
    }

    #[inline]
    pub fn is_cluster(&self) -> bool {
        self.cluster_size > 1
    }

    /// Nesting depth used by level normalization.
    #[inline]
    pub fn cluster_level(&self) -> usize {
        self.cluster_sessions.len()
    }

    /// Set the renderer-measured sizes and recompute cluster growth.
    pub fn set_base_size(&mut self, radius: f64, width: f64, height: f64, options: &ClusteringOptions) {
        self.base_radius = radius;
        self.base_width = width;
        self.base_height = height;
        self.update_cluster_appearance(options);
    }

    /// Recompute size and font from `cluster_size`.
    ///
    /// Growth saturates after `max_node_size_increments` absorbed nodes and
    /// the font saturates at `max_font_size`.
    pub fn update_cluster_appearance(&mut self, options: &ClusteringOptions) {
        let increments = (self.cluster_size - 1).min(options.max_node_size_increments) as f64;
        self.width = self.base_width + increments * options.node_scaling.width;
        self.height = self.base_height + increments * options.node_scaling.height;
        self.radius = self.base_radius + increments * options.node_scaling.radius;
        self.growth_indicator = self.width - self.base_width;
        self.font_size = if self.is_cluster() {
            options
                .max_font_size
                .min(self.base_font_size + options.font_size_multiplier * self.cluster_size as f64)
        } else {
            self.base_font_size
        };
    }

    /// Largest extent, used for on-screen size tests.
    pub fn extent(&self) -> f64 {
        self.width.max(self.height).max(2.0 * self.radius)
    }

    /// Session the child was absorbed in, if it is a direct child.
    pub fn session_of(&self, child: NodeId) -> Option<u32> {
        self.cluster_sessions
            .iter()
            .find(|session| session.members.contains(&child))
            .map(|session| session.id)
    }

    /// Look up a node anywhere below this one.
    pub fn find_contained(&self, id: NodeId) -> Option<&Node> {
        if let Some(child) = self.contained_nodes.get(&id) {
            return Some(child);
        }
        self.contained_nodes.values().find_map(|child| child.find_contained(id))
    }

    /// Mutable lookup of a node anywhere below this one.
    pub fn find_contained_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        if self.contained_nodes.contains_key(&id) {
            return self.contained_nodes.get_mut(&id);
        }
        self.contained_nodes
            .values_mut()
            .find_map(|child| child.find_contained_mut(id))
    }

    /// Chain of nested clusters from this node down to `id`'s direct parent.
    ///
    /// Returns an empty chain when `id` is this node, `None` when `id` is not
    /// below it.
    pub fn path_to(&self, id: NodeId) -> Option<Vec<NodeId>> {
        if self.id == id {
            return Some(Vec::new());
        }
        for child in self.contained_nodes.values() {
            if let Some(mut path) = child.path_to(id) {
                path.insert(0, self.id);
                return Some(path);
            }
        }
        None
    }

    /// Visit this node and every node below it.
    pub fn for_each_mut(&mut self, f: &mut impl FnMut(&mut Node)) {
        f(self);
        for child in self.contained_nodes.values_mut() {
            child.for_each_mut(f);
        }
    }
}
