//! Dataset items as the host supplies them.
//!
//! Every field is optional on the wire. Conversion into [`Node`] / [`Edge`]
//! is where malformed items are rejected: a missing id, an unknown shape, or a
//! non-finite number fails the whole item.

use serde::{Deserialize, Serialize};

use super::edge::{Edge, EdgeAttributes, EdgeId};
use super::node::{Node, NodeId, Shape};
use crate::config::ClusteringOptions;
use crate::error::LayoutError;

/// A node item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeData {
    pub id: Option<u32>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub mass: Option<f64>,
    pub shape: Option<String>,
    pub label: Option<String>,
    pub level: Option<i32>,
    pub radius: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub font_size: Option<f64>,
    /// Pins both axes.
    pub fixed: Option<bool>,
    pub allowed_to_move_x: Option<bool>,
    pub allowed_to_move_y: Option<bool>,
}

/// An edge item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EdgeData {
    pub id: Option<u32>,
    pub from: Option<u32>,
    pub to: Option<u32>,
    pub length: Option<f64>,
    pub width: Option<f64>,
    pub label: Option<String>,
    pub dashes: Option<bool>,
    pub arrows: Option<String>,
    pub color: Option<String>,
}

fn checked(id: u32, field: &'static str, value: Option<f64>) -> Result<Option<f64>, LayoutError> {
    match value {
        Some(v) if !v.is_finite() => Err(LayoutError::InvalidNumber { id, field }),
        other => Ok(other),
    }
}

fn checked_positive(id: u32, field: &'static str, value: Option<f64>) -> Result<Option<f64>, LayoutError> {
    match checked(id, field, value)? {
        Some(v) if v <= 0.0 => Err(LayoutError::InvalidNumber { id, field }),
        other => Ok(other),
    }
}

impl NodeData {
    /// Validate the item without building anything.
    pub fn validate(&self) -> Result<NodeId, LayoutError> {
        let raw = self.id.ok_or(LayoutError::MissingId)?;
        let id = NodeId(raw);
        checked(raw, "x", self.x)?;
        checked(raw, "y", self.y)?;
        checked_positive(raw, "mass", self.mass)?;
        checked_positive(raw, "radius", self.radius)?;
        checked_positive(raw, "width", self.width)?;
        checked_positive(raw, "height", self.height)?;
        checked_positive(raw, "fontSize", self.font_size)?;
        if let Some(name) = &self.shape {
            if Shape::parse(name).is_none() {
                return Err(LayoutError::InvalidShape {
                    id,
                    shape: name.clone(),
                });
            }
        }
        Ok(id)
    }

    /// Build a node. Missing coordinates default to the origin; the engine
    /// scatters such nodes before they are simulated.
    pub fn into_node(self, options: &ClusteringOptions) -> Result<Node, LayoutError> {
        let id = self.validate()?;
        let mut node = Node::new(id, self.x.unwrap_or(0.0), self.y.unwrap_or(0.0));
        node.user_positioned = self.x.is_some() && self.y.is_some();
        self.apply_to(&mut node, options);
        Ok(node)
    }

    /// Overwrite the fields this item carries. Call [`NodeData::validate`] first.
    ///
    /// Mass only applies to plain nodes. Keeping enclosing clusters in step
    /// is up to the caller.
    pub fn apply_to(&self, node: &mut Node, options: &ClusteringOptions) {
        if let Some(x) = self.x {
            node.body.x = x;
        }
        if let Some(y) = self.y {
            node.body.y = y;
        }
        if let Some(mass) = self.mass {
            if !node.is_cluster() {
                node.body.mass = mass;
            }
        }
        if let Some(shape) = self.shape.as_deref().and_then(Shape::parse) {
            node.shape = shape;
        }
        if self.label.is_some() {
            node.label = self.label.clone();
        }
        if self.level.is_some() {
            node.level = self.level;
            node.user_level = self.level;
        }
        if let Some(fixed) = self.fixed {
            node.body.x_fixed = fixed;
            node.body.y_fixed = fixed;
        }
        if let Some(allowed) = self.allowed_to_move_x {
            node.body.x_fixed = !allowed;
        }
        if let Some(allowed) = self.allowed_to_move_y {
            node.body.y_fixed = !allowed;
        }
        if let Some(font_size) = self.font_size {
            node.base_font_size = font_size;
        }
        if self.radius.is_some() || self.width.is_some() || self.height.is_some() {
            let radius = self.radius.unwrap_or(node.base_radius);
            let width = self.width.unwrap_or(if self.radius.is_some() { 2.0 * radius } else { node.base_width });
            let height = self.height.unwrap_or(if self.radius.is_some() { 2.0 * radius } else { node.base_height });
            node.set_base_size(radius, width, height, options);
        } else {
            node.update_cluster_appearance(options);
        }
    }
}

impl EdgeData {
    pub fn validate(&self) -> Result<EdgeId, LayoutError> {
        let id = self.validate_update()?;
        if self.from.is_none() || self.to.is_none() {
            return Err(LayoutError::MissingEndpoint(id));
        }
        Ok(id)
    }

    /// Validation for an update item, where endpoints are optional.
    pub fn validate_update(&self) -> Result<EdgeId, LayoutError> {
        let raw = self.id.ok_or(LayoutError::MissingId)?;
        checked_positive(raw, "length", self.length)?;
        checked(raw, "width", self.width)?;
        Ok(EdgeId(raw))
    }

    pub fn into_edge(self) -> Result<Edge, LayoutError> {
        let id = self.validate()?;
        let (Some(from), Some(to)) = (self.from, self.to) else {
            return Err(LayoutError::MissingEndpoint(id));
        };
        let mut edge = Edge::new(id, NodeId(from), NodeId(to));
        self.apply_to(&mut edge);
        Ok(edge)
    }

    /// Overwrite the attributes this item carries. Endpoints are not touched.
    pub fn apply_to(&self, edge: &mut Edge) {
        if self.length.is_some() {
            edge.length = self.length;
        }
        let attributes: &mut EdgeAttributes = &mut edge.attributes;
        if let Some(width) = self.width {
            attributes.width = width;
        }
        if self.label.is_some() {
            attributes.label = self.label.clone();
        }
        if let Some(dashes) = self.dashes {
            attributes.dashes = dashes;
        }
        if self.arrows.is_some() {
            attributes.arrows = self.arrows.clone();
        }
        if self.color.is_some() {
            attributes.color = self.color.clone();
        }
    }

    /// True when the item would move the edge to different endpoints.
    ///
    /// Compares against the dataset endpoints, so an edge currently rerouted
    /// to a cluster is not considered moved.
    pub fn changes_endpoints(&self, edge: &Edge) -> bool {
        let (from, to) = edge.original_endpoints();
        let from_changed = self.from.is_some_and(|id| NodeId(id) != from);
        let to_changed = self.to.is_some_and(|id| NodeId(id) != to);
        from_changed || to_changed
    }
}
