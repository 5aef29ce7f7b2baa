//! R-tree based spatial index using the rstar crate.
//!
//! Nodes are indexed by their bounding boxes, so a point query answers
//! "which node is under the pointer" and a rectangle query answers "which
//! nodes are in view".

use rstar::{AABB, Envelope, PointDistance, RTree, RTreeObject};

use crate::graph::NodeId;

/// A node's bounding box in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeBox {
    pub id: NodeId,
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl NodeBox {
    /// Box of the given width and height centered on (x, y).
    pub fn centered(id: NodeId, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            id,
            min: [x - 0.5 * width, y - 0.5 * height],
            max: [x + 0.5 * width, y + 0.5 * height],
        }
    }

    fn center(&self) -> [f64; 2] {
        [0.5 * (self.min[0] + self.max[0]), 0.5 * (self.min[1] + self.max[1])]
    }
}

impl RTreeObject for NodeBox {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.min, self.max)
    }
}

impl PointDistance for NodeBox {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        Envelope::distance_2(&self.envelope(), point)
    }

    fn contains_point(&self, point: &[f64; 2]) -> bool {
        Envelope::contains_point(&self.envelope(), point)
    }
}

/// Spatial index over active node boxes.
///
/// Uses an R*-tree, bulk loaded whenever the engine marks it stale.
#[derive(Debug, Default)]
pub struct SpatialIndex {
    tree: RTree<NodeBox>,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self { tree: RTree::new() }
    }

    /// Replace the contents of the index.
    pub fn rebuild(&mut self, boxes: Vec<NodeBox>) {
        self.tree = RTree::bulk_load(boxes);
    }

    /// The node under a point. When boxes overlap, the one whose center is
    /// closest wins (ties go to the lower id).
    pub fn at_point(&self, x: f64, y: f64) -> Option<NodeId> {
        let point = [x, y];
        self.tree
            .locate_all_at_point(&point)
            .map(|node| {
                let [cx, cy] = node.center();
                ((cx - x).hypot(cy - y), node.id)
            })
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
            .map(|(_, id)| id)
    }

    /// The node whose box is nearest to a point, within `max_distance`.
    pub fn nearest_within(&self, x: f64, y: f64, max_distance: f64) -> Option<NodeId> {
        let point = [x, y];
        self.tree
            .nearest_neighbor(&point)
            .filter(|node| node.distance_2(&point) <= max_distance * max_distance)
            .map(|node| node.id)
    }

    /// Every node whose box intersects the rectangle, sorted by id.
    pub fn in_rect(&self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Vec<NodeId> {
        let envelope = AABB::from_corners([min_x, min_y], [max_x, max_y]);
        let mut ids: Vec<NodeId> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|node| node.id)
            .collect();
        ids.sort();
        ids
    }

    pub fn clear(&mut self) {
        self.tree = RTree::new();
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> SpatialIndex {
        let mut index = SpatialIndex::new();
        index.rebuild(vec![
            NodeBox::centered(NodeId(0), 0.0, 0.0, 20.0, 20.0),
            NodeBox::centered(NodeId(1), 15.0, 0.0, 20.0, 20.0),
            NodeBox::centered(NodeId(2), 100.0, 100.0, 10.0, 10.0),
        ]);
        index
    }

    #[test]
    fn test_at_point() {
        let index = index();
        assert_eq!(index.at_point(-5.0, 0.0), Some(NodeId(0)));
        // inside both boxes, closer to node 1's center
        assert_eq!(index.at_point(9.0, 0.0), Some(NodeId(1)));
        assert_eq!(index.at_point(50.0, 50.0), None);
        assert_eq!(index.at_point(104.0, 96.0), Some(NodeId(2)));
    }

    #[test]
    fn test_nearest_within() {
        let index = index();
        assert_eq!(index.nearest_within(100.0, 110.0, 6.0), Some(NodeId(2)));
        assert_eq!(index.nearest_within(100.0, 110.0, 4.0), None);
    }

    #[test]
    fn test_in_rect_intersects_boxes() {
        let index = index();
        assert_eq!(index.in_rect(8.0, -1.0, 9.0, 1.0), vec![NodeId(0), NodeId(1)]);
        assert_eq!(index.in_rect(90.0, 90.0, 200.0, 200.0), vec![NodeId(2)]);
        assert!(index.in_rect(40.0, 40.0, 60.0, 60.0).is_empty());
    }

    #[test]
    fn test_clear() {
        let mut index = index();
        assert_eq!(index.len(), 3);
        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.at_point(0.0, 0.0), None);
    }
}
