//! Spatial indexing for O(log n) hit testing.
//!
//! This module provides an R-tree index over node bounding boxes for
//! pointer hit tests and visible-area queries.

mod rtree;

pub use rtree::{NodeBox, SpatialIndex};
