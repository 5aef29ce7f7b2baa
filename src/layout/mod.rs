//! Deterministic placement ahead of the force simulation.
//!
//! The hierarchical placer assigns levels and slots; the simulation then
//! relaxes nodes along the free axis while the level axis stays pinned.

pub mod hierarchical;

pub use hierarchical::apply_hierarchical_layout;
