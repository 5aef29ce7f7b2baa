//! Force model for the layout simulation.
//!
//! Each tick the engine gathers every simulated body into a flat
//! [`ForceSystem`]: active nodes first, then the via-nodes of edges that carry
//! a curve. Forces are accumulated in three passes and the system is written
//! back before the integrator advances it.
//!
//! # Force Passes
//!
//! 1. **Central gravity:** `f = -centralGravity * position`, only in the
//!    default sector and never on via-nodes.
//! 2. **Repulsion:** one [`RepulsionSolver`], chosen from the options:
//!    [`Repulsion`] (pairwise with a soft cutoff), [`HierarchicalRepulsion`]
//!    (same level only) or [`BarnesHut`] (quad tree, O(n log n)).
//! 3. **Springs:** Hookean springs along connected edges; a curved edge is two
//!    half-length springs through its via-node.
//!
//! Coincident bodies are nudged apart by less than one unit before repulsion
//! runs. All randomness comes from the caller's seeded RNG.

mod barnes_hut;
mod hierarchical;
mod integrator;
mod repulsion;
mod springs;

pub use barnes_hut::{BarnesHut, BarnesHutTree};
pub use hierarchical::HierarchicalRepulsion;
pub use integrator::{Integrator, TIMESTEP};
pub use repulsion::Repulsion;
pub use springs::Spring;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use rand::Rng;
use rand::rngs::StdRng;

use crate::config::{NetworkOptions, PhysicsKind};
use crate::graph::{Body, Edge, EdgeId, GraphStore, NodeId};

/// Identity of a simulated body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BodyKey {
    Node(NodeId),
    /// The via-node carried by a curved edge.
    Via(EdgeId),
}

/// A body plus the node attributes the force passes read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub key: BodyKey,
    pub body: Body,
    pub cluster_size: usize,
    pub level: Option<i32>,
}

impl Particle {
    pub fn node(id: NodeId, body: Body) -> Self {
        Self {
            key: BodyKey::Node(id),
            body,
            cluster_size: 1,
            level: None,
        }
    }

    pub fn via(edge: EdgeId, body: Body) -> Self {
        Self {
            key: BodyKey::Via(edge),
            body,
            cluster_size: 1,
            level: None,
        }
    }

    #[inline]
    pub fn is_via(&self) -> bool {
        matches!(self.key, BodyKey::Via(_))
    }
}

/// Strategy computing mutual repulsion between particles.
pub trait RepulsionSolver: fmt::Debug {
    /// Add repulsive forces to every particle's accumulator.
    fn apply(&self, particles: &mut [Particle], rng: &mut StdRng);
}

/// One tick's worth of bodies and springs.
#[derive(Debug, Clone, Default)]
pub struct ForceSystem {
    pub particles: Vec<Particle>,
    pub springs: Vec<Spring>,
}

impl ForceSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a particle, returning its index.
    pub fn push(&mut self, particle: Particle) -> usize {
        self.particles.push(particle);
        self.particles.len() - 1
    }

    /// Write positions, velocities and forces back to their owners.
    pub fn scatter(&self, store: &mut GraphStore, vias: &mut BTreeMap<EdgeId, Body>) {
        for particle in &self.particles {
            match particle.key {
                BodyKey::Node(id) => {
                    if let Some(node) = store.node_mut(id) {
                        node.body = particle.body;
                    }
                }
                BodyKey::Via(id) => {
                    if let Some(body) = vias.get_mut(&id) {
                        *body = particle.body;
                    }
                }
            }
        }
    }
}

/// Resolved force constants plus the active repulsion strategy.
#[derive(Debug)]
pub struct ForceModel {
    pub kind: PhysicsKind,
    pub central_gravity: f64,
    pub spring_length: f64,
    pub spring_constant: f64,
    pub damping: f64,
    /// Extra rest length per absorbed node.
    pub edge_growth: f64,
    solver: Box<dyn RepulsionSolver>,
}

impl ForceModel {
    /// Build the model for the strategy the options select.
    pub fn from_options(options: &NetworkOptions) -> Self {
        let physics = options.active_physics();
        let clustering = &options.clustering;
        let solver: Box<dyn RepulsionSolver> = match physics.kind {
            PhysicsKind::BarnesHut => Box::new(BarnesHut {
                gravitational_constant: physics.gravitational_constant,
                theta: physics.theta,
            }),
            PhysicsKind::Repulsion => Box::new(Repulsion {
                node_distance: physics.node_distance,
                force_amplification: clustering.force_amplification,
                distance_amplification: clustering.distance_amplification,
            }),
            PhysicsKind::HierarchicalRepulsion => Box::new(HierarchicalRepulsion {
                node_distance: physics.node_distance,
            }),
        };
        Self {
            kind: physics.kind,
            central_gravity: physics.central_gravity,
            spring_length: physics.spring_length,
            spring_constant: physics.spring_constant,
            damping: physics.damping,
            edge_growth: clustering.edge_growth,
            solver,
        }
    }

    /// Spring rest length for an edge between bodies of the given cluster sizes.
    pub fn rest_length(&self, edge: &Edge, size_a: usize, size_b: usize) -> f64 {
        let base = edge.length.unwrap_or(self.spring_length);
        let combined = (size_a + size_b).saturating_sub(2) as f64;
        base + combined * self.edge_growth
    }

    /// Collect the active nodes, via-nodes and springs of one tick.
    ///
    /// Edges whose endpoints are not both active in `store` are skipped. An
    /// edge with an entry in `vias` is simulated as two half-springs.
    pub fn gather<'e>(
        &self,
        store: &GraphStore,
        edges: impl IntoIterator<Item = &'e Edge>,
        vias: &BTreeMap<EdgeId, Body>,
    ) -> ForceSystem {
        let mut system = ForceSystem::new();
        let mut index: HashMap<BodyKey, usize> = HashMap::with_capacity(store.node_count());

        for node in store.nodes() {
            let slot = system.push(Particle {
                key: BodyKey::Node(node.id),
                body: node.body,
                cluster_size: node.cluster_size,
                level: node.level,
            });
            index.insert(BodyKey::Node(node.id), slot);
        }

        for edge in edges {
            if edge.is_self_loop() {
                continue;
            }
            let (Some(&to), Some(&from)) = (
                index.get(&BodyKey::Node(edge.to_id)),
                index.get(&BodyKey::Node(edge.from_id)),
            ) else {
                continue;
            };
            let length = self.rest_length(
                edge,
                system.particles[to].cluster_size,
                system.particles[from].cluster_size,
            );
            match vias.get(&edge.id) {
                Some(body) => {
                    let via = system.push(Particle::via(edge.id, *body));
                    index.insert(BodyKey::Via(edge.id), via);
                    system.springs.push(Spring::new(to, via, 0.5 * length, self.spring_constant));
                    system.springs.push(Spring::new(via, from, 0.5 * length, self.spring_constant));
                }
                None => system.springs.push(Spring::new(to, from, length, self.spring_constant)),
            }
        }
        system
    }

    /// Accumulate every force on the system.
    ///
    /// `gravity` is false outside the default sector.
    pub fn compute_forces(&self, system: &mut ForceSystem, gravity: bool, rng: &mut StdRng) {
        for particle in &mut system.particles {
            particle.body.fx = 0.0;
            particle.body.fy = 0.0;
            if gravity && !particle.is_via() {
                particle.body.fx = -self.central_gravity * particle.body.x;
                particle.body.fy = -self.central_gravity * particle.body.y;
            }
        }

        separate_coincident(&mut system.particles, rng);
        self.solver.apply(&mut system.particles, rng);

        match self.kind {
            PhysicsKind::HierarchicalRepulsion => {
                springs::apply_hierarchical(&system.springs, &mut system.particles)
            }
            _ => springs::apply(&system.springs, &mut system.particles),
        }
    }
}

/// Nudge particles that share a position by a random offset below one unit.
pub fn separate_coincident(particles: &mut [Particle], rng: &mut StdRng) {
    let mut seen: HashSet<(u64, u64)> = HashSet::with_capacity(particles.len());
    for particle in particles.iter_mut() {
        let body = &mut particle.body;
        while !seen.insert((body.x.to_bits(), body.y.to_bits())) {
            body.x += rng.random::<f64>();
            body.y += rng.random::<f64>();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;
    use rand::SeedableRng;

    fn two_node_store(distance: f64) -> GraphStore {
        let mut store = GraphStore::new();
        let mut a = Node::new(NodeId(1), -0.5 * distance, 0.0);
        let mut b = Node::new(NodeId(2), 0.5 * distance, 0.0);
        a.dynamic_edges.push(EdgeId(1));
        b.dynamic_edges.push(EdgeId(1));
        store.insert_node(a);
        store.insert_node(b);
        store.insert_edge(Edge::new(EdgeId(1), NodeId(1), NodeId(2)));
        store
    }

    #[test]
    fn test_gather_straight_and_curved_edges() {
        let options = NetworkOptions::default();
        let model = ForceModel::from_options(&options);
        let store = two_node_store(100.0);

        let system = model.gather(&store, store.edges(), &BTreeMap::new());
        assert_eq!(system.particles.len(), 2);
        assert_eq!(system.springs.len(), 1);
        assert_eq!(system.springs[0].length, 95.0);

        let mut vias = BTreeMap::new();
        vias.insert(EdgeId(1), Body::at(0.0, 0.0));
        let system = model.gather(&store, store.edges(), &vias);
        assert_eq!(system.particles.len(), 3);
        assert!(system.particles[2].is_via());
        assert_eq!(system.springs.len(), 2);
        assert_eq!(system.springs[0].length, 47.5);
    }

    #[test]
    fn test_rest_length_grows_with_cluster_size() {
        let model = ForceModel::from_options(&NetworkOptions::default());
        let mut edge = Edge::new(EdgeId(1), NodeId(1), NodeId(2));
        assert_eq!(model.rest_length(&edge, 1, 1), 95.0);
        assert_eq!(model.rest_length(&edge, 3, 2), 95.0 + 3.0 * 20.0);
        edge.length = Some(10.0);
        assert_eq!(model.rest_length(&edge, 1, 1), 10.0);
    }

    #[test]
    fn test_gravity_skips_via_nodes() {
        let mut options = NetworkOptions::default();
        options.physics.barnes_hut.gravitational_constant = 0.0;
        let model = ForceModel::from_options(&options);
        let mut system = ForceSystem::new();
        system.push(Particle::node(NodeId(1), Body::at(100.0, -50.0)));
        system.push(Particle::via(EdgeId(1), Body::at(300.0, 300.0)));
        let mut rng = StdRng::seed_from_u64(1);

        model.compute_forces(&mut system, true, &mut rng);
        assert_eq!(system.particles[0].body.fx, -0.5);
        assert_eq!(system.particles[0].body.fy, 0.25);
        assert_eq!(system.particles[1].body.fx, 0.0);

        model.compute_forces(&mut system, false, &mut rng);
        assert_eq!(system.particles[0].body.fx, 0.0);
    }

    #[test]
    fn test_coincident_particles_are_separated() {
        let mut particles = vec![
            Particle::node(NodeId(1), Body::at(5.0, 5.0)),
            Particle::node(NodeId(2), Body::at(5.0, 5.0)),
            Particle::node(NodeId(3), Body::at(5.0, 5.0)),
        ];
        let mut rng = StdRng::seed_from_u64(7);
        separate_coincident(&mut particles, &mut rng);

        assert_eq!((particles[0].body.x, particles[0].body.y), (5.0, 5.0));
        for p in &particles[1..] {
            assert!(p.body.x >= 5.0 && p.body.x < 7.0);
            assert!(p.body.y >= 5.0 && p.body.y < 7.0);
        }
        assert_ne!(
            (particles[1].body.x, particles[1].body.y),
            (particles[2].body.x, particles[2].body.y)
        );
    }

    #[test]
    fn test_scatter_writes_back() {
        let mut store = two_node_store(10.0);
        let mut vias = BTreeMap::new();
        vias.insert(EdgeId(1), Body::at(0.0, 0.0));
        let model = ForceModel::from_options(&NetworkOptions::default());
        let mut system = model.gather(&store, store.edges(), &vias);
        system.particles[0].body.x = 42.0;
        system.particles[2].body.y = 9.0;
        system.scatter(&mut store, &mut vias);
        assert_eq!(store.node(NodeId(1)).unwrap().body.x, 42.0);
        assert_eq!(vias[&EdgeId(1)].y, 9.0);
    }
}
