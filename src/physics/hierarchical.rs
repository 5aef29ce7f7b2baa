//! Repulsion between nodes of the same hierarchical level.

use rand::rngs::StdRng;

use super::{Particle, RepulsionSolver};

const STEEPNESS: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HierarchicalRepulsion {
    pub node_distance: f64,
}

impl HierarchicalRepulsion {
    /// Quadratic falloff reaching zero at `node_distance`.
    pub fn magnitude(&self, distance: f64) -> f64 {
        if distance < self.node_distance {
            (STEEPNESS * self.node_distance).powi(2) - (STEEPNESS * distance).powi(2)
        } else {
            0.0
        }
    }
}

impl RepulsionSolver for HierarchicalRepulsion {
    fn apply(&self, particles: &mut [Particle], _rng: &mut StdRng) {
        for i in 0..particles.len() {
            for j in (i + 1)..particles.len() {
                let (a, b) = (&particles[i], &particles[j]);
                // unlevelled nodes share one implicit level
                if a.level != b.level {
                    continue;
                }
                let dx = b.body.x - a.body.x;
                let dy = b.body.y - a.body.y;
                let mut distance = dx.hypot(dy);
                let force = self.magnitude(distance);
                if force == 0.0 {
                    continue;
                }
                if distance == 0.0 {
                    distance = 0.01;
                }
                let (fx, fy) = (dx * force / distance, dy * force / distance);
                particles[i].body.fx -= fx;
                particles[i].body.fy -= fy;
                particles[j].body.fx += fx;
                particles[j].body.fy += fy;
            }
        }
    }
}
