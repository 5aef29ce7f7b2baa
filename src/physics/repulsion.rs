//! Pairwise repulsion with a soft cutoff.
//!
//! Every pair closer than `2 * minDistance` pushes apart. The magnitude is
//! flat at 1.0 inside `0.5 * minDistance` and falls linearly to zero at the
//! cutoff. Clusters reach further and push harder in proportion to the
//! number of nodes they stand for.

use rand::rngs::StdRng;

use super::{Particle, RepulsionSolver};

const SLOPE: f64 = -2.0 / 3.0;
const INTERCEPT: f64 = 4.0 / 3.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Repulsion {
    pub node_distance: f64,
    pub force_amplification: f64,
    pub distance_amplification: f64,
}

impl Repulsion {
    /// Repulsion magnitude at `distance` for a pair whose cluster sizes sum
    /// to `combined + 2`. Zero beyond the cutoff.
    pub fn magnitude(&self, distance: f64, combined: f64) -> f64 {
        let min_distance = self.node_distance * (1.0 + combined * self.distance_amplification);
        if distance >= 2.0 * min_distance {
            return 0.0;
        }
        let force = if distance < 0.5 * min_distance {
            1.0
        } else {
            SLOPE / min_distance * distance + INTERCEPT
        };
        force * (1.0 + combined * self.force_amplification)
    }
}

impl RepulsionSolver for Repulsion {
    fn apply(&self, particles: &mut [Particle], _rng: &mut StdRng) {
        for i in 0..particles.len() {
            for j in (i + 1)..particles.len() {
                let (a, b) = (&particles[i], &particles[j]);
                let dx = b.body.x - a.body.x;
                let dy = b.body.y - a.body.y;
                let distance = dx.hypot(dy);
                let combined = (a.cluster_size + b.cluster_size).saturating_sub(2) as f64;
                let force = self.magnitude(distance, combined);
                if force == 0.0 || distance == 0.0 {
                    continue;
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
