//! Semi-implicit Euler integration and settle detection.

use super::Particle;

/// Fixed simulation timestep.
pub const TIMESTEP: f64 = 0.5;

/// Per-tick integration constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Integrator {
    pub damping: f64,
    /// Per-axis velocity clamp; 0 disables it.
    pub max_velocity: f64,
    /// Screen-space settle threshold.
    pub min_velocity: f64,
}

impl Integrator {
    /// Advance every particle by one timestep.
    pub fn step(&self, particles: &mut [Particle]) {
        for particle in particles {
            particle
                .body
                .discrete_step(TIMESTEP, self.damping, self.max_velocity);
        }
    }

    /// World-space speed below which a body counts as settled at `scale`.
    pub fn settle_threshold(&self, scale: f64) -> f64 {
        self.min_velocity / scale.max(0.05)
    }

    /// True while any particle moves faster than the settle threshold.
    ///
    /// When the threshold exceeds half the velocity clamp no body could ever
    /// be told apart from a settled one, so the system counts as moving.
    pub fn is_moving(&self, particles: &[Particle], scale: f64) -> bool {
        let vmin = self.settle_threshold(scale);
        if self.max_velocity > 0.0 && vmin > 0.5 * self.max_velocity {
            return true;
        }
        particles.iter().any(|particle| particle.body.is_moving(vmin))
    }
}
