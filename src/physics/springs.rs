//! Hookean edge springs.

use super::Particle;

/// Spring between two particles of a [`super::ForceSystem`], by index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spring {
    pub a: usize,
    pub b: usize,
    pub length: f64,
    pub constant: f64,
}

impl Spring {
    pub fn new(a: usize, b: usize, length: f64, constant: f64) -> Self {
        Self { a, b, length, constant }
    }

    /// Force on `a` (the force on `b` is its negation).
    fn force(&self, particles: &[Particle]) -> (f64, f64) {
        let pa = &particles[self.a].body;
        let pb = &particles[self.b].body;
        let dx = pa.x - pb.x;
        let dy = pa.y - pb.y;
        let mut distance = dx.hypot(dy);
        if distance == 0.0 {
            distance = 0.01;
        }
        let magnitude = self.constant * (self.length - distance) / distance;
        (dx * magnitude, dy * magnitude)
    }
}

/// Plain springs: equal and opposite along each edge.
pub fn apply(springs: &[Spring], particles: &mut [Particle]) {
    for spring in springs {
        let (fx, fy) = spring.force(particles);
        particles[spring.a].body.fx += fx;
        particles[spring.a].body.fy += fy;
        particles[spring.b].body.fx -= fx;
        particles[spring.b].body.fy -= fy;
    }
}

/// Springs for level-based layouts.
///
/// Springs crossing levels go to a separate accumulator clamped to +-1 per
/// axis; springs within a level act at half strength. The mean force is then
/// removed so the set does not drift.
pub fn apply_hierarchical(springs: &[Spring], particles: &mut [Particle]) {
    let mut cross = vec![(0.0_f64, 0.0_f64); particles.len()];

    for spring in springs {
        let (fx, fy) = spring.force(particles);
        if particles[spring.a].level != particles[spring.b].level {
            cross[spring.a].0 += fx;
            cross[spring.a].1 += fy;
            cross[spring.b].0 -= fx;
            cross[spring.b].1 -= fy;
        } else {
            particles[spring.a].body.fx += 0.5 * fx;
            particles[spring.a].body.fy += 0.5 * fy;
            particles[spring.b].body.fx -= 0.5 * fx;
            particles[spring.b].body.fy -= 0.5 * fy;
        }
    }

    let mut total = (0.0, 0.0);
    for (particle, (sx, sy)) in particles.iter_mut().zip(cross) {
        particle.body.fx += sx.clamp(-1.0, 1.0);
        particle.body.fy += sy.clamp(-1.0, 1.0);
        total.0 += particle.body.fx;
        total.1 += particle.body.fy;
    }

    if particles.is_empty() {
        return;
    }
    let n = particles.len() as f64;
    let (cx, cy) = (total.0 / n, total.1 / n);
    for particle in particles.iter_mut() {
        particle.body.fx -= cx;
        particle.body.fy -= cy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Body, NodeId};
    use float_cmp::approx_eq;

    fn pair(distance: f64) -> Vec<Particle> {
        vec![
            Particle::node(NodeId(1), Body::at(-0.5 * distance, 0.0)),
            Particle::node(NodeId(2), Body::at(0.5 * distance, 0.0)),
        ]
    }

    #[test]
    fn test_stretched_spring_pulls_together() {
        let mut particles = pair(200.0);
        apply(&[Spring::new(0, 1, 100.0, 0.05)], &mut particles);
        // k * (L - d) / d * dx = 0.05 * -100 / 200 * -200
        assert!(approx_eq!(f64, particles[0].body.fx, 5.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, particles[1].body.fx, -5.0, epsilon = 1e-9));
    }

    #[test]
    fn test_compressed_spring_pushes_apart() {
        let mut particles = pair(50.0);
        apply(&[Spring::new(0, 1, 100.0, 0.05)], &mut particles);
        assert!(particles[0].body.fx < 0.0);
        assert!(particles[1].body.fx > 0.0);
    }

    #[test]
    fn test_zero_length_spring_is_finite() {
        let mut particles = pair(0.0);
        apply(&[Spring::new(0, 1, 100.0, 0.05)], &mut particles);
        assert!(particles[0].body.fx.is_finite());
    }

    #[test]
    fn test_hierarchical_cross_level_clamped() {
        let mut particles = pair(1000.0);
        particles[0].level = Some(0);
        particles[1].level = Some(1);
        apply_hierarchical(&[Spring::new(0, 1, 100.0, 0.05)], &mut particles);
        assert_eq!(particles[0].body.fx, 1.0);
        assert_eq!(particles[1].body.fx, -1.0);
    }

    #[test]
    fn test_hierarchical_removes_drift() {
        let mut particles = pair(200.0);
        particles.push(Particle::node(NodeId(3), Body::at(0.0, 50.0)));
        particles[0].body.fx = 3.0;
        apply_hierarchical(&[Spring::new(0, 1, 100.0, 0.05)], &mut particles);
        let net: f64 = particles.iter().map(|p| p.body.fx).sum();
        assert!(approx_eq!(f64, net, 0.0, epsilon = 1e-12));
        // half strength within a level: 3.0 + 2.5, less the mean force of 1.0
        assert!(approx_eq!(f64, particles[0].body.fx, 4.5, epsilon = 1e-12));
    }
}
