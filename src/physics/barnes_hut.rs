//! Barnes-Hut quad tree for O(n log n) gravitational repulsion.
//!
//! # Algorithm Overview
//!
//! 1. Pad the bounding box of all particles into a square (minimum size
//!    1e-5) and split the root into four quadrants.
//! 2. Insert each particle. Every region on the way down absorbs its mass
//!    into a running center of mass. A quadrant holding one particle splits
//!    when a second one arrives; a second particle at the exact same point is
//!    jittered by less than one unit and inserted again.
//! 3. For each particle, walk the root's four quadrants. A region far enough
//!    away (`distance / size > theta`, theta stored inverted) acts as one
//!    pseudo-particle; otherwise its quadrants are visited. Single-particle
//!    regions always act directly.
//!
//! The pairwise law is `G * M * m / d^3 * (center - position)`, so a negative
//! `G` repels.
//!
//! Regions live in a flat arena: the four children of a split region are
//! stored contiguously in NW, NE, SW, SE order.

use rand::Rng;
use rand::rngs::StdRng;

use super::{Particle, RepulsionSolver};

const MINIMUM_TREE_SIZE: f64 = 1e-5;
/// Below this a region cannot separate two points; they are treated as
/// coincident.
const MINIMUM_REGION_SIZE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Content {
    Empty,
    /// Index of the single particle in the region.
    Leaf(usize),
    /// Arena index of the first of four child regions.
    Split(usize),
}

#[derive(Debug, Clone, Copy)]
struct Region {
    min_x: f64,
    min_y: f64,
    size: f64,
    /// Reciprocal of `size`.
    calc_size: f64,
    mass: f64,
    center_x: f64,
    center_y: f64,
    content: Content,
}

impl Region {
    fn new(min_x: f64, min_y: f64, size: f64, calc_size: f64) -> Self {
        Self {
            min_x,
            min_y,
            size,
            calc_size,
            mass: 0.0,
            center_x: 0.0,
            center_y: 0.0,
            content: Content::Empty,
        }
    }

    fn add_mass(&mut self, x: f64, y: f64, mass: f64) {
        if self.mass == 0.0 {
            self.center_x = x;
            self.center_y = y;
            self.mass = mass;
            return;
        }
        let total = self.mass + mass;
        self.center_x = (self.center_x * self.mass + x * mass) / total;
        self.center_y = (self.center_y * self.mass + y * mass) / total;
        self.mass = total;
    }

    /// Quadrant offset (0..4) of a point: west/east then north/south.
    fn quadrant(&self, x: f64, y: f64) -> usize {
        let half = 0.5 * self.size;
        let east = usize::from(x >= self.min_x + half);
        let south = usize::from(y >= self.min_y + half);
        south * 2 + east
    }
}

/// The tree built over one tick's particles.
#[derive(Debug, Clone)]
pub struct BarnesHutTree {
    regions: Vec<Region>,
}

impl BarnesHutTree {
    /// Build the tree. Coincident particles are moved in place.
    pub fn build(particles: &mut [Particle], rng: &mut StdRng) -> Self {
        let mut tree = Self {
            regions: Vec::with_capacity(4 * particles.len() + 5),
        };
        if particles.is_empty() {
            return tree;
        }

        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for p in particles.iter() {
            min_x = min_x.min(p.body.x);
            min_y = min_y.min(p.body.y);
            max_x = max_x.max(p.body.x);
            max_y = max_y.max(p.body.y);
        }

        // pad the short side so the root is square
        let width = max_x - min_x;
        let height = max_y - min_y;
        let diff = (width - height).abs();
        if width > height {
            min_y -= 0.5 * diff;
            max_y += 0.5 * diff;
        } else {
            min_x -= 0.5 * diff;
            max_x += 0.5 * diff;
        }

        let size = MINIMUM_TREE_SIZE.max(max_x - min_x);
        let center_x = 0.5 * (min_x + max_x);
        let center_y = 0.5 * (min_y + max_y);
        tree.regions.push(Region::new(
            center_x - 0.5 * size,
            center_y - 0.5 * size,
            size,
            1.0 / size,
        ));
        tree.split(0);

        for index in 0..particles.len() {
            tree.insert(0, index, particles, rng, true);
        }
        tree
    }

    /// Subdivide a region, pushing its single particle (if any) down a level.
    fn split(&mut self, region: usize) -> Option<usize> {
        let parent = self.regions[region];
        let half = 0.5 * parent.size;
        let calc = 2.0 * parent.calc_size;
        let first = self.regions.len();
        for (dx, dy) in [(0.0, 0.0), (half, 0.0), (0.0, half), (half, half)] {
            self.regions
                .push(Region::new(parent.min_x + dx, parent.min_y + dy, half, calc));
        }
        let previous = match parent.content {
            Content::Leaf(index) => Some(index),
            _ => None,
        };
        let node = &mut self.regions[region];
        node.content = Content::Split(first);
        if previous.is_some() {
            node.mass = 0.0;
            node.center_x = 0.0;
            node.center_y = 0.0;
        }
        previous
    }

    /// Place particle `index` below `region` (which must be split).
    fn insert(
        &mut self,
        region: usize,
        index: usize,
        particles: &mut [Particle],
        rng: &mut StdRng,
        update_mass: bool,
    ) {
        let body = particles[index].body;
        if update_mass {
            self.regions[region].add_mass(body.x, body.y, body.mass);
        }
        let Content::Split(first) = self.regions[region].content else {
            return;
        };
        let child = first + self.regions[region].quadrant(body.x, body.y);

        match self.regions[child].content {
            Content::Empty => {
                self.regions[child].content = Content::Leaf(index);
                self.regions[child].add_mass(body.x, body.y, body.mass);
            }
            Content::Leaf(other) => {
                let occupant = particles[other].body;
                let coincident = occupant.x == body.x && occupant.y == body.y;
                if coincident || self.regions[child].size < MINIMUM_REGION_SIZE {
                    particles[index].body.x += rng.random::<f64>();
                    particles[index].body.y += rng.random::<f64>();
                    self.insert(region, index, particles, rng, false);
                } else {
                    if let Some(previous) = self.split(child) {
                        self.insert(child, previous, particles, rng, true);
                    }
                    self.insert(child, index, particles, rng, true);
                }
            }
            Content::Split(_) => self.insert(child, index, particles, rng, true),
        }
    }

    /// Total mass under the root.
    pub fn total_mass(&self) -> f64 {
        self.regions.first().map_or(0.0, |root| root.mass)
    }

    /// Center of mass of the root.
    pub fn center_of_mass(&self) -> Option<(f64, f64)> {
        self.regions.first().map(|root| (root.center_x, root.center_y))
    }

    /// Force exerted by the tree on particle `index`.
    pub fn force_on(
        &self,
        index: usize,
        particles: &[Particle],
        gravitational_constant: f64,
        theta: f64,
        rng: &mut StdRng,
    ) -> (f64, f64) {
        let mut force = (0.0, 0.0);
        let Some(Content::Split(first)) = self.regions.first().map(|root| root.content) else {
            return force;
        };
        let mut stack: Vec<usize> = (first..first + 4).collect();
        let body = particles[index].body;

        while let Some(region) = stack.pop() {
            let r = &self.regions[region];
            let (mut dx, mut dy) = (r.center_x - body.x, r.center_y - body.y);
            let mut distance = dx.hypot(dy);
            match r.content {
                Content::Empty => continue,
                Content::Split(children) if distance * r.calc_size <= theta => {
                    stack.extend(children..children + 4);
                    continue;
                }
                Content::Split(_) => {
                    if distance == 0.0 {
                        distance = 0.1 * rng.random::<f64>();
                        dx = distance;
                        dy = 0.0;
                    }
                }
                Content::Leaf(other) => {
                    if other == index {
                        continue;
                    }
                    if distance == 0.0 {
                        distance = 0.5 * rng.random::<f64>();
                        dx = distance;
                        dy = 0.0;
                    }
                }
            }
            if distance == 0.0 {
                continue;
            }
            let magnitude = gravitational_constant * r.mass * body.mass / distance.powi(3);
            force.0 += dx * magnitude;
            force.1 += dy * magnitude;
        }
        force
    }
}

/// Barnes-Hut repulsion strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarnesHut {
    pub gravitational_constant: f64,
    /// Inverted opening criterion.
    pub theta: f64,
}

impl RepulsionSolver for BarnesHut {
    fn apply(&self, particles: &mut [Particle], rng: &mut StdRng) {
        let tree = BarnesHutTree::build(particles, rng);
        for index in 0..particles.len() {
            let (fx, fy) =
                tree.force_on(index, particles, self.gravitational_constant, self.theta, rng);
            particles[index].body.fx += fx;
            particles[index].body.fy += fy;
        }
    }
}
