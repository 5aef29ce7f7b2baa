//! Frame pacing for the animation loop.
//!
//! The host calls the engine once per animation frame. Each frame runs at
//! least one physics tick while the system moves, then keeps ticking while
//! the time spent stays under 90% of the frame budget left after the last
//! render, up to `maxPhysicsTicksPerRender`.

use serde::Serialize;

use crate::config::NetworkOptions;

/// Milliseconds from some fixed origin.
pub trait TimeSource {
    fn now_ms(&self) -> f64;
}

/// Monotonic time from `std::time::Instant`.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Clone, Copy)]
pub struct InstantSource {
    start: std::time::Instant,
}

#[cfg(not(target_arch = "wasm32"))]
impl InstantSource {
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Default for InstantSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl TimeSource for InstantSource {
    fn now_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

/// Wall-clock time from `Date.now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateSource;

impl TimeSource for DateSource {
    fn now_ms(&self) -> f64 {
        js_sys::Date::now()
    }
}

/// What one animation frame did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameReport {
    /// Physics ticks run this frame.
    pub ticks: u32,
    /// Whether the host should request another frame.
    pub schedule_next: bool,
    /// Set once when the system settles: ticks since it last started moving.
    pub stabilized: Option<usize>,
}

/// Per-frame budget and the navigation increments applied each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationClock {
    render_timestep: f64,
    max_ticks: u32,
    last_render_time: f64,
    iterations: usize,
    /// Canvas pixels panned per frame along x.
    pub x_increment: f64,
    /// Canvas pixels panned per frame along y.
    pub y_increment: f64,
    /// Relative zoom per frame.
    pub zoom_increment: f64,
}

impl SimulationClock {
    pub fn new(options: &NetworkOptions) -> Self {
        Self {
            render_timestep: options.render_timestep,
            max_ticks: options.max_physics_ticks_per_render.max(1),
            last_render_time: 0.0,
            iterations: 0,
            x_increment: 0.0,
            y_increment: 0.0,
            zoom_increment: 0.0,
        }
    }

    /// Pick up changed pacing options, keeping the running counters.
    pub fn configure(&mut self, options: &NetworkOptions) {
        self.render_timestep = options.render_timestep;
        self.max_ticks = options.max_physics_ticks_per_render.max(1);
    }

    /// Render time the host measured for the last frame, in milliseconds.
    pub fn report_render_time(&mut self, ms: f64) {
        if ms.is_finite() && ms >= 0.0 {
            self.last_render_time = ms;
        }
    }

    /// True when another tick fits after `ticks` ticks took `elapsed_ms`.
    pub fn has_budget(&self, elapsed_ms: f64, ticks: u32) -> bool {
        ticks < self.max_ticks && elapsed_ms < 0.9 * (self.render_timestep - self.last_render_time)
    }

    /// Run ticks for one frame. `tick` returns whether the system is still
    /// moving; the frame stops as soon as it is not.
    pub fn run_frame<E, S: TimeSource + ?Sized>(
        &self,
        time: &S,
        mut tick: impl FnMut() -> Result<bool, E>,
    ) -> Result<u32, E> {
        let start = time.now_ms();
        let mut ticks = 0;
        loop {
            let moving = tick()?;
            ticks += 1;
            if !moving || !self.has_budget(time.now_ms() - start, ticks) {
                return Ok(ticks);
            }
        }
    }

    #[inline]
    pub fn is_navigating(&self) -> bool {
        self.x_increment != 0.0 || self.y_increment != 0.0 || self.zoom_increment != 0.0
    }

    /// Close a frame: decide on the next one and detect settling.
    pub fn finish_frame(&mut self, ticks: u32, moving: bool) -> FrameReport {
        self.iterations += ticks as usize;
        let stabilized = if !moving && self.iterations > 0 {
            Some(std::mem::take(&mut self.iterations))
        } else {
            None
        };
        FrameReport {
            ticks,
            schedule_next: moving || self.is_navigating(),
            stabilized,
        }
    }
}
