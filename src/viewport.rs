//! Camera state shared between the host and the engine.
//!
//! The host owns the canvas; the engine owns scale and translation because
//! zooming drives clustering. Canvas coordinates map to world coordinates as
//! `world = (canvas - translation) / scale`.

use serde::{Deserialize, Serialize};

/// Lower bound on the zoom scale.
pub const MIN_SCALE: f64 = 1e-5;
/// Upper bound on the zoom scale.
pub const MAX_SCALE: f64 = 10.0;

/// Which way a zoom went, as seen by the coarsener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomDirection {
    In,
    Out,
    /// Compare against the scale of the previous clustering update.
    Detect,
}

/// Canvas size, translation and scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub canvas_width: f64,
    pub canvas_height: f64,
    pub translation_x: f64,
    pub translation_y: f64,
    pub scale: f64,
    /// World point of the last zoom; clusters only open near it.
    pub area_center_x: f64,
    pub area_center_y: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            canvas_width: 800.0,
            canvas_height: 600.0,
            translation_x: 400.0,
            translation_y: 300.0,
            scale: 1.0,
            area_center_x: 0.0,
            area_center_y: 0.0,
        }
    }
}

impl Viewport {
    #[inline]
    pub fn canvas_to_world(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.translation_x) / self.scale,
            (y - self.translation_y) / self.scale,
        )
    }

    #[inline]
    pub fn world_to_canvas(&self, x: f64, y: f64) -> (f64, f64) {
        (
            x * self.scale + self.translation_x,
            y * self.scale + self.translation_y,
        )
    }

    /// Resize the canvas, keeping the world point at its center fixed.
    pub fn set_canvas_size(&mut self, width: f64, height: f64) {
        let (cx, cy) = self.canvas_to_world(0.5 * self.canvas_width, 0.5 * self.canvas_height);
        self.canvas_width = width.max(0.0);
        self.canvas_height = height.max(0.0);
        self.translation_x = 0.5 * self.canvas_width - cx * self.scale;
        self.translation_y = 0.5 * self.canvas_height - cy * self.scale;
    }

    /// Zoom to `scale` keeping the canvas point `pointer` fixed on screen.
    ///
    /// Returns the clamped scale. The world point under the pointer becomes
    /// the active-area center.
    pub fn zoom(&mut self, scale: f64, pointer: (f64, f64)) -> f64 {
        let scale = if scale.is_finite() {
            scale.clamp(MIN_SCALE, MAX_SCALE)
        } else {
            self.scale
        };
        let (wx, wy) = self.canvas_to_world(pointer.0, pointer.1);
        self.scale = scale;
        self.translation_x = pointer.0 - wx * scale;
        self.translation_y = pointer.1 - wy * scale;
        self.area_center_x = wx;
        self.area_center_y = wy;
        scale
    }

    /// Pan by a canvas-space offset.
    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.translation_x += dx;
        self.translation_y += dy;
    }

    /// Fit a world bounding box into the canvas with a 10% margin.
    ///
    /// Never zooms in past 1.0. A degenerate canvas resets to the identity
    /// transform.
    pub fn fit(&mut self, bounds: (f64, f64, f64, f64)) {
        let (min_x, min_y, max_x, max_y) = bounds;
        if self.canvas_width <= 0.0 || self.canvas_height <= 0.0 {
            self.scale = 1.0;
            self.translation_x = 0.0;
            self.translation_y = 0.0;
            return;
        }
        let width = 1.1 * (max_x - min_x);
        let height = 1.1 * (max_y - min_y);
        let zoom_x = if width > 0.0 { self.canvas_width / width } else { f64::INFINITY };
        let zoom_y = if height > 0.0 { self.canvas_height / height } else { f64::INFINITY };
        let scale = zoom_x.min(zoom_y).min(1.0).max(MIN_SCALE);

        let center_x = 0.5 * (min_x + max_x);
        let center_y = 0.5 * (min_y + max_y);
        self.scale = scale;
        self.translation_x = 0.5 * self.canvas_width - center_x * scale;
        self.translation_y = 0.5 * self.canvas_height - center_y * scale;
        self.area_center_x = center_x;
        self.area_center_y = center_y;
    }

    /// World-space rectangle currently on screen: (min_x, min_y, max_x, max_y).
    pub fn visible_rect(&self) -> (f64, f64, f64, f64) {
        let (min_x, min_y) = self.canvas_to_world(0.0, 0.0);
        let (max_x, max_y) = self.canvas_to_world(self.canvas_width, self.canvas_height);
        (min_x, min_y, max_x, max_y)
    }

    /// True when a world point lies in the square of half-size
    /// `box_size / scale` around the active-area center.
    pub fn in_active_area(&self, x: f64, y: f64, box_size: f64) -> bool {
        let reach = box_size / self.scale;
        (x - self.area_center_x).abs() <= reach && (y - self.area_center_y).abs() <= reach
    }

    /// True when a world-space extent covers more than `fraction` of the
    /// canvas in either dimension.
    pub fn covers(&self, width: f64, height: f64, fraction: f64) -> bool {
        width * self.scale > fraction * self.canvas_width
            || height * self.scale > fraction * self.canvas_height
    }
}
