//! Pixel to floor-plan coordinate projection.

mod homography;
mod projector;

pub use homography::Homography;
pub use projector::{FloorBounds, Projection, Projector};

use serde::{Deserialize, Serialize};

/// Point in camera pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    #[inline]
    pub fn new(x: impl Into<f64>, y: impl Into<f64>) -> Self {
        Self {
            x: x.into(),
            y: y.into(),
        }
    }
}

/// Point in floor-plan coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FloorPoint {
    pub x: f64,
    pub y: f64,
}

impl FloorPoint {
    #[inline]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn distance(&self, other: &FloorPoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}
