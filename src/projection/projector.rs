use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use super::{FloorPoint, Homography, PixelPoint};
use crate::error::{FusionError, Result};

/// Axis-aligned extent of the floor plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FloorBounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl FloorBounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn contains(&self, p: &FloorPoint) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }

    pub fn validate(&self) -> Result<()> {
        let values = [self.min_x, self.min_y, self.max_x, self.max_y];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(FusionError::calibration("floor bounds must be finite"));
        }
        if self.min_x >= self.max_x || self.min_y >= self.max_y {
            return Err(FusionError::calibration(format!(
                "floor bounds are empty: ({}, {}) .. ({}, {})",
                self.min_x, self.min_y, self.max_x, self.max_y
            )));
        }
        Ok(())
    }
}

/// Result of projecting a pixel onto the floor plan.
///
/// Points outside the floor bounds are still returned, flagged `out_of_bounds`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Projection {
    pub point: FloorPoint,
    pub out_of_bounds: bool,
}

/// Maps pixel points to floor-plan points using a homography loaded once.
#[derive(Debug)]
pub struct Projector {
    homography: OnceLock<Homography>,
    bounds: FloorBounds,
}

impl Projector {
    /// Projector with no homography loaded yet. Projecting fails until [`Projector::load`].
    pub fn new(bounds: FloorBounds) -> Self {
        Self {
            homography: OnceLock::new(),
            bounds,
        }
    }

    pub fn with_homography(homography: Homography, bounds: FloorBounds) -> Self {
        let projector = Self::new(bounds);
        let _ = projector.homography.set(homography);
        projector
    }

    /// Install the homography. Recalibration is not supported: a second load fails.
    pub fn load(&self, homography: Homography) -> Result<()> {
        self.homography
            .set(homography)
            .map_err(|_| FusionError::calibration("homography is already loaded"))
    }

    pub fn is_loaded(&self) -> bool {
        self.homography.get().is_some()
    }

    pub fn bounds(&self) -> &FloorBounds {
        &self.bounds
    }

    fn homography(&self) -> Result<&Homography> {
        self.homography
            .get()
            .ok_or_else(|| FusionError::calibration("no homography loaded"))
    }

    pub fn project(&self, pixel: PixelPoint) -> Result<Projection> {
        let point = self.homography()?.to_floor(pixel)?;
        Ok(Projection {
            point,
            out_of_bounds: !self.bounds.contains(&point),
        })
    }

    pub fn inverse_project(&self, floor: FloorPoint) -> Result<PixelPoint> {
        self.homography()?.to_pixel(floor)
    }
}
