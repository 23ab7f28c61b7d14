//! Startup calibration: homography, floor bounds and zone layout.
//!
//! Calibration is loaded once. Any problem with it is fatal: the engine
//! refuses to start rather than track carriers on a wrong floor plan.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FusionError, Result};
use crate::projection::{FloorBounds, FloorPoint, Homography, PixelPoint, Projector};
use crate::zones::Zone;

/// How the homography is supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HomographySource {
    /// Row-major 3x3 pixel → floor matrix.
    Matrix { matrix: [[f64; 3]; 3] },
    /// Four reference points seen in the image and measured on the floor.
    Correspondences {
        pixel: [[f64; 2]; 4],
        floor: [[f64; 2]; 4],
    },
}

impl HomographySource {
    pub fn build(&self) -> Result<Homography> {
        match self {
            HomographySource::Matrix { matrix } => Homography::from_matrix(*matrix),
            HomographySource::Correspondences { pixel, floor } => Homography::from_correspondences(
                &pixel.map(|[x, y]| PixelPoint::new(x, y)),
                &floor.map(|[x, y]| FloorPoint::new(x, y)),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub homography: HomographySource,
    pub floor_bounds: FloorBounds,
    #[serde(default)]
    pub zones: Vec<Zone>,
}

impl Calibration {
    pub fn from_json(json: &str) -> Result<Self> {
        let calibration: Self = serde_json::from_str(json)
            .map_err(|e| FusionError::calibration(format!("malformed calibration: {e}")))?;
        calibration.validate()?;
        Ok(calibration)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            FusionError::calibration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.homography.build()?;
        self.floor_bounds.validate()?;
        let mut names = HashSet::new();
        for zone in &self.zones {
            zone.validate()?;
            if !names.insert(zone.name.as_str()) {
                return Err(FusionError::calibration(format!(
                    "duplicate zone name {:?}",
                    zone.name
                )));
            }
        }
        Ok(())
    }

    /// A projector with this calibration's homography loaded.
    pub fn projector(&self) -> Result<Projector> {
        let projector = Projector::new(self.floor_bounds);
        projector.load(self.homography.build()?)?;
        Ok(projector)
    }
}
