use serde::{Deserialize, Serialize};

use crate::error::{FusionError, Result};
use crate::projection::FloorPoint;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    Oven,
    Storage,
    Staging,
    Other,
}

/// Named polygon on the floor plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// Unique zone name, used as the zone id in dwell records
    pub name: String,
    pub kind: ZoneKind,
    /// Higher priority wins where zones overlap
    #[serde(default)]
    pub priority: i32,
    /// Polygon vertices in floor-plan coordinates, implicitly closed
    pub polygon: Vec<FloorPoint>,
}

impl Zone {
    pub fn new(name: impl Into<String>, kind: ZoneKind, priority: i32, polygon: Vec<FloorPoint>) -> Self {
        Self {
            name: name.into(),
            kind,
            priority,
            polygon,
        }
    }

    /// Axis-aligned rectangular zone.
    pub fn rectangle(
        name: impl Into<String>,
        kind: ZoneKind,
        priority: i32,
        min: FloorPoint,
        max: FloorPoint,
    ) -> Self {
        let polygon = vec![
            FloorPoint::new(min.x, min.y),
            FloorPoint::new(max.x, min.y),
            FloorPoint::new(max.x, max.y),
            FloorPoint::new(min.x, max.y),
        ];
        Self::new(name, kind, priority, polygon)
    }

    /// Even-odd point-in-polygon test.
    pub fn contains(&self, p: &FloorPoint) -> bool {
        let n = self.polygon.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (a, b) = (&self.polygon[i], &self.polygon[j]);
            if (a.y > p.y) != (b.y > p.y) && p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(FusionError::calibration("zone name must not be empty"));
        }
        if self.polygon.len() < 3 {
            return Err(FusionError::calibration(format!(
                "zone {:?} needs at least 3 vertices",
                self.name
            )));
        }
        if self.polygon.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(FusionError::calibration(format!(
                "zone {:?} has non-finite vertices",
                self.name
            )));
        }
        Ok(())
    }
}

/// The zone that owns `point`: highest priority, then earliest declared.
pub fn authoritative_zone<'a>(zones: &'a [Zone], point: &FloorPoint) -> Option<&'a Zone> {
    zones
        .iter()
        .filter(|z| z.contains(point))
        .fold(None, |best: Option<&Zone>, z| match best {
            Some(b) if b.priority >= z.priority => Some(b),
            _ => Some(z),
        })
}
