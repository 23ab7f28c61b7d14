//! Assignment of QR readings to tracks and sticky-majority carrier resolution.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{CarrierId, QrReading};
use crate::error::{FusionError, Result};
use crate::projection::{FloorPoint, PixelPoint, Projector};
use crate::tracker::Track;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Number of recent readings kept per track.
    pub window_size: usize,
    /// Agreement fraction at which an identity becomes sticky.
    pub sticky_confidence: f32,
    /// Maximum floor distance between a reading and the track it is assigned to.
    pub max_assign_distance: f64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            window_size: 5,
            sticky_confidence: 0.8,
            max_assign_distance: 1.5,
        }
    }
}

impl IdentityConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(FusionError::config("window_size must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.sticky_confidence) {
            return Err(FusionError::config("sticky_confidence must lie in [0, 1]"));
        }
        if !self.max_assign_distance.is_finite() || self.max_assign_distance <= 0.0 {
            return Err(FusionError::config("max_assign_distance must be positive"));
        }
        Ok(())
    }
}

/// Where a live track currently sits on the floor, for reading assignment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPosition {
    pub track_id: u64,
    pub misses: u32,
    pub point: FloorPoint,
}

/// A track's resolved carrier changed.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityChange {
    pub track_id: u64,
    pub previous: Option<CarrierId>,
    pub current: CarrierId,
    pub confidence: f32,
}

pub struct IdentityResolver {
    config: IdentityConfig,
}

impl IdentityResolver {
    pub fn new(config: IdentityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    /// Assign each reading to the nearest track within the distance gate.
    ///
    /// Returns one bucket of readings per entry of `positions`. Readings whose
    /// payload holds no carrier id, or that are too far from every track, are
    /// left unassigned.
    pub fn assign<'a>(
        &self,
        readings: &'a [QrReading],
        positions: &[TrackPosition],
        projector: &Projector,
    ) -> Vec<Vec<&'a QrReading>> {
        let mut buckets = vec![Vec::new(); positions.len()];

        for reading in readings {
            if CarrierId::from_payload(&reading.payload).is_none() {
                debug!(payload = %reading.payload, "ignoring QR payload without carrier id");
                continue;
            }
            let (cx, cy) = reading.region.center();
            let at = match projector.project(PixelPoint::new(cx, cy)) {
                Ok(projection) => projection.point,
                Err(err) => {
                    debug!(error = %err, "cannot place QR reading on the floor");
                    continue;
                }
            };

            let nearest = positions
                .iter()
                .enumerate()
                .map(|(i, p)| (i, p, p.point.distance(&at)))
                .filter(|(_, _, d)| *d <= self.config.max_assign_distance)
                .min_by(|(_, a, da), (_, b, db)| {
                    da.total_cmp(db)
                        .then(a.misses.cmp(&b.misses))
                        .then(a.track_id.cmp(&b.track_id))
                });

            match nearest {
                Some((i, _, _)) => buckets[i].push(reading),
                None => debug!(payload = %reading.payload, "QR reading matched no track"),
            }
        }
        buckets
    }

    /// Fold readings assigned to `track` into its vote window.
    pub fn resolve(&self, track: &mut Track, readings: &[&QrReading]) -> Option<IdentityChange> {
        let previous = track.identity.carrier_id().cloned();

        let mut ordered: Vec<&QrReading> = readings.to_vec();
        ordered.sort_by_key(|r| r.timestamp);
        for reading in ordered {
            let Some(vote) = CarrierId::from_payload(&reading.payload) else {
                continue;
            };
            track
                .identity
                .record(vote, self.config.window_size, self.config.sticky_confidence);
        }

        let current = track.identity.carrier_id()?.clone();
        if previous.as_ref() == Some(&current) {
            return None;
        }
        info!(
            track_id = track.track_id,
            carrier_id = %current,
            previous = ?previous,
            confidence = track.identity.confidence(),
            "carrier identity resolved"
        );
        Some(IdentityChange {
            track_id: track.track_id,
            previous,
            current,
            confidence: track.identity.confidence(),
        })
    }
}
