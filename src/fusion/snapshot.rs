use serde::{Deserialize, Serialize};

use crate::Timestamp;
use crate::error::Result;
use crate::identity::CarrierId;
use crate::projection::FloorPoint;
use crate::tracker::{Rect, TrackState};

/// Read-only view of one live track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackView {
    pub track_id: u64,
    pub state: TrackState,
    pub carrier_id: Option<CarrierId>,
    pub confidence: f32,
    pub bbox: Rect,
    /// `None` when the reference point cannot be projected
    pub floor_point: Option<FloorPoint>,
    pub out_of_bounds: bool,
    pub zone_id: Option<String>,
    /// Seconds spent so far in `zone_id`
    pub dwell_secs: Option<f64>,
    pub session_start: Timestamp,
}

/// Fused state after one frame, for the visualization collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSnapshot {
    pub frame_index: u64,
    pub timestamp: Timestamp,
    /// Live tracks, sorted by `track_id`
    pub tracks: Vec<TrackView>,
}

impl FrameSnapshot {
    pub fn track(&self, track_id: u64) -> Option<&TrackView> {
        self.tracks.iter().find(|t| t.track_id == track_id)
    }

    pub fn carrier(&self, carrier_id: &CarrierId) -> Option<&TrackView> {
        self.tracks
            .iter()
            .find(|t| t.carrier_id.as_ref() == Some(carrier_id))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
