use serde::{Deserialize, Serialize};

/// Lifecycle state of a carrier track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    /// Born from an unmatched detection, not yet confirmed
    #[default]
    Tentative,
    /// Matched for enough consecutive frames to be trusted
    Confirmed,
    /// Missed for too many frames, coasting on the motion model
    Lost,
    /// Dropped from tracking
    Removed,
}

impl TrackState {
    /// Whether the track still takes part in association.
    #[inline]
    pub fn is_live(self) -> bool {
        self != TrackState::Removed
    }
}
