//! A single carrier track and its lifecycle transitions.

use crate::Timestamp;
use crate::identity::{CarrierId, CarrierIdentity};
use crate::projection::PixelPoint;
use crate::tracker::TrackerConfig;
use crate::tracker::matching::Detection;
use crate::tracker::motion::{MotionModel, MotionState};
use crate::tracker::rect::{Anchor, Rect};
use crate::tracker::track_state::TrackState;

/// A change of lifecycle state observed during one association step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub track_id: u64,
    pub from: TrackState,
    pub to: TrackState,
}

#[derive(Debug, Clone)]
pub struct Track {
    /// Unique track identifier, allocated by the associator
    pub track_id: u64,
    /// Current lifecycle state
    pub state: TrackState,
    /// Last matched detection box, or the predicted box while coasting
    pub bbox: Rect,
    /// Score of the last matched detection
    pub score: f32,
    /// Consecutive matched frames
    pub hits: u32,
    /// Consecutive unmatched frames
    pub misses: u32,
    pub created_at: Timestamp,
    /// Timestamp of the last matched detection
    pub updated_at: Timestamp,
    /// Start of the carrier's presence, inherited when a carrier is re-identified
    pub session_start: Timestamp,
    /// QR evidence and the resolved carrier, if any
    pub identity: CarrierIdentity,
    motion: MotionState,
}

impl Track {
    /// Start a Tentative track from an unmatched detection.
    pub(crate) fn spawn(
        track_id: u64,
        detection: &Detection,
        timestamp: Timestamp,
        model: &MotionModel,
        config: &TrackerConfig,
    ) -> Self {
        let (cx, cy) = detection.bbox.center();
        let motion = model.initiate((cx as f64, cy as f64), detection.bbox.height as f64);
        let state = if config.confirm_hits <= 1 {
            TrackState::Confirmed
        } else {
            TrackState::Tentative
        };
        Self {
            track_id,
            state,
            bbox: detection.bbox,
            score: detection.score,
            hits: 1,
            misses: 0,
            created_at: timestamp,
            updated_at: timestamp,
            session_start: timestamp,
            identity: CarrierIdentity::default(),
            motion,
        }
    }

    #[inline]
    pub fn carrier_id(&self) -> Option<&CarrierId> {
        self.identity.carrier_id()
    }

    #[inline]
    pub fn is_confirmed(&self) -> bool {
        self.state == TrackState::Confirmed
    }

    /// Whether the track was matched in the most recent frame.
    #[inline]
    pub fn is_observed(&self) -> bool {
        self.misses == 0
    }

    /// Smoothed reference point in pixels: the filtered center with the
    /// current box size.
    pub fn reference_point(&self, anchor: Anchor) -> PixelPoint {
        let (x, y) = self.motion.position();
        Rect::from_center(x as f32, y as f32, self.bbox.width, self.bbox.height).anchor(anchor)
    }

    /// Estimated motion in pixels per frame.
    pub fn velocity(&self) -> (f64, f64) {
        self.motion.velocity()
    }

    /// Advance the motion model by one frame and move the box to the prediction.
    pub(crate) fn predict(&mut self, model: &MotionModel) {
        self.motion = model.predict(&self.motion, self.bbox.height as f64);
        self.sync_box();
    }

    pub(crate) fn apply_match(
        &mut self,
        detection: &Detection,
        timestamp: Timestamp,
        model: &MotionModel,
        config: &TrackerConfig,
    ) -> Option<StateTransition> {
        let (cx, cy) = detection.bbox.center();
        self.motion = model.update(
            &self.motion,
            (cx as f64, cy as f64),
            detection.bbox.height as f64,
        );
        self.bbox = detection.bbox;

        self.score = detection.score;
        self.hits += 1;
        self.misses = 0;
        self.updated_at = timestamp;

        let next = match self.state {
            TrackState::Tentative if self.hits >= config.confirm_hits => TrackState::Confirmed,
            TrackState::Lost => TrackState::Confirmed,
            state => state,
        };
        self.transition_to(next)
    }

    pub(crate) fn apply_miss(&mut self, config: &TrackerConfig) -> Option<StateTransition> {
        self.hits = 0;
        self.misses += 1;

        let next = match self.state {
            TrackState::Tentative => TrackState::Removed,
            TrackState::Confirmed if self.misses >= config.max_misses => TrackState::Lost,
            TrackState::Lost if self.misses >= config.max_misses + config.removal_grace => {
                TrackState::Removed
            }
            state => state,
        };
        self.transition_to(next)
    }

    pub(crate) fn mark_removed(&mut self) -> Option<StateTransition> {
        self.transition_to(TrackState::Removed)
    }

    fn transition_to(&mut self, next: TrackState) -> Option<StateTransition> {
        if next == self.state {
            return None;
        }
        let transition = StateTransition {
            track_id: self.track_id,
            from: self.state,
            to: next,
        };
        self.state = next;
        Some(transition)
    }

    fn sync_box(&mut self) {
        let (x, y) = self.motion.position();
        self.bbox = Rect::from_center(x as f32, y as f32, self.bbox.width, self.bbox.height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ts() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn config() -> TrackerConfig {
        TrackerConfig {
            confirm_hits: 3,
            max_misses: 2,
            removal_grace: 2,
            ..TrackerConfig::default()
        }
    }

    fn spawn() -> (Track, MotionModel) {
        let model = MotionModel::new();
        let det = Detection::new(100.0, 100.0, 200.0, 200.0, 0.9);
        (Track::spawn(1, &det, ts(), &model, &config()), model)
    }

    #[test]
    fn test_confirmation_after_consecutive_hits() {
        let (mut track, model) = spawn();
        let det = Detection::new(100.0, 100.0, 200.0, 200.0, 0.9);
        assert_eq!(track.state, TrackState::Tentative);
        assert_eq!(track.apply_match(&det, ts(), &model, &config()), None);
        let transition = track.apply_match(&det, ts(), &model, &config()).unwrap();
        assert_eq!(transition.from, TrackState::Tentative);
        assert_eq!(transition.to, TrackState::Confirmed);
    }

    #[test]
    fn test_tentative_miss_removes() {
        let (mut track, _) = spawn();
        let transition = track.apply_miss(&config()).unwrap();
        assert_eq!(transition.to, TrackState::Removed);
    }

    #[test]
    fn test_lost_then_removed_then_nothing() {
        let (mut track, _) = spawn();
        track.state = TrackState::Confirmed;
        assert_eq!(track.apply_miss(&config()), None);
        assert_eq!(track.apply_miss(&config()).unwrap().to, TrackState::Lost);
        assert_eq!(track.apply_miss(&config()), None);
        assert_eq!(track.apply_miss(&config()).unwrap().to, TrackState::Removed);
    }

    #[test]
    fn test_lost_track_reacquired() {
        let (mut track, model) = spawn();
        track.state = TrackState::Lost;
        track.misses = 3;
        let det = Detection::new(100.0, 100.0, 200.0, 200.0, 0.9);
        let transition = track.apply_match(&det, ts(), &model, &config()).unwrap();
        assert_eq!(transition.to, TrackState::Confirmed);
        assert_eq!(track.misses, 0);
    }

    #[test]
    fn test_match_keeps_measured_box() {
        let (mut track, model) = spawn();
        for step in 1..=5 {
            let x = 100.0 + 30.0 * step as f32;
            track.predict(&model);
            let det = Detection::new(x, 100.0, x + 100.0, 200.0, 0.9);
            track.apply_match(&det, ts(), &model, &config());
            assert_eq!(track.bbox, det.bbox);
        }
        // The reference point is filtered and stays close to the measurement.
        let point = track.reference_point(Anchor::Center);
        assert!((point.x - 300.0).abs() < 30.0, "{point:?}");
        assert!((point.y - 150.0).abs() < 1e-6, "{point:?}");
        assert!(track.velocity().0 > 0.0);
    }

    #[test]
    fn test_single_hit_confirmation() {
        let model = MotionModel::new();
        let cfg = TrackerConfig {
            confirm_hits: 1,
            ..config()
        };
        let det = Detection::new(0.0, 0.0, 10.0, 10.0, 0.9);
        assert!(Track::spawn(7, &det, ts(), &model, &cfg).is_confirmed());
    }
}
