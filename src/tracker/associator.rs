//! Frame-over-frame association of detections to carrier tracks.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Timestamp;
use crate::error::{FusionError, Result};
use crate::tracker::matching::{self, AssignmentResult, CostMetric, Detection};
use crate::tracker::motion::MotionModel;
use crate::tracker::rect::{Anchor, Rect};
use crate::tracker::track::{StateTransition, Track};
use crate::tracker::track_state::TrackState;

/// Configuration for the associator and the track lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Minimum score for an unmatched detection to start a track.
    pub birth_thresh: f32,
    /// Detections below this score are ignored entirely.
    pub min_score: f32,
    /// Maximum association cost accepted (the gate).
    pub match_thresh: f32,
    pub cost_metric: CostMetric,
    /// Expected carrier size in pixels, used by [`CostMetric::Centroid`].
    pub carrier_size_px: f32,
    /// Consecutive matched frames, birth included, before a track is Confirmed.
    pub confirm_hits: u32,
    /// Consecutive misses before a Confirmed track becomes Lost.
    pub max_misses: u32,
    /// Further misses while Lost before the track is Removed, at least 1.
    pub removal_grace: u32,
    /// Tracks missed while within this many pixels of the frame edge are
    /// removed at once.
    pub border_margin: Option<f32>,
    /// Which point of the box represents the carrier on the floor.
    pub anchor: Anchor,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            birth_thresh: 0.5,
            min_score: 0.1,
            match_thresh: 0.7,
            cost_metric: CostMetric::Iou,
            carrier_size_px: 150.0,
            confirm_hits: 3,
            max_misses: 5,
            removal_grace: 15,
            border_margin: None,
            anchor: Anchor::Center,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.birth_thresh) || !(0.0..=1.0).contains(&self.min_score) {
            return Err(FusionError::config("score thresholds must lie in [0, 1]"));
        }
        if self.birth_thresh < self.min_score {
            return Err(FusionError::config("birth_thresh must be >= min_score"));
        }
        if !self.match_thresh.is_finite() || self.match_thresh < 0.0 {
            return Err(FusionError::config("match_thresh must be a non-negative number"));
        }
        if self.cost_metric == CostMetric::Centroid && self.carrier_size_px <= 0.0 {
            return Err(FusionError::config("carrier_size_px must be positive"));
        }
        if self.confirm_hits == 0 || self.max_misses == 0 || self.removal_grace == 0 {
            return Err(FusionError::config(
                "confirm_hits, max_misses and removal_grace must be at least 1",
            ));
        }
        if self.border_margin.is_some_and(|m| m < 0.0) {
            return Err(FusionError::config("border_margin must be non-negative"));
        }
        Ok(())
    }
}

/// Result of one association step.
#[derive(Debug, Clone, Default)]
pub struct AssociationOutcome {
    /// Live tracks, sorted by `track_id`.
    pub tracks: Vec<Track>,
    /// Tracks that reached Removed during this step.
    pub removed: Vec<Track>,
    pub transitions: Vec<StateTransition>,
    /// Ids of tracks born during this step.
    pub born: Vec<u64>,
}

pub struct Associator {
    config: TrackerConfig,
    motion: MotionModel,
    next_id: u64,
}

impl Associator {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            motion: MotionModel::default(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Match `detections` against `tracks` and advance every track's lifecycle.
    ///
    /// `frame_size` enables border removal when `border_margin` is set.
    pub fn update(
        &mut self,
        tracks: Vec<Track>,
        detections: &[Detection],
        timestamp: Timestamp,
        frame_size: Option<(u32, u32)>,
    ) -> AssociationOutcome {
        let mut outcome = AssociationOutcome::default();

        // Preference order for ties: fewer misses, then older id.
        let mut pool: Vec<Track> = tracks.into_iter().filter(|t| t.state.is_live()).collect();
        pool.sort_by_key(|t| (t.misses, t.track_id));
        let last_rects: Vec<Rect> = pool.iter().map(|t| t.bbox).collect();
        for track in pool.iter_mut() {
            track.predict(&self.motion);
        }

        let candidates: Vec<&Detection> = detections
            .iter()
            .filter(|d| d.score >= self.config.min_score)
            .collect();

        // A detection is scored against the cheaper of the predicted box and
        // the box the track held last frame, so stops and reversals still match.
        let predicted_rects: Vec<Rect> = pool.iter().map(|t| t.bbox).collect();
        let det_rects: Vec<Rect> = candidates.iter().map(|d| d.bbox).collect();
        let mut costs = matching::cost_matrix(
            self.config.cost_metric,
            &predicted_rects,
            &det_rects,
            self.config.carrier_size_px,
        );
        let last_costs = matching::cost_matrix(
            self.config.cost_metric,
            &last_rects,
            &det_rects,
            self.config.carrier_size_px,
        );
        costs.zip_mut_with(&last_costs, |cost, &last| *cost = cost.min(last));

        let AssignmentResult {
            matches,
            unmatched_tracks,
            unmatched_detections,
        } = matching::linear_assignment(&costs, self.config.match_thresh);

        for (itrack, idet) in matches {
            let track = &mut pool[itrack];
            debug!(
                track_id = track.track_id,
                cost = costs[[itrack, idet]],
                "matched detection"
            );
            let transition =
                track.apply_match(candidates[idet], timestamp, &self.motion, &self.config);
            outcome.transitions.extend(transition);
        }

        for itrack in unmatched_tracks {
            let track = &mut pool[itrack];
            let mut transition = track.apply_miss(&self.config);
            if track.state.is_live() && self.left_through_border(&track.bbox, frame_size) {
                debug!(track_id = track.track_id, "track missed at frame border");
                let from = transition.map_or(track.state, |t| t.from);
                transition = track.mark_removed().map(|t| StateTransition { from, ..t });
            }
            outcome.transitions.extend(transition);
        }

        for idet in unmatched_detections {
            let det = candidates[idet];
            if det.score < self.config.birth_thresh {
                continue;
            }
            let track_id = self.next_id;
            self.next_id += 1;
            debug!(track_id, score = det.score, "new tentative track");
            pool.push(Track::spawn(
                track_id,
                det,
                timestamp,
                &self.motion,
                &self.config,
            ));
            outcome.born.push(track_id);
        }

        for transition in &outcome.transitions {
            info!(
                track_id = transition.track_id,
                from = ?transition.from,
                to = ?transition.to,
                "track state changed"
            );
        }

        let (mut live, mut removed): (Vec<Track>, Vec<Track>) =
            pool.into_iter().partition(|t| t.state.is_live());
        live.sort_by_key(|t| t.track_id);
        removed.sort_by_key(|t| t.track_id);
        outcome.tracks = live;
        outcome.removed = removed;
        outcome
    }

    fn left_through_border(&self, bbox: &Rect, frame_size: Option<(u32, u32)>) -> bool {
        match (self.config.border_margin, frame_size) {
            (Some(margin), Some((width, height))) => bbox.touches_border(width, height, margin),
            _ => false,
        }
    }
}
