//! The fusion engine: one fully fused update per frame.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use super::events::PersistenceEvent;
use super::snapshot::{FrameSnapshot, TrackView};
use crate::Timestamp;
use crate::calibration::Calibration;
use crate::config::FusionConfig;
use crate::error::{FusionError, Result};
use crate::identity::{CarrierId, IdentityResolver, QrReading, TrackPosition};
use crate::projection::{Projection, Projector};
use crate::tracker::{Associator, Detection, Track, TrackState};
use crate::zones::{DwellRecord, DwellTracker, ExitReason, Zone};

/// Everything perceived in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Capture time shared by every detection in the frame
    pub timestamp: Timestamp,
    /// Frame width and height in pixels, when known
    pub frame_size: Option<(u32, u32)>,
    pub detections: Vec<Detection>,
    pub qr_readings: Vec<QrReading>,
}

impl Observation {
    pub fn new(timestamp: Timestamp, detections: Vec<Detection>) -> Self {
        Self {
            timestamp,
            frame_size: None,
            detections,
            qr_readings: Vec::new(),
        }
    }

    pub fn with_frame_size(mut self, width: u32, height: u32) -> Self {
        self.frame_size = Some((width, height));
        self
    }

    pub fn with_qr_readings(mut self, readings: Vec<QrReading>) -> Self {
        self.qr_readings = readings;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutput {
    pub snapshot: FrameSnapshot,
    /// Events in the order they happened during the frame.
    pub events: Vec<PersistenceEvent>,
}

/// A carrier whose track was removed, kept for re-identification.
#[derive(Debug, Clone, Copy)]
struct RetiredCarrier {
    session_start: Timestamp,
    removed_at: Timestamp,
}

/// Owns the live track set and all fusion state.
///
/// Frames must be fed in capture order. Each call to [`FusionEngine::process`]
/// completes the frame before returning, so the snapshot always reflects a
/// consistent track, identity and dwell state.
pub struct FusionEngine {
    config: FusionConfig,
    zones: Vec<Zone>,
    projector: Projector,
    associator: Associator,
    resolver: IdentityResolver,
    dwell: DwellTracker,
    tracks: Vec<Track>,
    retired: HashMap<CarrierId, RetiredCarrier>,
    last_position: HashMap<u64, Timestamp>,
    frame_index: u64,
    last_timestamp: Option<Timestamp>,
    shut_down: bool,
}

impl FusionEngine {
    pub fn new(config: FusionConfig, calibration: Calibration) -> Result<Self> {
        config.validate()?;
        calibration.validate()?;
        let projector = calibration.projector()?;
        info!(
            zones = calibration.zones.len(),
            confirm_hits = config.tracker.confirm_hits,
            max_misses = config.tracker.max_misses,
            window_size = config.identity.window_size,
            "fusion engine ready"
        );
        Ok(Self {
            associator: Associator::new(config.tracker.clone()),
            resolver: IdentityResolver::new(config.identity.clone()),
            zones: calibration.zones,
            projector,
            dwell: DwellTracker::new(),
            tracks: Vec::new(),
            retired: HashMap::new(),
            last_position: HashMap::new(),
            frame_index: 0,
            last_timestamp: None,
            shut_down: false,
            config,
        })
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn projector(&self) -> &Projector {
        &self.projector
    }

    /// Live tracks, sorted by `track_id`.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn open_dwell_records(&self) -> impl Iterator<Item = &DwellRecord> {
        self.dwell.open_records()
    }

    /// Number of frames processed so far.
    pub fn frames_processed(&self) -> u64 {
        self.frame_index
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Fuse one frame.
    pub fn process(&mut self, observation: Observation) -> Result<FrameOutput> {
        if self.shut_down {
            return Err(FusionError::Pipeline(
                "fusion engine has been shut down".into(),
            ));
        }
        let Observation {
            timestamp,
            frame_size,
            detections,
            qr_readings,
        } = observation;
        if let Some(last) = self.last_timestamp {
            if timestamp < last {
                warn!(%timestamp, %last, "frame timestamp went backwards");
            }
        }

        let mut events = Vec::new();

        let tracks = std::mem::take(&mut self.tracks);
        let outcome = self
            .associator
            .update(tracks, &detections, timestamp, frame_size);
        self.tracks = outcome.tracks;

        for transition in &outcome.transitions {
            if matches!(transition.to, TrackState::Lost | TrackState::Removed) {
                let closed = self
                    .dwell
                    .close_track(transition.track_id, ExitReason::Lost, timestamp);
                events.extend(closed.map(|e| PersistenceEvent::from_dwell(e, timestamp)));
            }
        }
        for track in &outcome.removed {
            self.retire(track, timestamp, &mut events);
        }
        let window = self.config.reidentify_window();
        self.retired
            .retain(|_, retired| timestamp - retired.removed_at <= window);

        let anchor = self.config.tracker.anchor;
        let projections: Vec<Option<Projection>> = self
            .tracks
            .iter()
            .map(|track| match self.projector.project(track.reference_point(anchor)) {
                Ok(projection) => Some(projection),
                Err(err) => {
                    warn!(track_id = track.track_id, error = %err, "cannot project track");
                    None
                }
            })
            .collect();

        for (track, projection) in self.tracks.iter().zip(&projections) {
            let Some(projection) = projection else {
                continue;
            };
            // Coasting tracks hold their zone until they are matched or lost.
            if track.is_confirmed() && track.is_observed() {
                let changes =
                    self.dwell
                        .update_membership(track, projection.point, &self.zones, timestamp);
                events.extend(
                    changes
                        .into_iter()
                        .map(|e| PersistenceEvent::from_dwell(e, timestamp)),
                );
            }
        }

        if !qr_readings.is_empty() {
            self.fuse_identities(&qr_readings, &projections, timestamp, &mut events);
        }

        self.log_positions(&projections, timestamp, &mut events);

        let snapshot = self.snapshot(&projections, timestamp);
        self.frame_index += 1;
        self.last_timestamp = Some(self.last_timestamp.map_or(timestamp, |t| t.max(timestamp)));
        Ok(FrameOutput { snapshot, events })
    }

    /// Close every open dwell record. Later calls are no-ops.
    pub fn shutdown(&mut self, timestamp: Timestamp) -> Vec<PersistenceEvent> {
        if self.shut_down {
            return Vec::new();
        }
        self.shut_down = true;
        let at = self.last_timestamp.map_or(timestamp, |t| t.max(timestamp));
        let events: Vec<PersistenceEvent> = self
            .dwell
            .close_all(ExitReason::Shutdown, at)
            .into_iter()
            .map(|e| PersistenceEvent::from_dwell(e, at))
            .collect();
        info!(
            frames = self.frame_index,
            closed = events.len(),
            "fusion engine shut down"
        );
        events
    }

    fn retire(&mut self, track: &Track, timestamp: Timestamp, events: &mut Vec<PersistenceEvent>) {
        self.last_position.remove(&track.track_id);
        let Some(carrier_id) = track.carrier_id() else {
            return;
        };
        info!(track_id = track.track_id, carrier_id = %carrier_id, "carrier lost");
        self.retired.insert(
            carrier_id.clone(),
            RetiredCarrier {
                session_start: track.session_start,
                removed_at: timestamp,
            },
        );
        events.push(PersistenceEvent::CarrierLost {
            timestamp,
            track_id: track.track_id,
            carrier_id: carrier_id.clone(),
            session_start: track.session_start,
        });
    }

    fn fuse_identities(
        &mut self,
        readings: &[QrReading],
        projections: &[Option<Projection>],
        timestamp: Timestamp,
        events: &mut Vec<PersistenceEvent>,
    ) {
        let mut placed = Vec::new();
        let mut positions = Vec::new();
        for (i, (track, projection)) in self.tracks.iter().zip(projections).enumerate() {
            if let Some(projection) = projection {
                placed.push(i);
                positions.push(TrackPosition {
                    track_id: track.track_id,
                    misses: track.misses,
                    point: projection.point,
                });
            }
        }

        let buckets = self.resolver.assign(readings, &positions, &self.projector);
        for (index, bucket) in placed.into_iter().zip(buckets) {
            if bucket.is_empty() {
                continue;
            }
            let track = &mut self.tracks[index];
            let Some(change) = self.resolver.resolve(track, &bucket) else {
                continue;
            };

            let returning = match self.retired.remove(&change.current) {
                Some(retired) => {
                    debug!(
                        track_id = track.track_id,
                        carrier_id = %change.current,
                        "carrier re-identified, resuming session"
                    );
                    track.session_start = track.session_start.min(retired.session_start);
                    true
                }
                None => false,
            };

            let updated = self.dwell.attribute_carrier(track.track_id, &change.current);
            events.push(PersistenceEvent::identity_resolved(change, timestamp, returning));
            events.extend(updated.map(|e| PersistenceEvent::from_dwell(e, timestamp)));
        }
    }

    fn log_positions(
        &mut self,
        projections: &[Option<Projection>],
        timestamp: Timestamp,
        events: &mut Vec<PersistenceEvent>,
    ) {
        let interval = self.config.position_log_interval();
        for (track, projection) in self.tracks.iter().zip(projections) {
            let (Some(carrier_id), Some(projection)) = (track.carrier_id(), projection) else {
                continue;
            };
            if !track.is_confirmed() || !track.is_observed() || projection.out_of_bounds {
                continue;
            }
            let due = self
                .last_position
                .get(&track.track_id)
                .is_none_or(|last| timestamp - *last >= interval);
            if due {
                self.last_position.insert(track.track_id, timestamp);
                events.push(PersistenceEvent::Position {
                    timestamp,
                    track_id: track.track_id,
                    carrier_id: carrier_id.clone(),
                    point: projection.point,
                });
            }
        }
    }

    fn snapshot(&self, projections: &[Option<Projection>], timestamp: Timestamp) -> FrameSnapshot {
        let tracks = self
            .tracks
            .iter()
            .zip(projections)
            .map(|(track, projection)| {
                let open = self.dwell.open_record(track.track_id);
                TrackView {
                    track_id: track.track_id,
                    state: track.state,
                    carrier_id: track.carrier_id().cloned(),
                    confidence: track.identity.confidence(),
                    bbox: track.bbox,
                    floor_point: projection.map(|p| p.point),
                    out_of_bounds: projection.is_some_and(|p| p.out_of_bounds),
                    zone_id: open.map(|r| r.zone_id.clone()),
                    dwell_secs: open
                        .map(|r| r.duration(timestamp).num_milliseconds() as f64 / 1000.0),
                    session_start: track.session_start,
                }
            })
            .collect();
        FrameSnapshot {
            frame_index: self.frame_index,
            timestamp,
            tracks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::HomographySource;
    use crate::projection::{FloorBounds, FloorPoint};
    use crate::tracker::{Rect, TrackerConfig};
    use crate::zones::ZoneKind;
    use chrono::{TimeDelta, TimeZone, Utc};

    fn ts(frame: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + TimeDelta::milliseconds(200 * frame)
    }

    fn calibration() -> Calibration {
        Calibration {
            homography: HomographySource::Matrix {
                matrix: [[0.01, 0.0, 0.0], [0.0, 0.01, 0.0], [0.0, 0.0, 1.0]],
            },
            floor_bounds: FloorBounds::new(0.0, 0.0, 20.0, 15.0),
            zones: vec![Zone::rectangle(
                "Oven-1",
                ZoneKind::Oven,
                1,
                FloorPoint::new(3.0, 2.0),
                FloorPoint::new(5.0, 4.0),
            )],
        }
    }

    fn engine(tracker: TrackerConfig) -> FusionEngine {
        let config = FusionConfig {
            tracker,
            ..FusionConfig::default()
        };
        FusionEngine::new(config, calibration()).unwrap()
    }

    fn at_oven(frame: i64) -> Observation {
        let bbox = Rect::from_center(400.0, 300.0, 100.0, 100.0);
        Observation::new(ts(frame), vec![Detection::from_rect(bbox, 0.9)])
    }

    fn qr(payload: &str, frame: i64) -> QrReading {
        QrReading::new(payload, ts(frame), Rect::from_center(400.0, 300.0, 30.0, 30.0))
    }

    fn dwell_events(events: &[PersistenceEvent]) -> Vec<&PersistenceEvent> {
        events.iter().filter(|e| e.dwell_record().is_some()).collect()
    }

    #[test]
    fn test_dwell_opens_on_confirmation() {
        let mut engine = engine(TrackerConfig::default());
        for frame in 0..2 {
            let out = engine.process(at_oven(frame)).unwrap();
            assert!(out.events.is_empty());
            assert_eq!(out.snapshot.tracks[0].state, TrackState::Tentative);
        }
        let out = engine.process(at_oven(2)).unwrap();
        assert!(matches!(
            &out.events[..],
            [PersistenceEvent::DwellOpened { record, .. }] if record.zone_id == "Oven-1"
        ));
        let view = &out.snapshot.tracks[0];
        assert_eq!(view.zone_id.as_deref(), Some("Oven-1"));
        let point = view.floor_point.unwrap();
        assert!(point.distance(&FloorPoint::new(4.0, 3.0)) < 1e-9);
    }

    #[test]
    fn test_lost_track_closes_dwell() {
        let tracker = TrackerConfig {
            max_misses: 2,
            removal_grace: 1,
            ..TrackerConfig::default()
        };
        let mut engine = engine(tracker);
        for frame in 0..3 {
            engine.process(at_oven(frame)).unwrap();
        }
        let out = engine.process(Observation::new(ts(3), vec![])).unwrap();
        assert!(out.events.is_empty(), "coasting keeps the dwell open");
        assert_eq!(engine.open_dwell_records().count(), 1);

        let out = engine.process(Observation::new(ts(4), vec![])).unwrap();
        match &dwell_events(&out.events)[..] {
            [PersistenceEvent::DwellClosed { record, timestamp }] => {
                assert_eq!(record.exit_reason, Some(ExitReason::Lost));
                assert_eq!(*timestamp, ts(4));
            }
            other => panic!("unexpected events {other:?}"),
        }
        assert_eq!(out.snapshot.tracks[0].state, TrackState::Lost);

        let out = engine.process(Observation::new(ts(5), vec![])).unwrap();
        assert!(out.snapshot.tracks.is_empty());
        assert!(out.events.is_empty(), "anonymous carriers produce no lost event");
    }

    #[test]
    fn test_identity_attributes_open_dwell() {
        let mut engine = engine(TrackerConfig::default());
        for frame in 0..3 {
            engine.process(at_oven(frame)).unwrap();
        }
        let out = engine
            .process(at_oven(3).with_qr_readings(vec![qr("https://plant.example/carrier/12", 3)]))
            .unwrap();
        assert!(matches!(
            &out.events[0],
            PersistenceEvent::IdentityResolved { carrier_id, returning: false, .. } if carrier_id.as_str() == "12"
        ));
        assert!(matches!(
            &out.events[1],
            PersistenceEvent::DwellUpdated { record, .. } if record.carrier_id == Some(CarrierId::new("12"))
        ));
        assert!(matches!(&out.events[2], PersistenceEvent::Position { .. }));
        assert_eq!(
            out.snapshot.carrier(&CarrierId::new("12")).map(|t| t.track_id),
            Some(1)
        );
    }

    #[test]
    fn test_position_events_are_throttled() {
        let mut engine = engine(TrackerConfig::default());
        for frame in 0..3 {
            engine.process(at_oven(frame)).unwrap();
        }
        engine
            .process(at_oven(3).with_qr_readings(vec![qr("12", 3)]))
            .unwrap();
        let positions = |out: &FrameOutput| {
            out.events
                .iter()
                .filter(|e| matches!(e, PersistenceEvent::Position { .. }))
                .count()
        };
        // 200 ms per frame, 5 s interval.
        let mut logged = 0;
        for frame in 4..=28 {
            logged += positions(&engine.process(at_oven(frame)).unwrap());
        }
        assert_eq!(logged, 1);
    }

    #[test]
    fn test_returning_carrier_resumes_session() {
        let tracker = TrackerConfig {
            max_misses: 1,
            removal_grace: 1,
            ..TrackerConfig::default()
        };
        let mut engine = engine(tracker);
        for frame in 0..3 {
            engine.process(at_oven(frame)).unwrap();
        }
        engine
            .process(at_oven(3).with_qr_readings(vec![qr("12", 3)]))
            .unwrap();

        engine.process(Observation::new(ts(4), vec![])).unwrap();
        let out = engine.process(Observation::new(ts(5), vec![])).unwrap();
        assert!(out.events.iter().any(|e| matches!(
            e,
            PersistenceEvent::CarrierLost { track_id: 1, session_start, .. } if *session_start == ts(0)
        )));

        for frame in 6..9 {
            engine.process(at_oven(frame)).unwrap();
        }
        let out = engine
            .process(at_oven(9).with_qr_readings(vec![qr("12", 9)]))
            .unwrap();
        assert!(out.events.iter().any(|e| matches!(
            e,
            PersistenceEvent::IdentityResolved { track_id: 2, returning: true, .. }
        )));
        assert_eq!(out.snapshot.tracks[0].session_start, ts(0));
    }

    #[test]
    fn test_shutdown_closes_and_is_idempotent() {
        let mut engine = engine(TrackerConfig::default());
        for frame in 0..5 {
            engine.process(at_oven(frame)).unwrap();
        }
        let events = engine.shutdown(ts(2));
        match &events[..] {
            [PersistenceEvent::DwellClosed { record, timestamp }] => {
                assert_eq!(record.exit_reason, Some(ExitReason::Shutdown));
                assert_eq!(*timestamp, ts(4));
            }
            other => panic!("unexpected events {other:?}"),
        }
        assert!(engine.shutdown(ts(10)).is_empty());
        assert!(engine.is_shut_down());
        assert!(engine.process(at_oven(11)).is_err());
    }

    #[test]
    fn test_invalid_setup_is_rejected() {
        let mut bad = calibration();
        bad.homography = HomographySource::Matrix {
            matrix: [[1.0, 2.0, 0.0], [2.0, 4.0, 0.0], [0.0, 0.0, 0.0]],
        };
        assert!(matches!(
            FusionEngine::new(FusionConfig::default(), bad),
            Err(FusionError::Calibration(_))
        ));

        let mut config = FusionConfig::default();
        config.identity.window_size = 0;
        assert!(FusionEngine::new(config, calibration()).is_err());
    }
}
