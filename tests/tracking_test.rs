use carrier_fusion::tracker::{Associator, CostMetric, Track};
use carrier_fusion::{Detection, Timestamp, TrackState, TrackerConfig};
use chrono::{TimeDelta, TimeZone, Utc};

fn ts(frame: i64) -> Timestamp {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + TimeDelta::milliseconds(100 * frame)
}

/// Feed one frame and return the live tracks.
fn step(associator: &mut Associator, tracks: Vec<Track>, dets: &[Detection], frame: i64) -> Vec<Track> {
    associator.update(tracks, dets, ts(frame), None).tracks
}

#[test]
fn test_basic_tracking() {
    let mut associator = Associator::new(TrackerConfig::default());

    // Frame 1: one detection, born Tentative
    let tracks = step(&mut associator, vec![], &[Detection::new(100.0, 100.0, 200.0, 200.0, 0.9)], 0);
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].state, TrackState::Tentative);
    let id = tracks[0].track_id;

    // Frames 2-3: same object moving slightly, confirmed on the third hit
    let tracks = step(&mut associator, tracks, &[Detection::new(105.0, 105.0, 205.0, 205.0, 0.9)], 1);
    let tracks = step(&mut associator, tracks, &[Detection::new(110.0, 110.0, 210.0, 210.0, 0.9)], 2);
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].track_id, id);
    assert_eq!(tracks[0].state, TrackState::Confirmed);

    // Frame 4: occluded, the track coasts
    let tracks = step(&mut associator, tracks, &[], 3);
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].misses, 1);
    assert!(!tracks[0].is_observed());

    // Frame 5: reappears near the predicted position, same id
    let tracks = step(&mut associator, tracks, &[Detection::new(120.0, 120.0, 220.0, 220.0, 0.9)], 4);
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].track_id, id);
    assert_eq!(tracks[0].misses, 0);
}

#[test]
fn test_track_id_stable_while_matching() {
    for metric in [CostMetric::Iou, CostMetric::Centroid] {
        let mut associator = Associator::new(TrackerConfig {
            cost_metric: metric,
            ..TrackerConfig::default()
        });
        let mut tracks = vec![];
        let mut ids = vec![];
        for frame in 0..40 {
            let x = 100.0 + 4.0 * frame as f32;
            let dets = [Detection::new(x, 200.0, x + 120.0, 320.0, 0.85)];
            tracks = step(&mut associator, tracks, &dets, frame);
            assert_eq!(tracks.len(), 1, "{metric:?} frame {frame}");
            ids.push(tracks[0].track_id);
        }
        assert!(ids.iter().all(|&id| id == ids[0]), "{metric:?}: {ids:?}");
    }
}

#[test]
fn test_id_survives_reversal_and_sudden_stop() {
    for metric in [CostMetric::Iou, CostMetric::Centroid] {
        let config = TrackerConfig {
            cost_metric: metric,
            ..TrackerConfig::default()
        };
        let gate = config.match_thresh;
        let mut associator = Associator::new(config);

        // Forward at 40 px/frame, back at 40 px/frame, then parked.
        let mut xs = vec![];
        let mut x = 100.0f32;
        for _ in 0..15 {
            xs.push(x);
            x += 40.0;
        }
        for _ in 0..15 {
            xs.push(x);
            x -= 40.0;
        }
        xs.extend(std::iter::repeat_n(x, 10));

        let mut tracks: Vec<Track> = vec![];
        for (frame, &x) in xs.iter().enumerate() {
            let det = Detection::new(x, 300.0, x + 100.0, 400.0, 0.9);
            if let Some(track) = tracks.first() {
                // Every detection overlaps the track's current box within the gate.
                assert!(1.0 - track.bbox.iou(&det.bbox) <= gate, "frame {frame}");
            }
            tracks = step(&mut associator, tracks, &[det], frame as i64);
            let ids: Vec<u64> = tracks.iter().map(|t| t.track_id).collect();
            assert_eq!(ids, vec![1], "{metric:?} frame {frame}");
            assert!(tracks[0].is_observed());
        }
        assert_eq!(tracks[0].state, TrackState::Confirmed);
    }
}

#[test]
fn test_two_carriers_keep_their_ids() {
    let mut associator = Associator::new(TrackerConfig::default());
    let mut tracks = vec![];
    for frame in 0..20 {
        let dy = 3.0 * frame as f32;
        let dets = [
            Detection::new(100.0, 100.0 + dy, 200.0, 200.0 + dy, 0.9),
            Detection::new(400.0, 400.0 - dy, 500.0, 500.0 - dy, 0.9),
        ];
        tracks = step(&mut associator, tracks, &dets, frame);
    }
    let ids: Vec<u64> = tracks.iter().map(|t| t.track_id).collect();
    assert_eq!(ids, vec![1, 2]);
    // Track 1 moved down, track 2 moved up.
    assert!(tracks[0].bbox.y > 140.0);
    assert!(tracks[1].bbox.y < 360.0);
}

#[test]
fn test_track_death_across_thresholds() {
    for max_misses in [1, 2, 5, 8] {
        for removal_grace in [1, 3] {
            let config = TrackerConfig {
                max_misses,
                removal_grace,
                ..TrackerConfig::default()
            };
            let mut associator = Associator::new(config);
            let det = [Detection::new(50.0, 50.0, 150.0, 150.0, 0.9)];

            let mut states = vec![TrackState::Tentative];
            let mut tracks = vec![];
            let mut removed_at = None;
            for frame in 0..5 {
                let outcome = associator.update(tracks, &det, ts(frame), None);
                states.extend(outcome.transitions.iter().map(|t| t.to));
                tracks = outcome.tracks;
            }
            let absent = (max_misses + removal_grace) as i64;
            for frame in 5..5 + absent {
                let outcome = associator.update(tracks, &[], ts(frame), None);
                states.extend(outcome.transitions.iter().map(|t| t.to));
                if outcome.removed.iter().any(|t| t.track_id == 1) {
                    removed_at = Some(frame - 4);
                }
                if frame - 4 == max_misses as i64 {
                    assert_eq!(outcome.tracks[0].state, TrackState::Lost);
                }
                tracks = outcome.tracks;
            }

            assert_eq!(
                states,
                vec![
                    TrackState::Tentative,
                    TrackState::Confirmed,
                    TrackState::Lost,
                    TrackState::Removed
                ],
                "max_misses={max_misses} removal_grace={removal_grace}"
            );
            assert_eq!(removed_at, Some(absent));
            assert!(tracks.is_empty());
        }
    }
}

#[test]
fn test_low_score_detections_do_not_spawn() {
    let mut associator = Associator::new(TrackerConfig::default());
    let tracks = step(&mut associator, vec![], &[Detection::new(0.0, 0.0, 80.0, 80.0, 0.3)], 0);
    assert!(tracks.is_empty());
}
