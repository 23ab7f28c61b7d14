//! Detector and decoder stage: frames in, observations out.

use tracing::{debug, warn};

use crate::fusion::Observation;

use super::detector::{Detector, Frame, QrDecoder};

/// Runs the detector on every frame and the QR decoder on every
/// `decode_interval`-th frame, once per detected region.
///
/// Collaborator failures never stop the stream: a failed detection yields an
/// empty observation and a failed decode yields no reading for that region.
pub struct Perception<D, Q> {
    detector: D,
    decoder: Q,
    decode_interval: u64,
    frames_seen: u64,
}

impl<D: Detector, Q: QrDecoder> Perception<D, Q> {
    pub fn new(detector: D, decoder: Q, decode_interval: u64) -> Self {
        Self {
            detector,
            decoder,
            decode_interval: decode_interval.max(1),
            frames_seen: 0,
        }
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn decoder(&self) -> &Q {
        &self.decoder
    }

    pub fn perceive(&mut self, frame: &Frame) -> Observation {
        let decode_now = self.frames_seen % self.decode_interval == 0;
        self.frames_seen += 1;

        let observation =
            Observation::new(frame.timestamp, Vec::new()).with_frame_size(frame.width, frame.height);
        let detections = match self.detector.detect(frame) {
            Ok(detections) => detections,
            Err(err) => {
                warn!(frame = frame.index, error = %err, "detector failed, treating frame as empty");
                return observation;
            }
        };

        let mut readings = Vec::new();
        if decode_now {
            for detection in &detections {
                match self.decoder.decode(frame, &detection.bbox) {
                    Ok(Some(reading)) => readings.push(reading),
                    Ok(None) => {}
                    Err(err) => warn!(frame = frame.index, error = %err, "QR decode failed"),
                }
            }
        }
        debug!(
            frame = frame.index,
            detections = detections.len(),
            readings = readings.len(),
            "frame perceived"
        );
        Observation {
            detections,
            ..observation
        }
        .with_qr_readings(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::QrReading;
    use crate::tracker::{Detection, Rect};
    use chrono::Utc;

    struct FixedDetector {
        fail: bool,
    }

    impl Detector for FixedDetector {
        type Error = String;

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, Self::Error> {
            if self.fail {
                return Err("inference timed out".into());
            }
            Ok(vec![
                Detection::new(0.0, 0.0, 100.0, 100.0, 0.9),
                Detection::new(200.0, 0.0, 300.0, 100.0, 0.9),
            ])
        }
    }

    /// Reads "carrier/7" in the first region, fails on the second.
    struct FlakyDecoder {
        calls: usize,
    }

    impl QrDecoder for FlakyDecoder {
        type Error = &'static str;

        fn decode(&mut self, frame: &Frame, region: &Rect) -> Result<Option<QrReading>, Self::Error> {
            self.calls += 1;
            if region.x > 100.0 {
                return Err("checksum mismatch");
            }
            Ok(Some(QrReading::new("carrier/7", frame.timestamp, *region)))
        }
    }

    fn frame(index: u64) -> Frame {
        Frame::new(index, Utc::now(), 640, 480, Vec::new())
    }

    #[test]
    fn test_detector_failure_yields_empty_observation() {
        let mut perception = Perception::new(FixedDetector { fail: true }, FlakyDecoder { calls: 0 }, 1);
        let obs = perception.perceive(&frame(0));
        assert!(obs.detections.is_empty());
        assert!(obs.qr_readings.is_empty());
        assert_eq!(obs.frame_size, Some((640, 480)));
        assert!(perception.detector().fail);
        assert_eq!(perception.decoder().calls, 0);
    }

    #[test]
    fn test_decode_failures_are_skipped() {
        let mut perception = Perception::new(FixedDetector { fail: false }, FlakyDecoder { calls: 0 }, 1);
        let obs = perception.perceive(&frame(0));
        assert_eq!(obs.detections.len(), 2);
        assert_eq!(obs.qr_readings.len(), 1);
        assert_eq!(obs.qr_readings[0].payload, "carrier/7");
    }

    #[test]
    fn test_decode_interval() {
        let mut perception = Perception::new(FixedDetector { fail: false }, FlakyDecoder { calls: 0 }, 3);
        let decoded: Vec<bool> = (0..6)
            .map(|i| !perception.perceive(&frame(i)).qr_readings.is_empty())
            .collect();
        assert_eq!(decoded, vec![true, false, false, true, false, false]);
        assert_eq!(perception.decoder().calls, 4);
    }
}
