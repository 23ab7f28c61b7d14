//! Capability traits for the perception collaborators.

use std::convert::Infallible;
use std::fmt;

use crate::Timestamp;
use crate::identity::QrReading;
use crate::tracker::{Detection, Rect};

use super::DetectionBuilder;

/// One captured camera frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Capture sequence number
    pub index: u64,
    pub timestamp: Timestamp,
    pub width: u32,
    pub height: u32,
    /// Raw image bytes, format defined by the detector in use
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(index: u64, timestamp: Timestamp, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            index,
            timestamp,
            width,
            height,
            data,
        }
    }
}

/// Object detection backend.
///
/// Implement this trait to connect any carrier detection model.
///
/// # Example
///
/// ```ignore
/// use carrier_fusion::integration::{Detector, Frame};
/// use carrier_fusion::Detection;
///
/// struct MyDetector;
///
/// impl Detector for MyDetector {
///     type Error = std::io::Error;
///
///     fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Self::Error> {
///         Ok(vec![])
///     }
/// }
/// ```
pub trait Detector {
    type Error: fmt::Display;

    /// Run inference on a frame. The returned boxes are in frame pixels.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Self::Error>;
}

/// QR decoding primitive, applied to one detection region at a time.
pub trait QrDecoder {
    type Error: fmt::Display;

    /// Decode a code inside `region`, if one is readable.
    fn decode(&mut self, frame: &Frame, region: &Rect) -> Result<Option<QrReading>, Self::Error>;
}

/// Decoder for deployments without QR codes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoQrDecoder;

impl QrDecoder for NoQrDecoder {
    type Error = Infallible;

    fn decode(&mut self, _frame: &Frame, _region: &Rect) -> Result<Option<QrReading>, Self::Error> {
        Ok(None)
    }
}

/// Helper trait for converting model-specific outputs to `Detection`.
pub trait IntoDetections {
    fn into_detections(self) -> Vec<Detection>;
}

impl IntoDetections for Vec<Detection> {
    fn into_detections(self) -> Vec<Detection> {
        self
    }
}

/// Raw `[x1, y1, x2, y2, score]` rows; degenerate rows are skipped.
impl IntoDetections for Vec<[f32; 5]> {
    fn into_detections(self) -> Vec<Detection> {
        self.into_iter()
            .filter_map(|[x1, y1, x2, y2, score]| {
                DetectionBuilder::new().tlbr(x1, y1, x2, y2).score(score).try_build()
            })
            .collect()
    }
}
