//! Hybrid localization and identity fusion for carrier tracking.
//!
//! Per frame, raw detections and optional QR decodes are fused into
//! persistent carrier tracks with floor-plan positions, resolved carrier
//! identities and zone dwell records.
//!
//! ```ignore
//! use carrier_fusion::{Calibration, FusionConfig, FusionEngine, Observation};
//!
//! let calibration = Calibration::from_path("calibration.json")?;
//! let mut engine = FusionEngine::new(FusionConfig::default(), calibration)?;
//! let output = engine.process(Observation::new(now, detections))?;
//! for event in output.events {
//!     sink.append(&event)?;
//! }
//! ```

pub mod calibration;
pub mod config;
pub mod error;
pub mod fusion;
pub mod identity;
pub mod integration;
pub mod projection;
pub mod tracker;
pub mod zones;

/// Wall-clock time of a frame or a reading.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

pub use calibration::{Calibration, HomographySource};
pub use config::FusionConfig;
pub use error::{FusionError, Result};
pub use fusion::{FrameOutput, FrameSnapshot, FusionEngine, Observation, PersistenceEvent, TrackView};
pub use identity::{CarrierId, QrReading};
pub use projection::{FloorPoint, PixelPoint, Projector};
pub use tracker::{Detection, Rect, Track, TrackState, TrackerConfig};
pub use zones::{DwellRecord, ExitReason, Zone, ZoneKind};
