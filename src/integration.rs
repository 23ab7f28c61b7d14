//! Integration with the external collaborators.
//!
//! Detector and QR decoder backends plug in through capability traits, and
//! [`FusionPipeline`] runs perception, fusion, persistence and visualization
//! as bounded stages around a [`FusionEngine`](crate::fusion::FusionEngine).

mod builder;
mod detector;
mod perception;
mod persistence;
mod pipeline;

pub use builder::DetectionBuilder;
pub use detector::{Detector, Frame, IntoDetections, NoQrDecoder, QrDecoder};
pub use perception::Perception;
pub use persistence::{JsonLinesSink, PersistenceSink, PersistenceWriter, RetryPolicy};
pub use pipeline::{CancellationToken, FusionPipeline, PipelineConfig, PipelineReport, SnapshotSink};
