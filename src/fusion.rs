//! Per-frame orchestration of tracking, projection, zones and identity.

mod engine;
mod events;
mod snapshot;

pub use engine::{FrameOutput, FusionEngine, Observation};
pub use events::PersistenceEvent;
pub use snapshot::{FrameSnapshot, TrackView};
