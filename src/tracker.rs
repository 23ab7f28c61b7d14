mod associator;
mod matching;
mod motion;
mod rect;
mod track;
mod track_state;

pub use associator::{AssociationOutcome, Associator, TrackerConfig};
pub use matching::{AssignmentResult, CostMetric, Detection, linear_assignment};
pub use motion::{MotionModel, MotionState};
pub use rect::{Anchor, Rect};
pub use track::{StateTransition, Track};
pub use track_state::TrackState;
