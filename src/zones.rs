//! Zone definitions and the dwell-time state machine.

mod dwell;
mod zone;

pub use dwell::{DwellEvent, DwellRecord, DwellTracker, ExitReason};
pub use zone::{Zone, ZoneKind, authoritative_zone};
