use serde::{Deserialize, Serialize};

use crate::Timestamp;
use crate::identity::{CarrierId, IdentityChange};
use crate::projection::FloorPoint;
use crate::zones::{DwellEvent, DwellRecord};

/// Append-only record handed to the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PersistenceEvent {
    DwellOpened {
        timestamp: Timestamp,
        record: DwellRecord,
    },
    DwellUpdated {
        timestamp: Timestamp,
        record: DwellRecord,
    },
    DwellClosed {
        timestamp: Timestamp,
        record: DwellRecord,
    },
    IdentityResolved {
        timestamp: Timestamp,
        track_id: u64,
        carrier_id: CarrierId,
        previous: Option<CarrierId>,
        confidence: f32,
        /// The carrier was seen recently and resumes its earlier session
        returning: bool,
    },
    CarrierLost {
        timestamp: Timestamp,
        track_id: u64,
        carrier_id: CarrierId,
        session_start: Timestamp,
    },
    Position {
        timestamp: Timestamp,
        track_id: u64,
        carrier_id: CarrierId,
        point: FloorPoint,
    },
}

impl PersistenceEvent {
    pub(crate) fn from_dwell(event: DwellEvent, timestamp: Timestamp) -> Self {
        match event {
            DwellEvent::Opened(record) => PersistenceEvent::DwellOpened {
                timestamp: record.entered_at,
                record,
            },
            DwellEvent::Updated(record) => PersistenceEvent::DwellUpdated { timestamp, record },
            DwellEvent::Closed(record) => PersistenceEvent::DwellClosed {
                timestamp: record.exited_at.unwrap_or(timestamp),
                record,
            },
        }
    }

    pub(crate) fn identity_resolved(
        change: IdentityChange,
        timestamp: Timestamp,
        returning: bool,
    ) -> Self {
        PersistenceEvent::IdentityResolved {
            timestamp,
            track_id: change.track_id,
            carrier_id: change.current,
            previous: change.previous,
            confidence: change.confidence,
            returning,
        }
    }

    /// Ordering key for the persistence store.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            PersistenceEvent::DwellOpened { timestamp, .. }
            | PersistenceEvent::DwellUpdated { timestamp, .. }
            | PersistenceEvent::DwellClosed { timestamp, .. }
            | PersistenceEvent::IdentityResolved { timestamp, .. }
            | PersistenceEvent::CarrierLost { timestamp, .. }
            | PersistenceEvent::Position { timestamp, .. } => *timestamp,
        }
    }

    pub fn track_id(&self) -> u64 {
        match self {
            PersistenceEvent::DwellOpened { record, .. }
            | PersistenceEvent::DwellUpdated { record, .. }
            | PersistenceEvent::DwellClosed { record, .. } => record.track_id,
            PersistenceEvent::IdentityResolved { track_id, .. }
            | PersistenceEvent::CarrierLost { track_id, .. }
            | PersistenceEvent::Position { track_id, .. } => *track_id,
        }
    }

    pub fn dwell_record(&self) -> Option<&DwellRecord> {
        match self {
            PersistenceEvent::DwellOpened { record, .. }
            | PersistenceEvent::DwellUpdated { record, .. }
            | PersistenceEvent::DwellClosed { record, .. } => Some(record),
            _ => None,
        }
    }
}
