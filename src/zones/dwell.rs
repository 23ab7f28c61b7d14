//! Zone membership per track and the dwell records it produces.

use std::collections::BTreeMap;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Zone, ZoneKind, authoritative_zone};
use crate::Timestamp;
use crate::identity::CarrierId;
use crate::projection::FloorPoint;
use crate::tracker::Track;

/// Why a dwell record was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    #[serde(rename = "left-zone")]
    LeftZone,
    #[serde(rename = "lost")]
    Lost,
    #[serde(rename = "shutdown")]
    Shutdown,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::LeftZone => "left-zone",
            ExitReason::Lost => "lost",
            ExitReason::Shutdown => "shutdown",
        }
    }
}

/// Interval of a track's presence in one zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DwellRecord {
    pub track_id: u64,
    pub carrier_id: Option<CarrierId>,
    pub zone_id: String,
    pub zone_kind: ZoneKind,
    pub entered_at: Timestamp,
    pub exited_at: Option<Timestamp>,
    pub exit_reason: Option<ExitReason>,
}

impl DwellRecord {
    pub fn is_open(&self) -> bool {
        self.exited_at.is_none()
    }

    /// Closed records measure to their exit, open ones to `now`.
    pub fn duration(&self, now: Timestamp) -> TimeDelta {
        self.exited_at.unwrap_or(now) - self.entered_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum DwellEvent {
    Opened(DwellRecord),
    /// An open record gained or changed its carrier attribution.
    Updated(DwellRecord),
    Closed(DwellRecord),
}

impl DwellEvent {
    pub fn record(&self) -> &DwellRecord {
        match self {
            DwellEvent::Opened(r) | DwellEvent::Updated(r) | DwellEvent::Closed(r) => r,
        }
    }
}

/// Open dwell records keyed by track.
///
/// A track is in at most one zone at a time, so there is never more than one
/// open record per (track, zone) pair.
#[derive(Debug, Default)]
pub struct DwellTracker {
    open: BTreeMap<u64, DwellRecord>,
}

impl DwellTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-evaluate which zone `track` is in and emit the resulting events.
    pub fn update_membership(
        &mut self,
        track: &Track,
        point: FloorPoint,
        zones: &[Zone],
        timestamp: Timestamp,
    ) -> Vec<DwellEvent> {
        let zone = authoritative_zone(zones, &point);
        let current = self.open.get(&track.track_id).map(|r| r.zone_id.as_str());
        if current == zone.map(|z| z.name.as_str()) {
            return Vec::new();
        }

        let mut events = Vec::new();
        events.extend(self.close_track(track.track_id, ExitReason::LeftZone, timestamp));
        if let Some(zone) = zone {
            let record = DwellRecord {
                track_id: track.track_id,
                carrier_id: track.carrier_id().cloned(),
                zone_id: zone.name.clone(),
                zone_kind: zone.kind.clone(),
                entered_at: timestamp,
                exited_at: None,
                exit_reason: None,
            };
            info!(
                track_id = track.track_id,
                zone = %zone.name,
                "dwell opened"
            );
            self.open.insert(track.track_id, record.clone());
            events.push(DwellEvent::Opened(record));
        }
        events
    }

    /// Close the track's open record, if any.
    pub fn close_track(
        &mut self,
        track_id: u64,
        reason: ExitReason,
        timestamp: Timestamp,
    ) -> Option<DwellEvent> {
        let mut record = self.open.remove(&track_id)?;
        record.exited_at = Some(timestamp.max(record.entered_at));
        record.exit_reason = Some(reason);
        info!(
            track_id,
            zone = %record.zone_id,
            reason = reason.as_str(),
            seconds = record.duration(timestamp).num_milliseconds() as f64 / 1000.0,
            "dwell closed"
        );
        Some(DwellEvent::Closed(record))
    }

    /// Attribute the track's open record to a newly resolved carrier.
    pub fn attribute_carrier(&mut self, track_id: u64, carrier: &CarrierId) -> Option<DwellEvent> {
        let record = self.open.get_mut(&track_id)?;
        if record.carrier_id.as_ref() == Some(carrier) {
            return None;
        }
        record.carrier_id = Some(carrier.clone());
        Some(DwellEvent::Updated(record.clone()))
    }

    /// Close every open record, oldest track first.
    pub fn close_all(&mut self, reason: ExitReason, timestamp: Timestamp) -> Vec<DwellEvent> {
        let ids: Vec<u64> = self.open.keys().copied().collect();
        ids.into_iter()
            .filter_map(|id| self.close_track(id, reason, timestamp))
            .collect()
    }

    pub fn open_record(&self, track_id: u64) -> Option<&DwellRecord> {
        self.open.get(&track_id)
    }

    pub fn open_records(&self) -> impl Iterator<Item = &DwellRecord> {
        self.open.values()
    }

    /// Live duration of the track's open record.
    pub fn open_dwell_duration(&self, track_id: u64, now: Timestamp) -> Option<TimeDelta> {
        self.open.get(&track_id).map(|r| r.duration(now))
    }
}
