use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Timestamp;
use crate::tracker::Rect;

/// Physical carrier identifier printed on its QR label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CarrierId(String);

impl CarrierId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Extract the carrier id from a QR payload.
    ///
    /// Labels carry either a bare id (`"12"`) or a link whose last path
    /// segment is the id (`"https://plant.example/carrier/12"`). Query strings
    /// and fragments are ignored. A link without a path, or whose last segment
    /// is empty, carries no id.
    pub fn from_payload(payload: &str) -> Option<Self> {
        let path = payload
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim();
        // Skip scheme and host so a bare link never yields its host name.
        let path = match path.split_once("://") {
            Some((_, rest)) => rest.split_once('/')?.1,
            None => path,
        };
        let id = path.rsplit('/').next()?.trim();
        if id.is_empty() || id.contains(char::is_whitespace) || id.contains(':') {
            return None;
        }
        Some(Self(id.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CarrierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A decoded QR label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrReading {
    pub payload: String,
    pub timestamp: Timestamp,
    /// Pixel region the code was decoded from.
    pub region: Rect,
}

impl QrReading {
    pub fn new(payload: impl Into<String>, timestamp: Timestamp, region: Rect) -> Self {
        Self {
            payload: payload.into(),
            timestamp,
            region,
        }
    }
}

/// Rolling QR evidence for one track and the carrier it resolves to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CarrierIdentity {
    carrier_id: Option<CarrierId>,
    confidence: f32,
    locked: bool,
    votes: VecDeque<CarrierId>,
}

impl CarrierIdentity {
    pub fn carrier_id(&self) -> Option<&CarrierId> {
        self.carrier_id.as_ref()
    }

    /// Share of the window agreeing with the resolved carrier.
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Whether the identity has reached the sticky threshold and resists single conflicting reads.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn votes(&self) -> impl Iterator<Item = &CarrierId> {
        self.votes.iter()
    }

    /// Add one vote. Returns true when the resolved carrier changed.
    pub(crate) fn record(&mut self, vote: CarrierId, window: usize, sticky_confidence: f32) -> bool {
        self.votes.push_back(vote);
        while self.votes.len() > window {
            self.votes.pop_front();
        }

        let mut tally: HashMap<&CarrierId, usize> = HashMap::new();
        for v in &self.votes {
            *tally.entry(v).or_default() += 1;
        }
        let top = tally.values().copied().max().unwrap_or(0);
        let current_count = self
            .carrier_id
            .as_ref()
            .and_then(|c| tally.get(c).copied())
            .unwrap_or(0);

        // Ties keep the current carrier, otherwise the most recently seen leader.
        let leader = if current_count == top {
            self.carrier_id.clone()
        } else {
            self.votes
                .iter()
                .rev()
                .find(|v| tally.get(v).copied() == Some(top))
                .cloned()
        };

        let changed = match (self.carrier_id.clone(), leader) {
            (_, None) => false,
            (None, Some(leader)) => {
                self.carrier_id = Some(leader);
                true
            }
            (Some(current), Some(leader)) if current == leader => false,
            (Some(_), Some(leader)) => {
                let required = if self.locked {
                    window / 2 + 1
                } else {
                    current_count + 1
                };
                if top >= required {
                    self.carrier_id = Some(leader);
                    self.locked = false;
                    true
                } else {
                    false
                }
            }
        };

        let agreeing = self
            .carrier_id
            .as_ref()
            .map_or(0, |c| self.votes.iter().filter(|v| *v == c).count());
        self.confidence = agreeing as f32 / self.votes.len() as f32;
        if self.confidence >= sticky_confidence {
            self.locked = true;
        }
        changed
    }
}
