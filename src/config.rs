//! Tunable policy for the fusion engine.

use std::path::Path;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::{FusionError, Result};
use crate::identity::IdentityConfig;
use crate::tracker::TrackerConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub tracker: TrackerConfig,
    pub identity: IdentityConfig,
    /// Minimum spacing of position events per carrier, in seconds.
    pub position_log_interval_secs: f64,
    /// How long a removed carrier can be re-identified and keep its session, in seconds.
    pub reidentify_window_secs: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            identity: IdentityConfig::default(),
            position_log_interval_secs: 5.0,
            reidentify_window_secs: 10.0,
        }
    }
}

impl FusionConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.tracker.validate()?;
        self.identity.validate()?;
        for (name, value) in [
            ("position_log_interval_secs", self.position_log_interval_secs),
            ("reidentify_window_secs", self.reidentify_window_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(FusionError::config(format!(
                    "{name} must be a non-negative number of seconds"
                )));
            }
        }
        Ok(())
    }

    pub fn position_log_interval(&self) -> TimeDelta {
        seconds(self.position_log_interval_secs)
    }

    pub fn reidentify_window(&self) -> TimeDelta {
        seconds(self.reidentify_window_secs)
    }
}

fn seconds(secs: f64) -> TimeDelta {
    TimeDelta::milliseconds((secs * 1000.0).round() as i64)
}
