//! Tracker configuration types
//!
//! The knobs of the decision engine. Everything here has a default so a
//! session can be created from `TrackerConfig::new()` alone; the application
//! layer fills the values from its command line and config file.

use crate::types::{Result, TrackerError};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// Upper bound for the grace margin and the start tolerance (one day)
pub const MAX_MARGIN_SECONDS: i64 = 24 * 3600;

/// Upper bound for the selection wait and the record length (one week)
pub const MAX_MINUTES: u64 = 7 * 24 * 60;

/// Selection wait used when zero minutes are requested
pub const FALLBACK_SELECTION_WAIT_MINUTES: u64 = 30;

/// Configuration for a tracking session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Safety margin (seconds) applied when selecting the target event
    #[serde(default = "default_grace_seconds")]
    pub grace_seconds: i64,

    /// Window (seconds) in which a following-slot start time counts as
    /// imminent enough to open the gate
    #[serde(default = "default_start_tolerance")]
    pub start_tolerance_seconds: i64,

    /// Give up if the target has not been observed within this many minutes
    #[serde(default)]
    pub selection_wait_minutes: Option<u64>,

    /// Stop after recording for this many minutes (default: whole event)
    #[serde(default)]
    pub record_length_minutes: Option<u64>,
}

fn default_grace_seconds() -> i64 {
    60
}

fn default_start_tolerance() -> i64 {
    5
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            grace_seconds: default_grace_seconds(),
            start_tolerance_seconds: default_start_tolerance(),
            selection_wait_minutes: None,
            record_length_minutes: None,
        }
    }
}

impl TrackerConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the selection grace margin
    pub fn with_grace_seconds(mut self, seconds: i64) -> Self {
        self.grace_seconds = seconds;
        self
    }

    /// Builder method: set the following-slot start tolerance
    pub fn with_start_tolerance(mut self, seconds: i64) -> Self {
        self.start_tolerance_seconds = seconds;
        self
    }

    /// Builder method: set the selection timeout. Zero means the fallback
    /// wait of 30 minutes.
    pub fn with_selection_wait(mut self, minutes: u64) -> Self {
        self.selection_wait_minutes = Some(if minutes == 0 {
            FALLBACK_SELECTION_WAIT_MINUTES
        } else {
            minutes
        });
        self
    }

    /// Builder method: set the maximum recording length. Zero means no limit.
    pub fn with_record_length(mut self, minutes: u64) -> Self {
        self.record_length_minutes = if minutes > 0 { Some(minutes) } else { None };
        self
    }

    /// Selection timeout, `None` when disabled or not representable
    pub fn selection_wait(&self) -> Option<TimeDelta> {
        let minutes = match self.selection_wait_minutes? {
            0 => FALLBACK_SELECTION_WAIT_MINUTES,
            m => m,
        };
        TimeDelta::try_minutes(i64::try_from(minutes).ok()?)
    }

    /// Maximum recording length, `None` when unlimited or not representable
    pub fn record_length(&self) -> Option<TimeDelta> {
        let minutes = self.record_length_minutes.filter(|m| *m > 0)?;
        TimeDelta::try_minutes(i64::try_from(minutes).ok()?)
    }

    /// Check every value against its bounds
    pub fn validate(&self) -> Result<()> {
        for (name, seconds) in [
            ("grace_seconds", self.grace_seconds),
            ("start_tolerance_seconds", self.start_tolerance_seconds),
        ] {
            if !(0..=MAX_MARGIN_SECONDS).contains(&seconds) {
                return Err(TrackerError::InvalidConfig(format!(
                    "{} must be within 0..={}, got {}",
                    name, MAX_MARGIN_SECONDS, seconds
                )));
            }
        }
        for (name, minutes) in [
            ("selection_wait_minutes", self.selection_wait_minutes),
            ("record_length_minutes", self.record_length_minutes),
        ] {
            if let Some(minutes) = minutes.filter(|m| *m > MAX_MINUTES) {
                return Err(TrackerError::InvalidConfig(format!(
                    "{} must be at most {}, got {}",
                    name, MAX_MINUTES, minutes
                )));
            }
        }
        Ok(())
    }
}
