use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use muse_core::types::TIME_FORMAT;

#[derive(Debug, Error)]
pub enum ClockError {
    #[error("Invalid time format '{value}', expected 'YYYY-MM-DD HH:MM:SS'")]
    InvalidFormat { value: String },
}

/// One transformation applied to a session's virtual timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeActionKind {
    Scale,
    Offset,
    Freeze,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeAction {
    #[serde(rename = "type")]
    pub kind: TimeActionKind,
    #[serde(default = "default_value")]
    pub value: f64,
    #[serde(default)]
    pub note: Option<String>,
}

fn default_value() -> f64 {
    1.0
}

impl TimeAction {
    pub fn scale(value: f64) -> Self {
        Self {
            kind: TimeActionKind::Scale,
            value,
            note: None,
        }
    }

    pub fn offset(value: f64) -> Self {
        Self {
            kind: TimeActionKind::Offset,
            value,
            note: None,
        }
    }

    pub fn freeze() -> Self {
        Self {
            kind: TimeActionKind::Freeze,
            value: 0.0,
            note: None,
        }
    }
}

/// Timeline configuration for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionClock {
    pub session_id: String,
    pub base_virtual: NaiveDateTime,
    pub base_real: NaiveDateTime,
    pub actions: Vec<TimeAction>,
    pub updated_at: Option<String>,
    pub real_updated_at: Option<String>,
}

/// Output formats for clock reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeFormat {
    #[default]
    Readable,
    Iso,
    Timestamp,
    Logfile,
}

impl TimeFormat {
    pub fn render(self, dt: NaiveDateTime) -> String {
        match self {
            TimeFormat::Readable => dt.format(TIME_FORMAT).to_string(),
            TimeFormat::Iso => dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            TimeFormat::Timestamp => dt.and_utc().timestamp().to_string(),
            TimeFormat::Logfile => dt.format("%Y%m%d%H%M%S").to_string(),
        }
    }
}

pub(crate) fn parse_time(value: &str) -> Result<NaiveDateTime, ClockError> {
    NaiveDateTime::parse_from_str(value, TIME_FORMAT).map_err(|_| ClockError::InvalidFormat {
        value: value.to_string(),
    })
}
