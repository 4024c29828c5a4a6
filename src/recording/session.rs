//! Recording session types

use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::relay::SessionKey;

/// Options supplied with a start request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOptions {
    /// Stop automatically after this many seconds
    ///
    /// Fractional values are accepted and rounded up to whole seconds.
    #[serde(default, alias = "maxDuration", deserialize_with = "whole_seconds")]
    pub max_duration_seconds: Option<u64>,
}

fn whole_seconds<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<f64>::deserialize(deserializer)? {
        None => Ok(None),
        Some(secs) if secs.is_finite() && secs >= 0.0 && secs <= u64::MAX as f64 => {
            Ok(Some(secs.ceil() as u64))
        }
        Some(secs) => Err(D::Error::custom(format!(
            "maxDurationSeconds must be a non-negative number of seconds, got {}",
            secs
        ))),
    }
}

impl RecordingOptions {
    pub fn max_duration(seconds: u64) -> Self {
        Self {
            max_duration_seconds: Some(seconds),
        }
    }
}

/// Why a recording stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `stop` was called
    Requested,
    /// The max-duration timer fired
    MaxDuration,
    /// The relay session ended or was stopped
    SourceEnded,
    /// Upstream failure, lag, or a write error
    Failed,
}

/// Lifecycle state of a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Active,
    Stopped(StopReason),
}

impl RecordingState {
    pub fn is_active(&self) -> bool {
        matches!(self, RecordingState::Active)
    }
}

/// Immutable description of one capture
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub recording_id: String,
    /// Relay session supplying the bytes
    pub source_key: SessionKey,
    pub filename: String,
    pub file_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub max_duration_seconds: Option<u64>,
    pub(super) started: Instant,
}

impl RecordingSession {
    /// Whole seconds since the session started
    pub fn elapsed_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

/// One row of a status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    pub recording_id: String,
    pub duration: u64,
    pub is_active: bool,
}

/// Final figures of a stopped recording
///
/// Everything a caller needs to update its own recordings catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    pub recording_id: String,
    pub filename: String,
    pub started_at: DateTime<Utc>,
    /// Seconds, frozen at the moment the recording stopped
    pub duration: u64,
    /// File size in bytes
    pub bytes_written: u64,
    pub reason: StopReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Metadata of a recording file on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStats {
    pub filename: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}
