//! Gateway wire messages
//!
//! Commands and events travel as JSON text frames tagged by `type`, with
//! camelCase fields. Audio travels as binary frames and never goes through
//! serde.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::recording::{RecordingOptions, RecordingStatus, StopReason};
use crate::relay::StreamInfo;

/// Command sent by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    StartStream {
        station_id: String,
        station_url: String,
    },
    StopStream {
        station_id: String,
    },
    StartRecording {
        recording_id: String,
        /// Informational; recordings pull under their own relay key
        #[serde(default)]
        station_id: Option<String>,
        station_url: String,
        #[serde(default)]
        options: Option<RecordingOptions>,
    },
    StopRecording {
        recording_id: String,
    },
    GetRecordingStatus,
}

impl ClientCommand {
    /// Prefix of the error message sent when this command fails
    pub fn failure_context(&self) -> &'static str {
        match self {
            ClientCommand::StartStream { .. } => "Failed to start stream",
            ClientCommand::StopStream { .. } => "Failed to stop stream",
            ClientCommand::StartRecording { .. } => "Failed to start recording",
            ClientCommand::StopRecording { .. } => "Failed to stop recording",
            ClientCommand::GetRecordingStatus => "Failed to get recording status",
        }
    }
}

/// Event pushed to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    StreamStarted {
        station_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        info: Option<StreamInfo>,
    },
    StreamStopped {
        station_id: String,
    },
    Error {
        message: String,
    },
    RecordingStarted {
        recording_id: String,
        filename: String,
    },
    RecordingUpdate {
        recording_id: String,
        duration: u64,
    },
    RecordingStopped {
        recording_id: String,
        /// Absent when the id was not recording
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<StopReason>,
    },
    RecordingStatus {
        recordings: Vec<RecordingStatus>,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Item queued for delivery to a client
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Sent as a JSON text frame
    Event(ServerEvent),
    /// Sent as a binary frame, unmodified
    Audio(Bytes),
}

impl From<ServerEvent> for Outbound {
    fn from(event: ServerEvent) -> Self {
        Outbound::Event(event)
    }
}
