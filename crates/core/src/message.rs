// crates/core/src/message.rs
//! Event values flowing from producers to the poller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kind of event carried by a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Progress,
    Result,
    Error,
    Log,
    Plot,
    JobStatus,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Result => "result",
            Self::Error => "error",
            Self::Log => "log",
            Self::Plot => "plot",
            Self::JobStatus => "job_status",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable event describing a job state change.
///
/// Both the registry path and the request processor path produce this exact
/// shape, so a poller needs a single decoding path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Referenced job. Not checked against the registry.
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl Message {
    pub fn new(kind: MessageType, job_id: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            job_id: job_id.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} {}: {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.job_id,
            self.kind,
            self.data
        )
    }
}
