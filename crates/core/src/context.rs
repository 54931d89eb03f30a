// crates/core/src/context.rs
//! Handle given to a running job body.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::message::MessageType;
use crate::registry::JobRegistry;
use crate::types::JobId;

/// What a job body may do while it runs: report progress and emit plot or
/// log events for its own job.
#[derive(Clone)]
pub struct JobContext {
    job_id: JobId,
    tool_name: String,
    registry: Arc<JobRegistry>,
}

impl JobContext {
    pub fn new(job_id: JobId, tool_name: impl Into<String>, registry: Arc<JobRegistry>) -> Self {
        Self {
            job_id,
            tool_name: tool_name.into(),
            registry,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Report progress (nominally 0–100) with a status line.
    pub fn update_progress(&self, progress: f64, message: &str) {
        self.registry.update_progress(&self.job_id, progress, message);
    }

    /// Publish a PLOT event carrying `data`.
    pub fn publish_plot<T: Serialize + ?Sized>(&self, data: &T) {
        self.registry
            .channel()
            .publish(MessageType::Plot, &self.job_id, data);
    }

    /// Publish a free-form LOG event.
    pub fn log(&self, message: &str) {
        self.registry.channel().publish(
            MessageType::Log,
            &self.job_id,
            &json!({ "event": "log", "message": message }),
        );
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job_id)
            .field("tool_name", &self.tool_name)
            .finish()
    }
}
