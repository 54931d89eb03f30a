// crates/core/src/metrics.rs
//! Metric names and recording helpers.
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed (see `jobwire-observability`).

use std::time::Duration;

use metrics::{counter, gauge, histogram};

use crate::message::MessageType;

pub const JOBS_CREATED: &str = "jobwire_jobs_created_total";
pub const JOBS_FINISHED: &str = "jobwire_jobs_finished_total";
pub const JOBS_EVICTED: &str = "jobwire_jobs_evicted_total";
pub const JOB_DURATION: &str = "jobwire_job_duration_seconds";
pub const MESSAGES_PUBLISHED: &str = "jobwire_messages_published_total";
pub const MESSAGES_DROPPED: &str = "jobwire_messages_dropped_total";
pub const SUBSCRIBER_LAGGED: &str = "jobwire_subscriber_lagged_total";
pub const MISSING_JOB_REFS: &str = "jobwire_missing_job_refs_total";
pub const ADMISSION_QUEUE_DEPTH: &str = "jobwire_admission_queue_depth";
pub const REQUESTS_PROCESSED: &str = "jobwire_requests_processed_total";

/// Terminal outcome label for [`JOBS_FINISHED`] and [`REQUESTS_PROCESSED`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Failed => "failed",
        }
    }
}

pub(crate) fn record_job_created() {
    counter!(JOBS_CREATED).increment(1);
}

pub(crate) fn record_job_finished(outcome: Outcome, duration: Option<Duration>) {
    counter!(JOBS_FINISHED, "outcome" => outcome.as_str()).increment(1);
    if let Some(d) = duration {
        histogram!(JOB_DURATION, "outcome" => outcome.as_str()).record(d.as_secs_f64());
    }
}

pub(crate) fn record_jobs_evicted(count: usize) {
    counter!(JOBS_EVICTED).increment(count as u64);
}

pub(crate) fn record_message_published(kind: MessageType) {
    counter!(MESSAGES_PUBLISHED, "type" => kind.as_str()).increment(1);
}

pub(crate) fn record_message_dropped() {
    counter!(MESSAGES_DROPPED).increment(1);
}

pub(crate) fn record_subscriber_lagged(skipped: u64) {
    counter!(SUBSCRIBER_LAGGED).increment(skipped);
}

pub(crate) fn record_missing_job_ref(operation: &'static str) {
    counter!(MISSING_JOB_REFS, "operation" => operation).increment(1);
}

pub(crate) fn record_admission_depth(depth: usize) {
    gauge!(ADMISSION_QUEUE_DEPTH).set(depth as f64);
}

pub(crate) fn record_request_processed(outcome: Outcome) {
    counter!(REQUESTS_PROCESSED, "outcome" => outcome.as_str()).increment(1);
}
