// crates/observability/src/lib.rs
//! Logging and Prometheus metrics setup for jobwire binaries.
//!
//! Library code only emits through the `tracing` and `metrics` facades;
//! nothing is recorded or printed until a binary calls the `init_*`
//! functions here.

use std::sync::OnceLock;

use jobwire_core::metrics::{
    ADMISSION_QUEUE_DEPTH, JOBS_CREATED, JOBS_EVICTED, JOBS_FINISHED, JOB_DURATION,
    MESSAGES_DROPPED, MESSAGES_PUBLISHED, MISSING_JOB_REFS, REQUESTS_PROCESSED, SUBSCRIBER_LAGGED,
};
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "warn,jobwire=info,jobwire_core=info";

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install a stderr `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. Returns `false` if a subscriber was already set.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Initialize the Prometheus metrics recorder.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::debug!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    // Jobs
    describe_counter!(JOBS_CREATED, "Jobs registered");
    describe_counter!(
        JOBS_FINISHED,
        "Jobs that reached a terminal state, by outcome"
    );
    describe_counter!(JOBS_EVICTED, "Finished jobs removed by the retention policy");
    describe_histogram!(
        JOB_DURATION,
        Unit::Seconds,
        "Time from job creation to its terminal state"
    );
    describe_gauge!(
        ADMISSION_QUEUE_DEPTH,
        "Jobs waiting for a free executor worker"
    );
    describe_counter!(
        MISSING_JOB_REFS,
        "Registry updates that referenced an unknown job id"
    );

    // Messages
    describe_counter!(MESSAGES_PUBLISHED, "Messages published, by type");
    describe_counter!(
        MESSAGES_DROPPED,
        "Messages dropped because their payload failed to serialize"
    );
    describe_counter!(
        SUBSCRIBER_LAGGED,
        "Messages skipped by subscribers that fell behind"
    );

    // Requests
    describe_counter!(
        REQUESTS_PROCESSED,
        "Conversational requests handled, by outcome"
    );
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}
