// crates/core/src/processor.rs
//! Serial processing of conversational requests on one consumer thread.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_trait::async_trait;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::channel::MessageChannel;
use crate::error::JobError;
use crate::executor::panic_message;
use crate::message::MessageType;
use crate::metrics::{self, Outcome};
use crate::types::JobId;

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// One unit of conversational work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub job_id: JobId,
    pub payload: String,
    #[serde(default)]
    pub context: Value,
}

impl Request {
    pub fn new(job_id: impl Into<JobId>, payload: impl Into<String>, context: Value) -> Self {
        Self {
            job_id: job_id.into(),
            payload: payload.into(),
            context,
        }
    }
}

/// Handles one request at a time. The returned value becomes the `result`
/// of a completed JOB_STATUS message.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: &Request) -> anyhow::Result<Value>;
}

/// FIFO request queue drained by a single consumer thread.
///
/// Results go straight onto the [`MessageChannel`] as JOB_STATUS messages;
/// the job registry is not involved. [`stop`](Self::stop) blocks until the
/// in-flight request (if any) finishes. Requests still queued at that point
/// stay queued and run after the next [`start`](Self::start).
pub struct RequestProcessor {
    handler: Arc<dyn RequestHandler>,
    channel: Arc<MessageChannel>,
    sender: Sender<Request>,
    receiver: Receiver<Request>,
    poll_timeout: Duration,
    worker: Mutex<Option<Running>>,
}

/// A live consumer thread and the flag that stops it. Each run gets its own
/// flag, so a later `start` can never clear the flag of a run being stopped.
struct Running {
    handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
}

impl RequestProcessor {
    pub fn new(
        handler: Arc<dyn RequestHandler>,
        channel: Arc<MessageChannel>,
        poll_timeout: Duration,
    ) -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            handler,
            channel,
            sender,
            receiver,
            poll_timeout,
            worker: Mutex::new(None),
        }
    }

    /// Spawn the consumer thread. Calling it while already running is a no-op.
    pub fn start(&self) -> Result<(), JobError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            tracing::debug!("Request processor already running");
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(JobError::Runtime)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let consumer = Consumer {
            handler: Arc::clone(&self.handler),
            channel: Arc::clone(&self.channel),
            receiver: self.receiver.clone(),
            poll_timeout: self.poll_timeout,
            shutdown: Arc::clone(&shutdown),
        };
        let handle = thread::Builder::new()
            .name("jobwire-requests".into())
            .spawn(move || consumer.run(runtime))
            .map_err(|e| JobError::spawn("request processor", e))?;

        *worker = Some(Running { handle, shutdown });
        tracing::info!(pending = self.pending(), "Request processor started");
        Ok(())
    }

    /// Signal the consumer to exit and wait for it.
    pub fn stop(&self) {
        let Some(running) = self.worker.lock().take() else {
            return;
        };
        running.shutdown.store(true, Ordering::SeqCst);
        if running.handle.join().is_err() {
            tracing::error!("Request processor thread panicked");
        }
        tracing::info!(pending = self.pending(), "Request processor stopped");
    }

    /// Queue a request. Accepted whether or not the processor is running.
    pub fn submit(&self, request: Request) {
        tracing::debug!(job_id = %request.job_id, "Queued request");
        // The processor owns a receiver, so the queue can never be disconnected.
        let _ = self.sender.send(request);
    }

    /// Requests queued but not yet picked up.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }
}

impl Drop for RequestProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for RequestProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestProcessor")
            .field("running", &self.is_running())
            .field("pending", &self.pending())
            .field("poll_timeout", &self.poll_timeout)
            .finish()
    }
}

struct Consumer {
    handler: Arc<dyn RequestHandler>,
    channel: Arc<MessageChannel>,
    receiver: Receiver<Request>,
    poll_timeout: Duration,
    shutdown: Arc<AtomicBool>,
}

impl Consumer {
    fn run(self, runtime: tokio::runtime::Runtime) {
        while !self.shutdown.load(Ordering::SeqCst) {
            match self.receiver.recv_timeout(self.poll_timeout) {
                Ok(request) => self.process(&runtime, request),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::debug!("Request consumer exiting");
    }

    fn process(&self, runtime: &tokio::runtime::Runtime, request: Request) {
        let span = tracing::debug_span!("request", job_id = %request.job_id);
        let _enter = span.enter();

        let outcome =
            runtime.block_on(AssertUnwindSafe(self.handler.handle(&request)).catch_unwind());

        let (status, data) = match outcome {
            Ok(Ok(result)) => (
                Outcome::Completed,
                json!({ "status": "completed", "result": result }),
            ),
            Ok(Err(e)) => {
                let error = format!("{e:#}");
                tracing::error!(error = %error, "Request failed");
                (
                    Outcome::Failed,
                    json!({ "status": "failed", "error": error }),
                )
            }
            Err(payload) => {
                let error = format!("panicked: {}", panic_message(payload.as_ref()));
                tracing::error!(error = %error, "Request handler panicked");
                (
                    Outcome::Failed,
                    json!({ "status": "failed", "error": error }),
                )
            }
        };

        self.channel
            .publish(MessageType::JobStatus, &request.job_id, &data);
        metrics::record_request_processed(status);
    }
}
