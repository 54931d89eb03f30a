// crates/core/src/executor.rs
//! Runs tool bodies on the worker pool and normalizes every outcome to a
//! completed or failed job.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;

use crate::context::JobContext;
use crate::error::JobError;
use crate::pool::WorkerPool;
use crate::registry::JobRegistry;
use crate::tool::{DynTool, ToolRegistry};
use crate::types::Job;

/// Task executor.
///
/// Call [`submit`](Self::submit) (or [`submit_by_name`](Self::submit_by_name))
/// to queue a job; a pool worker validates the input, marks the job running,
/// invokes the body, and records the result or the failure. Nothing a body
/// does, including panicking, escapes the worker.
pub struct Executor {
    registry: Arc<JobRegistry>,
    tools: ToolRegistry,
    pool: WorkerPool,
}

impl Executor {
    pub fn new(registry: Arc<JobRegistry>, workers: usize) -> Result<Self, JobError> {
        Ok(Self {
            registry,
            tools: ToolRegistry::new(),
            pool: WorkerPool::new(workers)?,
        })
    }

    /// Attach the tools used by [`submit_by_name`](Self::submit_by_name).
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn workers(&self) -> usize {
        self.pool.size()
    }

    /// Jobs admitted but not yet picked up by a worker.
    pub fn queued(&self) -> usize {
        self.pool.queued()
    }

    /// Queue `job` to run `tool` with `raw_input`.
    ///
    /// A job is accepted once: submitting it again, or submitting a job that
    /// already left `Created`, returns [`JobError::AlreadySubmitted`] and
    /// leaves the job untouched. If the pool is shut down the job is failed
    /// and [`JobError::ExecutorClosed`] is returned. Otherwise the job always
    /// ends `Completed` or `Failed`.
    pub fn submit(&self, tool: Arc<dyn DynTool>, job: &Job, raw_input: Value) -> Result<(), JobError> {
        self.registry.claim(&job.id)?;

        let registry = Arc::clone(&self.registry);
        let job_id = job.id.clone();
        tracing::debug!(job_id = %job_id, tool = tool.name(), "Submitting job");
        let admitted = self
            .pool
            .execute(move || run_job(&registry, tool.as_ref(), &job_id, raw_input));
        if let Err(e) = &admitted {
            self.registry.fail_job(&job.id, &e.to_string());
        }
        admitted
    }

    /// Resolve `tool_name` (name or namespace), create a job for it and
    /// queue it.
    pub fn submit_by_name(&self, tool_name: &str, raw_input: Value) -> Result<Job, JobError> {
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| JobError::UnknownTool(tool_name.to_string()))?;
        let job = self.registry.create_job(tool.name());
        self.submit(tool, &job, raw_input)?;
        Ok(job)
    }

    /// Stop admitting jobs and wait for queued and running ones to finish.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("tools", &self.tools)
            .field("pool", &self.pool)
            .finish()
    }
}

fn run_job(registry: &Arc<JobRegistry>, tool: &dyn DynTool, job_id: &str, raw_input: Value) {
    let name = tool.name();

    let invocation = match tool.prepare(raw_input) {
        Ok(invocation) => invocation,
        Err(e) => {
            tracing::warn!(job_id = %job_id, tool = name, error = %e, "Rejected job input");
            registry.fail_job(job_id, &e.to_string());
            return;
        }
    };

    registry.update_progress(job_id, 0.0, &format!("starting {name}"));
    let ctx = JobContext::new(job_id.to_string(), name, Arc::clone(registry));

    match panic::catch_unwind(AssertUnwindSafe(|| invocation(&ctx))) {
        Ok(Ok(result)) => {
            registry.complete_job(job_id, result);
            tracing::debug!(job_id = %job_id, tool = name, "Job completed");
        }
        Ok(Err(e)) => {
            let error = format!("{e:#}");
            tracing::error!(job_id = %job_id, tool = name, error = %error, "Job failed");
            registry.fail_job(job_id, &error);
        }
        Err(payload) => {
            let error = format!("panicked: {}", panic_message(payload.as_ref()));
            tracing::error!(job_id = %job_id, tool = name, error = %error, "Job body panicked");
            registry.fail_job(job_id, &error);
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
