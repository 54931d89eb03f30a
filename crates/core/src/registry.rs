// crates/core/src/registry.rs
//! The job registry: sole owner and mutator of [`Job`] records.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, ReentrantMutex};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::channel::MessageChannel;
use crate::error::JobError;
use crate::message::MessageType;
use crate::metrics::{self, Outcome};
use crate::retention::RetentionPolicy;
use crate::types::{Job, JobId, JobStatus};

type IdSource = Box<dyn Fn() -> JobId + Send + Sync>;

/// What a mutation decided to do with the record it was handed.
enum Update {
    Publish(MessageType, Value),
    Ignore(&'static str),
}

/// Shared job table. Every successful mutation publishes exactly one
/// [`Message`](crate::message::Message) on the attached channel, so
/// observers learn about changes without touching the registry.
///
/// All operations take one re-entrant lock around the map mutation and the
/// publish. The `RefCell` borrow ends before publishing, so a thread that
/// already holds the lock may call back into the registry safely.
///
/// Unknown job ids are tolerated: mutations on them are logged no-ops.
pub struct JobRegistry {
    jobs: ReentrantMutex<RefCell<HashMap<JobId, Job>>>,
    /// Jobs handed to an executor. A job is claimed at most once.
    claimed: Mutex<HashSet<JobId>>,
    channel: Arc<MessageChannel>,
    retention: RetentionPolicy,
    next_id: IdSource,
}

impl JobRegistry {
    pub fn new(channel: Arc<MessageChannel>) -> Self {
        Self::with_retention(channel, RetentionPolicy::keep_all())
    }

    pub fn with_retention(channel: Arc<MessageChannel>, retention: RetentionPolicy) -> Self {
        Self {
            jobs: ReentrantMutex::new(RefCell::new(HashMap::new())),
            claimed: Mutex::new(HashSet::new()),
            channel,
            retention,
            next_id: Box::new(random_job_id),
        }
    }

    /// Replace the id generator. Collisions are still retried.
    pub fn with_id_source(mut self, source: impl Fn() -> JobId + Send + Sync + 'static) -> Self {
        self.next_id = Box::new(source);
        self
    }

    /// The channel this registry publishes on.
    pub fn channel(&self) -> &Arc<MessageChannel> {
        &self.channel
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Register a new job in `Created` state and publish a LOG event.
    pub fn create_job(&self, tool_name: &str) -> Job {
        let guard = self.jobs.lock();

        if !self.retention.is_noop() {
            self.evict(Utc::now());
        }

        let job = {
            let mut jobs = guard.borrow_mut();
            let mut id = (self.next_id)();
            while jobs.contains_key(&id) {
                tracing::debug!(job_id = %id, "Job id collision, regenerating");
                id = (self.next_id)();
            }
            let job = Job::new(id.clone(), tool_name);
            jobs.insert(id, job.clone());
            job
        };

        self.channel.publish(
            MessageType::Log,
            &job.id,
            &json!({ "event": "job_created", "tool": tool_name }),
        );
        metrics::record_job_created();
        tracing::debug!(job_id = %job.id, tool = tool_name, "Created job");
        job
    }

    /// Snapshot of a job, or `None` if it was never created or was evicted.
    pub fn get_job(&self, id: &str) -> Option<Job> {
        let guard = self.jobs.lock();
        let jobs = guard.borrow();
        jobs.get(id).cloned()
    }

    /// Record progress. The first call moves a `Created` job to `Running`.
    ///
    /// Neither monotonicity nor the 0–100 range is enforced.
    pub fn update_progress(&self, id: &str, progress: f64, message: &str) -> bool {
        self.apply(id, "update_progress", |job| {
            if job.status.is_terminal() {
                return Update::Ignore("progress update after terminal state");
            }
            job.status = JobStatus::Running;
            job.progress = progress;
            job.message = message.to_string();
            Update::Publish(
                MessageType::Progress,
                json!({ "progress": progress, "message": message }),
            )
        })
        .is_some()
    }

    /// Mark a job completed with `result` and publish a RESULT event.
    pub fn complete_job(&self, id: &str, result: Value) -> bool {
        let updated = self.apply(id, "complete_job", |job| {
            if job.status.is_terminal() {
                return Update::Ignore("completion of an already finished job");
            }
            job.complete(result.clone());
            Update::Publish(MessageType::Result, result)
        });
        if let Some(job) = &updated {
            metrics::record_job_finished(Outcome::Completed, job_duration(job));
        }
        updated.is_some()
    }

    /// Mark a job failed with `error` and publish an ERROR event.
    pub fn fail_job(&self, id: &str, error: &str) -> bool {
        let updated = self.apply(id, "fail_job", |job| {
            if job.status.is_terminal() {
                return Update::Ignore("failure of an already finished job");
            }
            job.fail(error);
            Update::Publish(MessageType::Error, json!({ "error": error }))
        });
        if let Some(job) = &updated {
            metrics::record_job_finished(Outcome::Failed, job_duration(job));
        }
        updated.is_some()
    }

    /// Reserve a `Created` job for execution. Succeeds once per job, so a
    /// body can never be started twice for the same id.
    pub fn claim(&self, id: &str) -> Result<(), JobError> {
        let guard = self.jobs.lock();
        let jobs = guard.borrow();
        let job = jobs
            .get(id)
            .ok_or_else(|| JobError::UnknownJob(id.to_string()))?;
        if job.status != JobStatus::Created || !self.claimed.lock().insert(id.to_string()) {
            tracing::warn!(job_id = %id, status = %job.status, "Rejecting duplicate submission");
            return Err(JobError::AlreadySubmitted(id.to_string()));
        }
        Ok(())
    }

    /// All tracked jobs, oldest first.
    pub fn list_jobs(&self) -> Vec<Job> {
        let guard = self.jobs.lock();
        let mut jobs: Vec<Job> = guard.borrow().values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Jobs not yet in a terminal state.
    pub fn active_jobs(&self) -> Vec<Job> {
        self.list_jobs()
            .into_iter()
            .filter(|j| !j.status.is_terminal())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply the retention policy as of `now`. Returns the evicted ids.
    ///
    /// Evictions publish nothing.
    pub fn evict(&self, now: DateTime<Utc>) -> Vec<JobId> {
        let guard = self.jobs.lock();
        let evicted = self.retention.select(&guard.borrow(), now);
        if !evicted.is_empty() {
            let mut jobs = guard.borrow_mut();
            let mut claimed = self.claimed.lock();
            for id in &evicted {
                jobs.remove(id);
                claimed.remove(id);
            }
            metrics::record_jobs_evicted(evicted.len());
            tracing::debug!(count = evicted.len(), "Evicted finished jobs");
        }
        evicted
    }

    fn apply<F>(&self, id: &str, operation: &'static str, f: F) -> Option<Job>
    where
        F: FnOnce(&mut Job) -> Update,
    {
        let guard = self.jobs.lock();

        let outcome = {
            let mut jobs = guard.borrow_mut();
            jobs.get_mut(id).map(|job| {
                let update = f(job);
                (update, job.clone())
            })
        };

        match outcome {
            None => {
                metrics::record_missing_job_ref(operation);
                tracing::warn!(job_id = %id, operation, "Ignoring update for unknown job");
                None
            }
            Some((Update::Ignore(reason), job)) => {
                tracing::warn!(job_id = %id, operation, status = %job.status, "Ignoring {reason}");
                None
            }
            Some((Update::Publish(kind, data), job)) => {
                self.channel.publish(kind, id, &data);
                Some(job)
            }
        }
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.len())
            .field("retention", &self.retention)
            .finish()
    }
}

fn random_job_id() -> JobId {
    let hex = Uuid::new_v4().simple().to_string();
    format!("job_{}", &hex[..8])
}

fn job_duration(job: &Job) -> Option<std::time::Duration> {
    job.duration().and_then(|d| d.to_std().ok())
}
