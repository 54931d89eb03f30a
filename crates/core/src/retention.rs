// crates/core/src/retention.rs
//! Eviction policy for finished job records.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::types::{Job, JobId, JobStatus};

/// How long finished jobs stay queryable through `get_job`.
///
/// Only `Completed` and `Failed` jobs are ever selected; jobs still in
/// flight are kept no matter how old they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetentionPolicy {
    /// Evict finished jobs whose `completed_at` is older than this.
    pub ttl: Option<Duration>,
    /// Keep at most this many finished jobs, evicting the oldest first.
    pub max_finished: Option<usize>,
}

impl RetentionPolicy {
    /// Retain every job for the life of the process.
    pub fn keep_all() -> Self {
        Self::default()
    }

    pub fn is_noop(&self) -> bool {
        self.ttl.is_none() && self.max_finished.is_none()
    }

    /// Pick the ids to evict from `jobs` at time `now`.
    pub(crate) fn select(&self, jobs: &HashMap<JobId, Job>, now: DateTime<Utc>) -> Vec<JobId> {
        if self.is_noop() {
            return Vec::new();
        }

        let mut finished: Vec<(&JobId, DateTime<Utc>)> = jobs
            .iter()
            .filter(|(_, job)| matches!(job.status, JobStatus::Completed | JobStatus::Failed))
            .filter_map(|(id, job)| job.completed_at.map(|at| (id, at)))
            .collect();
        finished.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));

        let mut evicted = Vec::new();

        if let Some(ttl) = self.ttl {
            // An unrepresentable TTL means nothing is ever old enough.
            if let Ok(ttl) = chrono::Duration::from_std(ttl) {
                let cutoff = now - ttl;
                let expired = finished.iter().take_while(|(_, at)| *at < cutoff).count();
                evicted.extend(finished.drain(..expired).map(|(id, _)| id.clone()));
            }
        }

        if let Some(max) = self.max_finished {
            if finished.len() > max {
                let excess = finished.len() - max;
                evicted.extend(finished.drain(..excess).map(|(id, _)| id.clone()));
            }
        }

        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn finished_job(id: &str, completed_at: DateTime<Utc>) -> Job {
        let mut job = Job::new(id.to_string(), "t");
        job.complete(json!(null));
        job.completed_at = Some(completed_at);
        job
    }

    fn map(jobs: Vec<Job>) -> HashMap<JobId, Job> {
        jobs.into_iter().map(|j| (j.id.clone(), j)).collect()
    }

    #[test]
    fn test_keep_all_selects_nothing() {
        let now = Utc::now();
        let jobs = map(vec![finished_job("a", now - chrono::Duration::days(30))]);
        assert!(RetentionPolicy::keep_all().select(&jobs, now).is_empty());
    }

    #[test]
    fn test_ttl_evicts_only_expired_finished_jobs() {
        let now = Utc::now();
        let mut running = Job::new("running".into(), "t");
        running.status = JobStatus::Running;
        running.created_at = now - chrono::Duration::hours(5);

        let jobs = map(vec![
            finished_job("old", now - chrono::Duration::hours(2)),
            finished_job("fresh", now - chrono::Duration::seconds(10)),
            running,
        ]);
        let policy = RetentionPolicy {
            ttl: Some(Duration::from_secs(3600)),
            max_finished: None,
        };
        assert_eq!(policy.select(&jobs, now), vec!["old".to_string()]);
    }

    #[test]
    fn test_cap_evicts_oldest_first() {
        let now = Utc::now();
        let jobs = map(vec![
            finished_job("a", now - chrono::Duration::seconds(30)),
            finished_job("b", now - chrono::Duration::seconds(20)),
            finished_job("c", now - chrono::Duration::seconds(10)),
        ]);
        let policy = RetentionPolicy {
            ttl: None,
            max_finished: Some(1),
        };
        assert_eq!(policy.select(&jobs, now), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_ttl_and_cap_do_not_double_count() {
        let now = Utc::now();
        let jobs = map(vec![
            finished_job("expired", now - chrono::Duration::hours(3)),
            finished_job("b", now - chrono::Duration::seconds(20)),
            finished_job("c", now - chrono::Duration::seconds(10)),
        ]);
        let policy = RetentionPolicy {
            ttl: Some(Duration::from_secs(3600)),
            max_finished: Some(1),
        };
        assert_eq!(
            policy.select(&jobs, now),
            vec!["expired".to_string(), "b".to_string()]
        );
    }
}
