// crates/core/src/config.rs
//! Runtime configuration: defaults, then an optional TOML file, then
//! `JOBWIRE_*` environment overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::retention::RetentionPolicy;

pub const ENV_WORKERS: &str = "JOBWIRE_WORKERS";
pub const ENV_REQUEST_POLL_TIMEOUT_MS: &str = "JOBWIRE_REQUEST_POLL_TIMEOUT_MS";
pub const ENV_DRAIN_INTERVAL_MS: &str = "JOBWIRE_DRAIN_INTERVAL_MS";
pub const ENV_RETENTION_TTL_SECS: &str = "JOBWIRE_RETENTION_TTL_SECS";
pub const ENV_MAX_FINISHED_JOBS: &str = "JOBWIRE_MAX_FINISHED_JOBS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobwireConfig {
    /// Executor worker threads.
    pub workers: usize,
    /// How long the request consumer waits before re-checking for shutdown.
    pub request_poll_timeout_ms: u64,
    /// Poller tick.
    pub drain_interval_ms: u64,
    /// Evict finished jobs older than this. `None` keeps them.
    pub retention_ttl_secs: Option<u64>,
    /// Keep at most this many finished jobs. `None` is unbounded.
    pub max_finished_jobs: Option<usize>,
}

impl Default for JobwireConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            request_poll_timeout_ms: 100,
            drain_interval_ms: 100,
            retention_ttl_secs: None,
            max_finished_jobs: Some(1000),
        }
    }
}

impl JobwireConfig {
    /// Defaults, overlaid with `path` (if given) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        tracing::debug!(?config, "Loaded configuration");
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        toml::from_str(&text).map_err(|e| ConfigError::Malformed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Apply overrides from `lookup`. An empty value clears optional limits.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_WORKERS) {
            self.workers = parse_env(ENV_WORKERS, &v)?;
        }
        if let Some(v) = lookup(ENV_REQUEST_POLL_TIMEOUT_MS) {
            self.request_poll_timeout_ms = parse_env(ENV_REQUEST_POLL_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_DRAIN_INTERVAL_MS) {
            self.drain_interval_ms = parse_env(ENV_DRAIN_INTERVAL_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_RETENTION_TTL_SECS) {
            self.retention_ttl_secs = parse_optional_env(ENV_RETENTION_TTL_SECS, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_FINISHED_JOBS) {
            self.max_finished_jobs = parse_optional_env(ENV_MAX_FINISHED_JOBS, &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.request_poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "request_poll_timeout_ms must be positive".into(),
            ));
        }
        if self.drain_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "drain_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            ttl: self.retention_ttl_secs.map(Duration::from_secs),
            max_finished: self.max_finished_jobs,
        }
    }

    pub fn request_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.request_poll_timeout_ms)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
    })
}

fn parse_optional_env<T: std::str::FromStr>(var: &str, value: &str) -> Result<Option<T>, ConfigError> {
    if value.trim().is_empty() {
        return Ok(None);
    }
    parse_env(var, value).map(Some)
}
