// crates/core/src/lib.rs
//! Job execution and event notification.
//!
//! A [`JobRegistry`] owns job records and publishes one [`Message`] per
//! state change onto a [`MessageChannel`]. The [`Executor`] runs [`Tool`]
//! bodies on a bounded worker pool; the [`RequestProcessor`] serializes
//! conversational requests on a single consumer thread. A poller observes
//! everything by calling [`MessageChannel::drain`] on a timer.

pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod message;
pub mod metrics;
pub mod pool;
pub mod processor;
pub mod registry;
pub mod retention;
pub mod tool;
pub mod types;

pub use channel::{MessageChannel, Subscription};
pub use config::JobwireConfig;
pub use context::JobContext;
pub use error::{ConfigError, JobError};
pub use executor::Executor;
pub use message::{Message, MessageType};
pub use processor::{Request, RequestHandler, RequestProcessor};
pub use registry::JobRegistry;
pub use retention::RetentionPolicy;
pub use tool::{DynTool, NamespaceInfo, Tool, ToolRegistry, ToolSchema};
pub use types::{Job, JobId, JobStatus};
