// crates/core/tests/lifecycle.rs
//! End-to-end flows as a poller sees them: everything is observed through
//! `MessageChannel::drain` and `JobRegistry::get_job`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jobwire_core::{
    Executor, JobContext, JobRegistry, JobStatus, Message, MessageChannel, MessageType, Request,
    RequestHandler, RequestProcessor, RetentionPolicy, Tool, ToolRegistry,
};
use pretty_assertions::assert_eq;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

#[derive(Debug, Deserialize, Validate, JsonSchema)]
struct RampInput {
    #[validate(range(min = 1))]
    x: i64,
}

/// Reports `x` evenly spaced progress steps and returns `x`.
struct Ramp;

impl Tool for Ramp {
    type Input = RampInput;
    type Output = Value;

    fn name(&self) -> &str {
        "ramp"
    }

    fn execute(&self, ctx: &JobContext, input: RampInput) -> anyhow::Result<Value> {
        for step in 1..=input.x {
            ctx.update_progress(step as f64 * 100.0 / input.x as f64, "ramping");
        }
        Ok(json!({ "x": input.x }))
    }
}

fn setup(workers: usize) -> (Arc<MessageChannel>, Executor) {
    let channel = Arc::new(MessageChannel::new());
    let registry = Arc::new(JobRegistry::new(Arc::clone(&channel)));
    let mut tools = ToolRegistry::new();
    tools.register(Ramp);
    let executor = Executor::new(registry, workers).unwrap().with_tools(tools);
    (channel, executor)
}

/// Poll like a UI timer would until `done` says stop.
fn poll_until(channel: &MessageChannel, mut done: impl FnMut(&[Message]) -> bool) -> Vec<Message> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut seen = Vec::new();
    loop {
        seen.extend(channel.drain());
        if done(&seen) {
            return seen;
        }
        assert!(Instant::now() < deadline, "poller timed out with {} messages", seen.len());
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn is_terminal(m: &Message) -> bool {
    matches!(m.kind, MessageType::Result | MessageType::Error)
}

#[test]
fn manual_lifecycle_publishes_in_order() {
    let channel = Arc::new(MessageChannel::new());
    let registry = JobRegistry::new(Arc::clone(&channel));

    let job = registry.create_job("echo");
    registry.update_progress(&job.id, 50.0, "halfway");
    registry.complete_job(&job.id, json!({"ok": true}));

    let drained = channel.drain();
    let kinds: Vec<_> = drained.iter().map(|m| m.kind).collect();
    assert_eq!(
        kinds,
        vec![MessageType::Log, MessageType::Progress, MessageType::Result]
    );
    assert!(drained.iter().all(|m| m.job_id == job.id));
    assert_eq!(drained[1].data, json!({"progress": 50.0, "message": "halfway"}));
    assert_eq!(drained[2].data, json!({"ok": true}));
    assert!(channel.drain().is_empty());
}

#[test]
fn rejected_input_fails_without_progress() {
    let (channel, executor) = setup(2);
    let job = executor.submit_by_name("ramp", json!({"x": 0})).unwrap();

    let seen = poll_until(&channel, |seen| seen.iter().any(is_terminal));
    let stored = executor.registry().get_job(&job.id).unwrap();

    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.error.unwrap().contains('x'));
    assert!(stored.result.is_none());
    assert!(seen.iter().all(|m| m.kind != MessageType::Progress));
}

#[test]
fn concurrent_jobs_keep_per_job_order() {
    let (channel, executor) = setup(4);
    let ids: Vec<String> = (1..=20)
        .map(|i| executor.submit_by_name("ramp", json!({"x": i})).unwrap().id)
        .collect();

    let seen = poll_until(&channel, |seen| {
        seen.iter().filter(|m| is_terminal(m)).count() == ids.len()
    });

    let mut per_job: HashMap<&str, Vec<&Message>> = HashMap::new();
    for m in &seen {
        per_job.entry(m.job_id.as_str()).or_default().push(m);
    }

    for (i, id) in ids.iter().enumerate() {
        let x = i + 1;
        let msgs = &per_job[id.as_str()];
        // LOG, "starting", x ramp steps, RESULT
        assert_eq!(msgs.len(), x + 3, "job {id}");
        assert_eq!(msgs[0].kind, MessageType::Log);
        assert_eq!(msgs[1].data["progress"], 0.0);
        let progress: Vec<f64> = msgs[2..msgs.len() - 1]
            .iter()
            .map(|m| m.data["progress"].as_f64().unwrap())
            .collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]), "job {id}: {progress:?}");
        assert_eq!(msgs[msgs.len() - 1].kind, MessageType::Result);

        let job = executor.registry().get_job(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.unwrap() >= job.created_at);
    }
    executor.shutdown();
}

#[test]
fn retention_keeps_running_jobs() {
    let channel = Arc::new(MessageChannel::new());
    let registry = JobRegistry::with_retention(
        Arc::clone(&channel),
        RetentionPolicy {
            ttl: None,
            max_finished: Some(1),
        },
    );

    let running = registry.create_job("slow");
    registry.update_progress(&running.id, 10.0, "busy");
    let first = registry.create_job("fast");
    registry.complete_job(&first.id, json!(1));
    std::thread::sleep(Duration::from_millis(2));
    let second = registry.create_job("fast");
    registry.complete_job(&second.id, json!(2));

    // The next creation trims finished jobs down to one.
    let _third = registry.create_job("fast");
    assert!(registry.get_job(&first.id).is_none());
    assert!(registry.get_job(&second.id).is_some());
    assert_eq!(
        registry.get_job(&running.id).unwrap().status,
        JobStatus::Running
    );
}

struct Delayed;

#[async_trait]
impl RequestHandler for Delayed {
    async fn handle(&self, request: &Request) -> anyhow::Result<Value> {
        let ms: u64 = request.context["delay_ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({ "payload": request.payload }))
    }
}

#[test]
fn requests_are_strictly_fifo() {
    let (channel, executor) = setup(1);
    let processor = RequestProcessor::new(
        Arc::new(Delayed),
        Arc::clone(&channel),
        Duration::from_millis(20),
    );
    processor.submit(Request::new("req_1", "one", json!({"delay_ms": 150})));
    processor.submit(Request::new("req_2", "two", json!({"delay_ms": 20})));
    processor.submit(Request::new("req_3", "three", json!({"delay_ms": 20})));
    processor.start().unwrap();

    // A regular job shares the channel; both paths decode the same way.
    let job = executor.submit_by_name("ramp", json!({"x": 2})).unwrap();

    let seen = poll_until(&channel, |seen| {
        seen.iter().filter(|m| m.kind == MessageType::JobStatus).count() == 3
            && seen.iter().any(is_terminal)
    });
    processor.stop();

    let order: Vec<_> = seen
        .iter()
        .filter(|m| m.kind == MessageType::JobStatus)
        .map(|m| m.job_id.as_str())
        .collect();
    assert_eq!(order, vec!["req_1", "req_2", "req_3"]);

    let status = seen.iter().find(|m| m.job_id == "req_1").unwrap();
    assert_eq!(
        status.data,
        json!({"status": "completed", "result": {"payload": "one"}})
    );

    let roundtrip: Message = serde_json::from_str(&serde_json::to_string(status).unwrap()).unwrap();
    assert_eq!(roundtrip.kind, MessageType::JobStatus);
    assert!(seen.iter().any(|m| m.job_id == job.id && m.kind == MessageType::Result));
}
