// crates/cli/src/tools.rs
//! Demo tools and the conversational request handler used by `jobwire demo`.

use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use jobwire_core::{JobContext, Request, RequestHandler, Tool, ToolRegistry};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use validator::Validate;

/// Every demo tool, registered by name and namespace.
pub fn demo_tools() -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(Echo);
    tools.register(Correlation);
    tools.register(Bootstrap);
    tools.register(Failing);
    tools
}

// ============================================================================
// echo
// ============================================================================

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct EchoInput {
    #[validate(length(min = 1, max = 1024))]
    pub message: String,
    /// Simulated work, in milliseconds.
    #[serde(default)]
    #[validate(range(max = 10000))]
    pub delay_ms: u64,
}

pub struct Echo;

impl Tool for Echo {
    type Input = EchoInput;
    type Output = Value;

    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the message after an optional delay"
    }

    fn namespace(&self) -> Option<&str> {
        Some("util.echo")
    }

    fn execute(&self, ctx: &JobContext, input: EchoInput) -> anyhow::Result<Value> {
        if input.delay_ms > 0 {
            ctx.update_progress(50.0, "waiting");
            std::thread::sleep(Duration::from_millis(input.delay_ms));
        }
        Ok(json!({ "echo": input.message }))
    }
}

// ============================================================================
// correlation
// ============================================================================

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct CorrelationInput {
    #[validate(range(min = 10, max = 100000))]
    pub n_points: u32,
    /// Standard deviation of the noise added to `y = x`.
    #[serde(default = "default_noise")]
    #[validate(range(min = 0.0, max = 10.0))]
    pub noise: f64,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_noise() -> f64 {
    0.5
}

#[derive(Debug, Serialize)]
pub struct CorrelationOutput {
    pub n_points: u32,
    pub r: f64,
}

pub struct Correlation;

impl Tool for Correlation {
    type Input = CorrelationInput;
    type Output = CorrelationOutput;

    fn name(&self) -> &str {
        "correlation"
    }

    fn description(&self) -> &str {
        "Pearson correlation of a synthetic noisy linear sample"
    }

    fn namespace(&self) -> Option<&str> {
        Some("stats.relationships.correlation")
    }

    fn execute(&self, ctx: &JobContext, input: CorrelationInput) -> anyhow::Result<CorrelationOutput> {
        let n = input.n_points as usize;
        let mut rng = StdRng::seed_from_u64(input.seed.unwrap_or(7));
        let mut xs = Vec::with_capacity(n);
        let mut ys = Vec::with_capacity(n);

        let step = (n / 10).max(1);
        for i in 0..n {
            let x = rng.gen::<f64>();
            xs.push(x);
            ys.push(x + (rng.gen::<f64>() - 0.5) * 2.0 * input.noise);
            if (i + 1) % step == 0 {
                let pct = (i + 1) as f64 / n as f64 * 90.0;
                ctx.update_progress(pct, &format!("sampled {}/{n}", i + 1));
            }
        }

        let shown = n.min(50);
        ctx.publish_plot(&json!({
            "kind": "scatter",
            "x": &xs[..shown],
            "y": &ys[..shown],
        }));

        let r = pearson(&xs, &ys).context("sample has zero variance")?;
        ctx.update_progress(100.0, "correlated");
        Ok(CorrelationOutput {
            n_points: input.n_points,
            r,
        })
    }
}

fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len() as f64;
    let mx = xs.iter().sum::<f64>() / n;
    let my = ys.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx).powi(2);
        syy += (y - my).powi(2);
    }
    let denom = (sxx * syy).sqrt();
    (denom > 0.0).then(|| sxy / denom)
}

// ============================================================================
// bootstrap
// ============================================================================

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct BootstrapInput {
    #[validate(range(min = 10, max = 10000))]
    pub n_points: u32,
    #[validate(range(min = 10, max = 5000))]
    pub resamples: u32,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct BootstrapOutput {
    pub mean: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    pub resamples: u32,
}

pub struct Bootstrap;

impl Tool for Bootstrap {
    type Input = BootstrapInput;
    type Output = BootstrapOutput;

    fn name(&self) -> &str {
        "bootstrap"
    }

    fn description(&self) -> &str {
        "95% bootstrap confidence interval for the mean of a synthetic sample"
    }

    fn namespace(&self) -> Option<&str> {
        Some("stats.resampling.bootstrap")
    }

    fn execute(&self, ctx: &JobContext, input: BootstrapInput) -> anyhow::Result<BootstrapOutput> {
        let n = input.n_points as usize;
        let mut rng = StdRng::seed_from_u64(input.seed.unwrap_or(11));
        let sample: Vec<f64> = (0..n).map(|_| rng.gen::<f64>() * 10.0).collect();
        let mean = sample.iter().sum::<f64>() / n as f64;

        let total = input.resamples as usize;
        let step = (total / 20).max(1);
        let mut means = Vec::with_capacity(total);
        for i in 0..total {
            let sum: f64 = (0..n).map(|_| sample[rng.gen_range(0..n)]).sum();
            means.push(sum / n as f64);
            if (i + 1) % step == 0 {
                let pct = (i + 1) as f64 / total as f64 * 100.0;
                ctx.update_progress(pct, &format!("resample {}/{total}", i + 1));
            }
        }

        means.sort_by(f64::total_cmp);
        let at = |q: f64| means[((total - 1) as f64 * q).round() as usize];
        ctx.publish_plot(&json!({ "kind": "histogram", "values": &means[..total.min(100)] }));

        Ok(BootstrapOutput {
            mean,
            ci_low: at(0.025),
            ci_high: at(0.975),
            resamples: input.resamples,
        })
    }
}

// ============================================================================
// failing
// ============================================================================

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct FailingInput {
    #[validate(length(min = 1))]
    pub reason: String,
}

/// Always fails, to exercise the error path.
pub struct Failing;

impl Tool for Failing {
    type Input = FailingInput;
    type Output = Value;

    fn name(&self) -> &str {
        "failing"
    }

    fn description(&self) -> &str {
        "Fail with the given reason"
    }

    fn namespace(&self) -> Option<&str> {
        Some("util.failing")
    }

    fn execute(&self, ctx: &JobContext, input: FailingInput) -> anyhow::Result<Value> {
        ctx.log("about to fail");
        Err(anyhow::anyhow!(input.reason)).context("failing tool")
    }
}

// ============================================================================
// conversation handler
// ============================================================================

/// Acknowledges each request after a short think time.
pub struct ConversationHandler {
    pub think_time: Duration,
}

impl Default for ConversationHandler {
    fn default() -> Self {
        Self {
            think_time: Duration::from_millis(150),
        }
    }
}

#[async_trait]
impl RequestHandler for ConversationHandler {
    async fn handle(&self, request: &Request) -> anyhow::Result<Value> {
        tokio::time::sleep(self.think_time).await;
        let text = request.payload.trim();
        if text.is_empty() {
            anyhow::bail!("empty request");
        }
        Ok(json!({
            "reply": format!("ack: {text}"),
            "turn": request.context.get("turn").cloned().unwrap_or(Value::Null),
        }))
    }
}

/// Input for the `index`-th demo job, cycling through the tools.
pub fn demo_workload(index: usize) -> (&'static str, Value) {
    let seed = index as u64 + 1;
    match index % 5 {
        0 => ("correlation", json!({ "n_points": 20000, "noise": 0.3, "seed": seed })),
        1 => ("stats.resampling.bootstrap", json!({ "n_points": 500, "resamples": 800, "seed": seed })),
        2 => ("echo", json!({ "message": format!("hello #{index}"), "delay_ms": 300 })),
        3 => ("failing", json!({ "reason": "demo failure" })),
        // Rejected by validation: n_points below the minimum.
        _ => ("correlation", json!({ "n_points": 3 })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobwire_core::{JobRegistry, MessageChannel};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn context(tool: &str) -> (JobContext, Arc<JobRegistry>) {
        let registry = Arc::new(JobRegistry::new(Arc::new(MessageChannel::new())));
        let job = registry.create_job(tool);
        (JobContext::new(job.id, tool, Arc::clone(&registry)), registry)
    }

    #[test]
    fn test_demo_tools_registered_under_namespaces() {
        let tools = demo_tools();
        assert_eq!(tools.len(), 4);
        assert_eq!(tools.discover("stats.*").len(), 2);
        assert_eq!(
            tools.get("stats.relationships.correlation").unwrap().name(),
            "correlation"
        );
    }

    #[test]
    fn test_correlation_of_clean_line_is_one() {
        let (ctx, _registry) = context("correlation");
        let out = Correlation
            .execute(
                &ctx,
                CorrelationInput {
                    n_points: 100,
                    noise: 0.0,
                    seed: Some(3),
                },
            )
            .unwrap();
        assert!((out.r - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_bootstrap_interval_brackets_mean() {
        let (ctx, _registry) = context("bootstrap");
        let out = Bootstrap
            .execute(
                &ctx,
                BootstrapInput {
                    n_points: 200,
                    resamples: 200,
                    seed: None,
                },
            )
            .unwrap();
        assert!(out.ci_low <= out.mean && out.mean <= out.ci_high);
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let run = |seed| {
            let (ctx, _registry) = context("bootstrap");
            Bootstrap
                .execute(
                    &ctx,
                    BootstrapInput {
                        n_points: 50,
                        resamples: 40,
                        seed: Some(seed),
                    },
                )
                .unwrap()
        };
        let (a, b, c) = (run(5), run(5), run(6));
        assert_eq!((a.mean, a.ci_low, a.ci_high), (b.mean, b.ci_low, b.ci_high));
        assert_ne!(a.mean, c.mean);
        assert!(a.mean > 0.0 && a.mean < 10.0);
    }

    #[test]
    fn test_failing_reports_reason() {
        let (ctx, _registry) = context("failing");
        let err = Failing
            .execute(&ctx, FailingInput { reason: "nope".into() })
            .unwrap_err();
        assert_eq!(format!("{err:#}"), "failing tool: nope");
    }

    #[test]
    fn test_demo_workload_inputs_resolve() {
        let tools = demo_tools();
        for i in 0..5 {
            let (name, input) = demo_workload(i);
            let tool = tools.get(name).unwrap();
            assert_eq!(tool.prepare(input).is_ok(), i != 4, "workload {i}");
        }
    }

    #[tokio::test]
    async fn test_conversation_handler() {
        let handler = ConversationHandler {
            think_time: Duration::ZERO,
        };
        let reply = handler
            .handle(&Request::new("req_0", " hi ", json!({"turn": 0})))
            .await
            .unwrap();
        assert_eq!(reply, json!({"reply": "ack: hi", "turn": 0}));
        assert!(handler
            .handle(&Request::new("req_1", "  ", Value::Null))
            .await
            .is_err());
    }
}
