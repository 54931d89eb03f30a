// crates/cli/src/main.rs
//! `jobwire` demo binary: runs jobs and conversational requests and shows
//! them through a polling observer.

mod poller;
mod tools;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::ProgressDrawTarget;
use jobwire_core::{
    Executor, Job, JobRegistry, JobStatus, JobwireConfig, MessageChannel, Request,
    RequestProcessor,
};
use serde_json::json;

use crate::poller::Poller;
use crate::tools::{demo_tools, demo_workload, ConversationHandler};

/// Background job execution with event notification.
#[derive(Debug, Parser)]
#[command(name = "jobwire", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run demo jobs and requests, rendering progress from drained messages
    Demo(DemoArgs),
    /// Print the registered tool schemas as JSON
    Tools(ToolsArgs),
}

#[derive(Debug, Args)]
struct DemoArgs {
    /// Number of jobs to submit
    #[arg(long, default_value_t = 8)]
    jobs: usize,
    /// Executor worker threads (overrides config)
    #[arg(long)]
    workers: Option<usize>,
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print Prometheus metrics after the run
    #[arg(long)]
    metrics: bool,
    /// Give up waiting after this many seconds
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

#[derive(Debug, Args)]
struct ToolsArgs {
    /// Only list tools matching this name, namespace or glob (e.g. `stats.*`)
    #[arg(long)]
    discover: Option<String>,
}

const REQUESTS: [&str; 3] = ["hello", "summarize the results", " "];

#[tokio::main]
async fn main() {
    jobwire_observability::init_tracing(jobwire_observability::DEFAULT_FILTER);

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Demo(args) => run_demo(args).await,
        Commands::Tools(args) => print_tools(&args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn print_tools(args: &ToolsArgs) -> Result<()> {
    let tools = demo_tools();
    let mut schemas = tools.schemas();
    if let Some(pattern) = &args.discover {
        let names: Vec<String> = tools
            .discover(pattern)
            .iter()
            .filter_map(|key| tools.get(key))
            .map(|tool| tool.name().to_string())
            .collect();
        schemas.retain(|s| names.contains(&s.name));
    }
    println!("{}", serde_json::to_string_pretty(&schemas)?);
    Ok(())
}

async fn run_demo(args: DemoArgs) -> Result<()> {
    let mut config = JobwireConfig::load(args.config.as_deref()).context("loading config")?;
    if let Some(workers) = args.workers {
        config.workers = workers;
        config.validate()?;
    }
    if args.metrics {
        jobwire_observability::init_metrics();
    }

    let start = Instant::now();
    eprintln!(
        "\njobwire v{}: {} jobs on {} workers\n",
        env!("CARGO_PKG_VERSION"),
        args.jobs,
        config.workers
    );

    let channel = Arc::new(MessageChannel::new());
    let registry = Arc::new(JobRegistry::with_retention(
        Arc::clone(&channel),
        config.retention(),
    ));
    let executor = Executor::new(Arc::clone(&registry), config.workers)?.with_tools(demo_tools());
    let processor = RequestProcessor::new(
        Arc::new(ConversationHandler::default()),
        Arc::clone(&channel),
        config.request_poll_timeout(),
    );
    processor.start()?;

    let mut job_ids = Vec::with_capacity(args.jobs);
    for index in 0..args.jobs {
        let (tool, input) = demo_workload(index);
        let job = executor.submit_by_name(tool, input)?;
        job_ids.push(job.id);
    }

    let mut request_ids = Vec::with_capacity(REQUESTS.len());
    for (turn, text) in REQUESTS.iter().enumerate() {
        let id = format!("req_{turn}");
        processor.submit(Request::new(id.clone(), *text, json!({ "turn": turn })));
        request_ids.push(id);
    }

    let watched = job_ids.iter().chain(&request_ids).cloned();
    let poller = Poller::new(watched, ProgressDrawTarget::stderr());
    let stats = tokio::time::timeout(
        Duration::from_secs(args.timeout_secs),
        poller.run(&channel, config.drain_interval()),
    )
    .await;

    processor.stop();
    executor.shutdown();

    match &stats {
        Ok(stats) => tracing::info!(
            ticks = stats.ticks,
            drained = stats.drained,
            by_type = ?stats.by_type,
            "Poller finished"
        ),
        Err(_) => eprintln!("  timed out after {}s", args.timeout_secs),
    }

    print_summary(&registry, &job_ids, start.elapsed());

    if args.metrics {
        if let Some(text) = jobwire_observability::render_metrics() {
            println!("{text}");
        }
    }
    Ok(())
}

fn print_summary(registry: &JobRegistry, job_ids: &[String], elapsed: Duration) {
    let jobs: Vec<Job> = job_ids
        .iter()
        .filter_map(|id| registry.get_job(id))
        .collect();
    let completed = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Completed)
        .count();
    let failed = jobs.iter().filter(|j| j.status == JobStatus::Failed).count();

    eprintln!();
    for job in &jobs {
        let millis = job
            .duration()
            .map(|d| d.num_milliseconds())
            .unwrap_or_default();
        let detail = match job.status {
            JobStatus::Completed => job
                .result
                .as_ref()
                .map(|r| r.to_string())
                .unwrap_or_default(),
            JobStatus::Failed => job.error.clone().unwrap_or_default(),
            _ => job.message.clone(),
        };
        eprintln!(
            "  {:<12} {:<12} {:<10} {:>6}ms  {}",
            job.id,
            job.tool_name,
            job.status.as_str(),
            millis,
            detail
        );
    }
    eprintln!(
        "\n  {completed} completed, {failed} failed, {} evicted in {:.2}s\n",
        job_ids.len() - jobs.len(),
        elapsed.as_secs_f64()
    );
}
