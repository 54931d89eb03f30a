// crates/cli/src/poller.rs
//! Timer-driven observer: drains the message channel and renders one
//! progress bar per job. Never writes to the job registry.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use jobwire_core::{Message, MessageChannel, MessageType};

/// What the poller saw over its lifetime.
#[derive(Debug, Default)]
pub struct PollStats {
    pub ticks: usize,
    pub drained: usize,
    pub by_type: BTreeMap<&'static str, usize>,
}

pub struct Poller {
    multi: MultiProgress,
    style: ProgressStyle,
    bars: HashMap<String, ProgressBar>,
    pending: HashSet<String>,
    stats: PollStats,
}

impl Poller {
    /// Watch `ids` until each has produced a terminal message.
    pub fn new(ids: impl IntoIterator<Item = String>, target: ProgressDrawTarget) -> Self {
        let style = ProgressStyle::default_bar()
            .template("  {prefix:>22} [{bar:30}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        Self {
            multi: MultiProgress::with_draw_target(target),
            style,
            bars: HashMap::new(),
            pending: ids.into_iter().collect(),
            stats: PollStats::default(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drain on every tick of `interval` until every watched id is terminal.
    pub async fn run(mut self, channel: &MessageChannel, interval: Duration) -> PollStats {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        while !self.is_done() {
            ticker.tick().await;
            self.tick(channel);
        }
        self.stats
    }

    /// One drain pass.
    pub fn tick(&mut self, channel: &MessageChannel) {
        self.stats.ticks += 1;
        let batch = channel.drain();
        self.stats.drained += batch.len();
        for message in &batch {
            *self.stats.by_type.entry(message.kind.as_str()).or_default() += 1;
            self.apply(message);
        }
        if !batch.is_empty() {
            tracing::debug!(count = batch.len(), pending = self.pending.len(), "Drained messages");
        }
    }

    fn bar(&mut self, job_id: &str) -> &ProgressBar {
        let multi = &self.multi;
        let style = &self.style;
        self.bars.entry(job_id.to_string()).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new(100));
            bar.set_style(style.clone());
            bar.set_prefix(job_id.to_string());
            bar
        })
    }

    fn apply(&mut self, message: &Message) {
        let data = &message.data;
        match message.kind {
            MessageType::Log => {
                if let Some(tool) = data.get("tool").and_then(|t| t.as_str()) {
                    let bar = self.bar(&message.job_id);
                    bar.set_prefix(format!("{tool} {}", message.job_id));
                    bar.set_message("created");
                } else if let Some(text) = data.get("message").and_then(|m| m.as_str()) {
                    let text = text.to_string();
                    self.bar(&message.job_id).set_message(text);
                }
            }
            MessageType::Progress => {
                let pct = data["progress"].as_f64().unwrap_or(0.0).clamp(0.0, 100.0);
                let text = data["message"].as_str().unwrap_or_default().to_string();
                let bar = self.bar(&message.job_id);
                bar.set_position(pct as u64);
                bar.set_message(text);
            }
            MessageType::Plot => {
                let kind = data["kind"].as_str().unwrap_or("plot").to_string();
                self.bar(&message.job_id).set_message(format!("{kind} ready"));
            }
            MessageType::Result => {
                self.bar(&message.job_id).finish_with_message("completed");
                self.pending.remove(&message.job_id);
            }
            MessageType::Error => {
                let error = data["error"].as_str().unwrap_or("failed").to_string();
                self.bar(&message.job_id)
                    .abandon_with_message(format!("failed: {error}"));
                self.pending.remove(&message.job_id);
            }
            MessageType::JobStatus => {
                let bar = self.bar(&message.job_id);
                if data["status"] == "completed" {
                    bar.set_position(100);
                    bar.finish_with_message("replied");
                } else {
                    let error = data["error"].as_str().unwrap_or("failed").to_string();
                    bar.abandon_with_message(format!("failed: {error}"));
                }
                self.pending.remove(&message.job_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn poller(ids: &[&str]) -> Poller {
        Poller::new(
            ids.iter().map(|s| s.to_string()),
            ProgressDrawTarget::hidden(),
        )
    }

    #[test]
    fn test_tick_tracks_terminal_messages() {
        let channel = MessageChannel::new();
        let mut poller = poller(&["job_a", "req_0"]);

        channel.publish(MessageType::Log, "job_a", &json!({"event": "job_created", "tool": "echo"}));
        channel.publish(MessageType::Progress, "job_a", &json!({"progress": 40.0, "message": "half"}));
        poller.tick(&channel);
        assert!(!poller.is_done());
        assert_eq!(poller.bars["job_a"].position(), 40);

        channel.publish(MessageType::Result, "job_a", &json!({"echo": "hi"}));
        channel.publish(
            MessageType::JobStatus,
            "req_0",
            &json!({"status": "failed", "error": "empty request"}),
        );
        poller.tick(&channel);
        assert!(poller.is_done());
        assert_eq!(poller.stats.drained, 4);
        assert_eq!(poller.stats.by_type["job_status"], 1);
    }

    #[test]
    fn test_out_of_range_progress_is_clamped_for_display() {
        let channel = MessageChannel::new();
        let mut poller = poller(&["job_a"]);
        channel.publish(MessageType::Progress, "job_a", &json!({"progress": 250.0, "message": ""}));
        poller.tick(&channel);
        assert_eq!(poller.bars["job_a"].position(), 100);
    }

    #[tokio::test]
    async fn test_run_returns_once_everything_is_terminal() {
        let channel = MessageChannel::new();
        channel.publish(MessageType::Error, "job_x", &json!({"error": "boom"}));
        let stats = poller(&["job_x"])
            .run(&channel, Duration::from_millis(5))
            .await;
        assert_eq!(stats.drained, 1);
        assert!(stats.ticks >= 1);
    }
}
