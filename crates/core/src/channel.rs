// crates/core/src/channel.rs
//! Unbounded FIFO between job producers and the single draining poller,
//! plus live fan-out to subscribers.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::message::{Message, MessageType};
use crate::metrics;

/// Messages a slow subscriber may fall behind before it starts losing them.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1024;

/// Thread-safe, unbounded message queue.
///
/// `publish` may be called from any number of threads; `drain` is
/// destructive and intended for exactly one reader. The internal lock is held
/// only for a push or a swap, so neither side waits on the other's work.
///
/// Capacity is unbounded: a channel nobody drains grows without limit.
///
/// Every published message is also broadcast to live [`Subscription`]s.
/// Subscribers never slow publishers down: one that falls more than its
/// capacity behind skips the oldest messages, and `drain` is unaffected.
pub struct MessageChannel {
    queue: Mutex<VecDeque<Message>>,
    events: broadcast::Sender<Message>,
}

impl Default for MessageChannel {
    fn default() -> Self {
        Self::with_subscriber_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl MessageChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscriber_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            queue: Mutex::new(VecDeque::new()),
            events,
        }
    }

    /// Build a message from `data` and enqueue it.
    ///
    /// Never fails from the caller's point of view: a payload that cannot be
    /// serialized is logged and dropped.
    pub fn publish<T: Serialize + ?Sized>(&self, kind: MessageType, job_id: &str, data: &T) {
        match serde_json::to_value(data) {
            Ok(data) => self.publish_message(Message::new(kind, job_id, data)),
            Err(e) => {
                metrics::record_message_dropped();
                tracing::warn!(
                    job_id = %job_id,
                    message_type = %kind,
                    error = %e,
                    "Dropping message with unserializable payload"
                );
            }
        }
    }

    /// Enqueue a prebuilt message.
    pub fn publish_message(&self, message: Message) {
        metrics::record_message_published(message.kind);
        let mut queue = self.queue.lock();
        // Broadcast under the queue lock so subscribers see drain order.
        if self.events.receiver_count() > 0 {
            let _ = self.events.send(message.clone());
        }
        queue.push_back(message);
    }

    /// Every message published from now on.
    pub fn subscribe(&self) -> Subscription {
        self.subscription(Filter::All)
    }

    /// Messages of one type, e.g. only `Progress`.
    pub fn subscribe_type(&self, kind: MessageType) -> Subscription {
        self.subscription(Filter::Kind(kind))
    }

    /// Messages about one job.
    pub fn subscribe_job(&self, job_id: impl Into<String>) -> Subscription {
        self.subscription(Filter::Job(job_id.into()))
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn subscription(&self, filter: Filter) -> Subscription {
        Subscription {
            rx: self.events.subscribe(),
            filter,
        }
    }

    /// Atomically remove and return every queued message, oldest first.
    pub fn drain(&self) -> Vec<Message> {
        let drained = std::mem::take(&mut *self.queue.lock());
        Vec::from(drained)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl std::fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageChannel")
            .field("pending", &self.len())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[derive(Debug, Clone)]
enum Filter {
    All,
    Kind(MessageType),
    Job(String),
}

impl Filter {
    fn matches(&self, message: &Message) -> bool {
        match self {
            Filter::All => true,
            Filter::Kind(kind) => message.kind == *kind,
            Filter::Job(job_id) => message.job_id == *job_id,
        }
    }
}

/// Live feed of matching messages. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<Message>,
    filter: Filter,
}

impl Subscription {
    /// Wait for the next matching message. `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            match self.rx.recv().await {
                Ok(message) if self.filter.matches(&message) => return Some(message),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => lagged(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching message if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Message> {
        loop {
            match self.rx.try_recv() {
                Ok(message) if self.filter.matches(&message) => return Some(message),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => lagged(skipped),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

fn lagged(skipped: u64) {
    metrics::record_subscriber_lagged(skipped);
    tracing::warn!(skipped, "Subscriber fell behind; skipping messages");
}
