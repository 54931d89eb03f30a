// crates/core/src/pool.rs
//! Fixed-size pool of OS worker threads behind an unbounded admission queue.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::JobError;
use crate::metrics;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Bounded worker pool.
///
/// Each submitted task is moved into exactly one worker, so a task never
/// runs twice. Tasks wait in FIFO order when every worker is busy.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Task>>>,
    receiver: Receiver<Task>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one).
    pub fn new(size: usize) -> Result<Self, JobError> {
        let size = size.max(1);
        let (sender, receiver) = channel::unbounded::<Task>();

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let rx = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("jobwire-worker-{index}"))
                .spawn(move || worker_loop(index, rx))
                .map_err(|e| JobError::spawn("worker", e))?;
            workers.push(handle);
        }

        tracing::debug!(workers = size, "Worker pool started");
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            receiver,
            workers: Mutex::new(workers),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Tasks admitted but not yet picked up by a worker.
    pub fn queued(&self) -> usize {
        self.receiver.len()
    }

    /// Admit a task. Fails only after [`shutdown`](Self::shutdown).
    pub fn execute<F>(&self, task: F) -> Result<(), JobError>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(JobError::ExecutorClosed)?;
        sender
            .send(Box::new(task))
            .map_err(|_| JobError::ExecutorClosed)?;
        metrics::record_admission_depth(self.receiver.len());
        Ok(())
    }

    /// Stop admitting work, let workers finish everything already queued,
    /// and join them. Idempotent.
    pub fn shutdown(&self) {
        self.sender.lock().take();

        let workers = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for handle in workers {
            if handle.thread().id() == current {
                // Shutdown requested from inside a task; that worker exits on
                // its own once the queue is closed.
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("Worker thread panicked outside a task");
            }
        }
        tracing::debug!("Worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Close the queue without joining; workers drain it and exit.
        self.sender.lock().take();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("queued", &self.queued())
            .finish()
    }
}

fn worker_loop(index: usize, rx: Receiver<Task>) {
    for task in rx.iter() {
        metrics::record_admission_depth(rx.len());
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::error!(worker = index, "Task panicked; worker continues");
        }
    }
    tracing::trace!(worker = index, "Worker exiting");
}
