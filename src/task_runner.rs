//! A single-worker FIFO background executor for cache cleanup jobs.
//!
//! Grounded on the teacher's `thread_pool/drop_join.rs` worker: a channel
//! feeding one joined thread that catches panics and logs-and-swallows them,
//! narrowed to exactly one worker (the spec forbids more than one ever
//! running) rather than a pool behind a generic `ThreadPool` trait.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use log::error;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// An unbounded FIFO queue served by exactly one background worker thread.
pub struct TaskRunner {
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl TaskRunner {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();

        let worker = thread::Builder::new()
            .name("disklru-cleanup".to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                        error!("cleanup task panicked: {:?}", panic_message(&payload));
                    }
                }
            })
            .expect("failed to spawn cleanup worker thread");

        TaskRunner {
            sender: Some(sender),
            worker: Some(worker),
        }
    }

    /// Enqueues `job` to run on the background worker. Never blocks the
    /// caller; never propagates failures from `job` back to the caller.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(sender) = &self.sender {
            // The receiver only disappears once the runner itself is being
            // dropped; a send failure past that point is not the caller's
            // problem to handle.
            let _ = sender.send(Box::new(job));
        }
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new()
    }
}
