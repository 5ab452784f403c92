//! Bounded-parallelism FIFO work queue.
//!
//! Tasks are appended to a pending FIFO at submission time and started in
//! that order whenever a slot is free. At most `parallelism` tasks run at
//! once. A task that fails or panics settles its own handle and frees its
//! slot; siblings and the dispatcher are unaffected.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{Notify, oneshot};
use tracing::{debug, warn};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Failures settled on a [`TaskHandle`] by the queue itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The task panicked or was dropped before producing output.
    #[error("Task aborted before completion")]
    Aborted,
}

/// Resolves with the output of a submitted task.
///
/// Dropping the handle does not cancel the task.
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T, QueueError>>,
}

impl<T> TaskHandle<T> {
    /// A handle settled through the returned sender. A dropped sender
    /// settles the handle with [`QueueError::Aborted`].
    pub(crate) fn pair() -> (oneshot::Sender<Result<T, QueueError>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, QueueError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|settled| settled.unwrap_or(Err(QueueError::Aborted)))
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle").finish_non_exhaustive()
    }
}

struct State {
    pending: VecDeque<Job>,
    running: usize,
}

struct Inner {
    parallelism: usize,
    state: Mutex<State>,
    idle: Notify,
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start pending jobs while slots are free.
    fn dispatch(self: &Arc<Self>) {
        let mut state = self.lock();
        while state.running < self.parallelism {
            let Some(job) = state.pending.pop_front() else {
                break;
            };
            state.running += 1;
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                let _slot = SlotGuard(inner);
                job.await;
            });
        }
    }

    fn release(self: &Arc<Self>) {
        {
            let mut state = self.lock();
            state.running = state.running.saturating_sub(1);
            if state.running == 0 && state.pending.is_empty() {
                self.idle.notify_waiters();
            }
        }
        self.dispatch();
    }
}

/// Frees a slot when the job finishes, even if it unwinds.
struct SlotGuard(Arc<Inner>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// A FIFO executor with a fixed number of concurrent slots.
///
/// Cloning yields another handle to the same queue. Must be used from
/// within a Tokio runtime.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    /// Create a queue running at most `parallelism` tasks (minimum 1).
    pub fn new(parallelism: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                parallelism: parallelism.max(1),
                state: Mutex::new(State {
                    pending: VecDeque::new(),
                    running: 0,
                }),
                idle: Notify::new(),
            }),
        }
    }

    /// Enqueue a task. It is appended to the FIFO before this returns.
    pub fn submit<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, handle) = TaskHandle::pair();
        let job: Job = Box::pin(async move {
            let output = AssertUnwindSafe(task).catch_unwind().await;
            if output.is_err() {
                warn!("Queued task panicked");
            }
            // Receiver may be gone; the task still ran to completion
            let _ = tx.send(output.map_err(|_| QueueError::Aborted));
        });

        {
            let mut state = self.inner.lock();
            state.pending.push_back(job);
            debug!(
                pending = state.pending.len(),
                running = state.running,
                "Task enqueued"
            );
        }
        self.inner.dispatch();
        handle
    }

    pub fn parallelism(&self) -> usize {
        self.inner.parallelism
    }

    /// Tasks currently executing.
    pub fn running(&self) -> usize {
        self.inner.lock().running
    }

    /// Tasks waiting for a slot.
    pub fn pending(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_idle(&self) -> bool {
        let state = self.inner.lock();
        state.running == 0 && state.pending.is_empty()
    }

    /// Resolve once nothing is running or pending.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("WorkQueue")
            .field("parallelism", &self.inner.parallelism)
            .field("running", &state.running)
            .field("pending", &state.pending.len())
            .finish()
    }
}
