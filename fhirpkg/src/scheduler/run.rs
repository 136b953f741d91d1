//! Per-run scheduler state.
//!
//! Every call to `Scheduler::run` creates a fresh [`RunState`]: a task queue
//! with a pending counter, the run's cancellation token and the first error.
//!
//! The pending counter is incremented when a task is queued and decremented
//! after it has executed (or been skipped). A task that queues follow-ups does
//! so before it returns, so the counter cannot reach zero while work remains.
//! The supervisor waits for zero, closes the queue and idle workers exit.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::task::Task;

/// Errors returned by a scheduler run.
#[derive(Debug, Error)]
pub enum RunError<E> {
    /// The run was cancelled by the caller before the work drained.
    #[error("run cancelled")]
    Cancelled,

    /// The first task that failed.
    #[error("{0}")]
    Task(E),

    /// A task panicked.
    #[error("task {task} panicked: {message}")]
    Panicked { task: String, message: String },
}

/// Outcome of a scheduler run.
#[derive(Debug)]
pub struct RunSummary<E> {
    /// Tasks that executed, whether they succeeded or not.
    pub completed: usize,

    /// Tasks that returned an error or panicked.
    pub failed: usize,

    /// Queued tasks dropped without executing because the run was cancelled.
    pub skipped: usize,

    /// The first error; later failures are logged and discarded.
    pub error: Option<RunError<E>>,
}

impl<E> RunSummary<E> {
    /// Converts into the number of completed tasks or the first error.
    pub fn into_result(self) -> Result<usize, RunError<E>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.completed),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

struct Queue<E> {
    tasks: VecDeque<Box<dyn Task<E>>>,
    pending: usize,
    closed: bool,
}

pub(crate) struct RunState<E> {
    queue: Mutex<Queue<E>>,
    /// Signalled when a task is queued or the queue closes.
    available: Condvar,
    /// Signalled when the pending count drops to zero.
    drained: Condvar,
    cancel: CancellationToken,
    first_error: Mutex<Option<RunError<E>>>,
    completed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl<E: Send + 'static> RunState<E> {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        Self {
            queue: Mutex::new(Queue {
                tasks: VecDeque::new(),
                pending: 0,
                closed: false,
            }),
            available: Condvar::new(),
            drained: Condvar::new(),
            cancel,
            first_error: Mutex::new(None),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        }
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Queues a task, counting it as pending. Returns `false` if the queue has
    /// already closed.
    pub(crate) fn push(&self, task: Box<dyn Task<E>>) -> bool {
        let mut queue = self.queue.lock();
        if queue.closed {
            warn!(task = task.name(), "task added after run drained, dropping");
            return false;
        }
        queue.tasks.push_back(task);
        queue.pending += 1;
        drop(queue);
        self.available.notify_one();
        true
    }

    /// Blocks until a task is available or the queue closes.
    pub(crate) fn next(&self) -> Option<Box<dyn Task<E>>> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(task) = queue.tasks.pop_front() {
                return Some(task);
            }
            if queue.closed {
                return None;
            }
            self.available.wait(&mut queue);
        }
    }

    /// Marks one pending task as done.
    pub(crate) fn finish(&self) {
        let mut queue = self.queue.lock();
        queue.pending -= 1;
        if queue.pending == 0 {
            self.drained.notify_all();
        }
    }

    /// Waits until no task is pending, then closes the queue so idle workers
    /// exit.
    pub(crate) fn supervise(&self) {
        let mut queue = self.queue.lock();
        while queue.pending > 0 {
            self.drained.wait(&mut queue);
        }
        queue.closed = true;
        drop(queue);
        self.available.notify_all();
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a failure. The first one wins and cancels the run.
    pub(crate) fn record_failure(&self, error: RunError<E>)
    where
        E: fmt::Display,
    {
        self.failed.fetch_add(1, Ordering::SeqCst);

        let mut first = self.first_error.lock();
        if first.is_none() {
            debug!(error = %error, "first task failure, cancelling run");
            *first = Some(error);
            drop(first);
            self.cancel.cancel();
        } else {
            warn!(error = %error, "additional task failure discarded");
        }
    }

    /// Snapshot of the run's counters, taking the first error.
    pub(crate) fn summary(&self) -> RunSummary<E> {
        let error = self.first_error.lock().take().or_else(|| {
            self.cancel
                .is_cancelled()
                .then_some(RunError::Cancelled)
        });

        RunSummary {
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            error,
        }
    }
}
