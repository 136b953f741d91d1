//! Bounded, self-feeding task scheduler.
//!
//! The [`Scheduler`] runs opaque [`Task`]s on a fixed pool of worker threads.
//! Tasks may enqueue further tasks while they execute, and a run only
//! completes once the whole dynamically discovered work graph has drained.
//!
//! # Architecture
//!
//! ```text
//!  Scheduler::add ──► seed tasks ──┐
//!                                  ▼
//!                     ┌──────────────────────────┐
//!  TaskContext::add ─►│ RunState                 │
//!                     │  queue + pending counter │◄── finish()
//!                     └────────────┬─────────────┘
//!                                  │ next()
//!                  ┌───────────────┼───────────────┐
//!                  ▼               ▼               ▼
//!              worker 1        worker 2   ...  worker N
//!
//!  supervisor (calling thread): wait pending == 0 ──► close queue
//! ```
//!
//! # Cancellation
//!
//! Each run gets a child of the caller's cancellation token. The first task
//! error cancels it (first-error-wins): tasks already executing run to
//! completion, queued tasks are skipped, and only the first error is
//! reported. Later errors are logged.
//!
//! # Example
//!
//! ```ignore
//! use fhirpkg::scheduler::{FnTask, Scheduler};
//!
//! let scheduler = Scheduler::<std::io::Error>::new(4);
//! scheduler.add(FnTask::new("parent", |ctx| {
//!     ctx.add(FnTask::new("child", |_| Ok(())));
//!     Ok(())
//! }));
//! let summary = scheduler.run(&CancellationToken::new());
//! assert_eq!(summary.completed, 2);
//! ```

mod run;
mod task;

pub use run::{RunError, RunSummary};
pub use task::{FnTask, SchedulerHandle, Task, TaskContext};

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use run::RunState;

/// Bounded worker pool executing a self-feeding work graph.
///
/// The scheduler itself only holds the worker count and tasks added before
/// the next run; each [`run`](Self::run) builds fresh state, so one scheduler
/// can be run repeatedly.
pub struct Scheduler<E> {
    workers: usize,
    seeds: Mutex<Vec<Box<dyn Task<E>>>>,
}

impl<E> Scheduler<E>
where
    E: fmt::Display + Send + 'static,
{
    /// Creates a scheduler with `workers` threads.
    ///
    /// Zero means one worker per available CPU.
    pub fn new(workers: usize) -> Self {
        let workers = if workers == 0 {
            num_cpus::get().max(1)
        } else {
            workers
        };

        Self {
            workers,
            seeds: Mutex::new(Vec::new()),
        }
    }

    /// Number of worker threads used per run.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queues a task for the next run.
    pub fn add(&self, task: impl Task<E>) {
        self.seeds.lock().push(Box::new(task));
    }

    /// Number of tasks waiting for the next run.
    pub fn queued(&self) -> usize {
        self.seeds.lock().len()
    }

    /// Runs all queued tasks, and everything they enqueue, to completion.
    ///
    /// Blocks until the work drains or, after cancellation or a failure,
    /// until the tasks already executing have returned. No worker threads
    /// outlive this call.
    pub fn run(&self, cancel: &CancellationToken) -> RunSummary<E> {
        let state = Arc::new(RunState::new(cancel.child_token()));

        let seeds = std::mem::take(&mut *self.seeds.lock());
        let seeded = seeds.len();
        for task in seeds {
            state.push(task);
        }

        info!(workers = self.workers, tasks = seeded, "scheduler run starting");

        thread::scope(|scope| {
            for id in 0..self.workers {
                let state = Arc::clone(&state);
                scope.spawn(move || worker_loop(id, state));
            }
            state.supervise();
        });

        let summary = state.summary();
        info!(
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            "scheduler run finished"
        );
        summary
    }
}

impl<E> fmt::Debug for Scheduler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.workers)
            .field("queued", &self.seeds.lock().len())
            .finish()
    }
}

fn worker_loop<E>(id: usize, state: Arc<RunState<E>>)
where
    E: fmt::Display + Send + 'static,
{
    while let Some(task) = state.next() {
        if state.cancel_token().is_cancelled() {
            debug!(worker = id, task = task.name(), "run cancelled, skipping task");
            state.record_skipped();
            state.finish();
            continue;
        }

        let name = task.name().to_string();
        let ctx = TaskContext::new(Arc::clone(&state), state.cancel_token().clone());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.execute(&ctx)));
        drop(ctx);

        state.record_completed();
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => state.record_failure(RunError::Task(err)),
            Err(payload) => state.record_failure(RunError::Panicked {
                task: name,
                message: panic_message(payload.as_ref()),
            }),
        }
        state.finish();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
