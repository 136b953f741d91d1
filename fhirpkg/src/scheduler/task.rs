//! Task trait and execution context.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::run::RunState;

/// A unit of work executed by the [`Scheduler`](super::Scheduler).
///
/// Tasks are consumed by execution. A task may enqueue follow-up work through
/// its [`TaskContext`]; the run does not finish until that work has drained
/// too.
pub trait Task<E>: Send + 'static {
    /// Returns a short name for logging.
    fn name(&self) -> &str {
        "task"
    }

    /// Executes the task.
    ///
    /// Long-running tasks should check `ctx.is_cancelled()` periodically.
    fn execute(self: Box<Self>, ctx: &TaskContext<E>) -> Result<(), E>;
}

/// A task built from a closure.
pub struct FnTask<F> {
    name: String,
    f: F,
}

impl<F> FnTask<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<E, F> Task<E> for FnTask<F>
where
    F: FnOnce(&TaskContext<E>) -> Result<(), E> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(self: Box<Self>, ctx: &TaskContext<E>) -> Result<(), E> {
        (self.f)(ctx)
    }
}

impl<F> fmt::Debug for FnTask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTask").field("name", &self.name).finish()
    }
}

/// Handle for adding tasks to a running scheduler.
///
/// Cloneable so a task can hand it to helpers; adding is only accepted while
/// the run it belongs to is still active.
pub struct SchedulerHandle<E> {
    state: Arc<RunState<E>>,
}

impl<E> Clone for SchedulerHandle<E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<E: Send + 'static> SchedulerHandle<E> {
    /// Enqueues a task into the current run.
    ///
    /// The task is counted as pending before this returns. Returns `false`
    /// when the run has already drained and the task was dropped.
    pub fn add(&self, task: impl Task<E>) -> bool {
        self.state.push(Box::new(task))
    }
}

impl<E> fmt::Debug for SchedulerHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle").finish_non_exhaustive()
    }
}

/// Context passed to an executing task.
pub struct TaskContext<E> {
    handle: SchedulerHandle<E>,
    cancel: CancellationToken,
}

impl<E: Send + 'static> TaskContext<E> {
    pub(super) fn new(state: Arc<RunState<E>>, cancel: CancellationToken) -> Self {
        Self {
            handle: SchedulerHandle { state },
            cancel,
        }
    }

    /// Enqueues a follow-up task into the same run.
    pub fn add(&self, task: impl Task<E>) -> bool {
        self.handle.add(task)
    }

    pub fn handle(&self) -> SchedulerHandle<E> {
        self.handle.clone()
    }

    /// The run's cancellation token.
    ///
    /// Cancelled by the caller or by the first failing task.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<E> fmt::Debug for TaskContext<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
