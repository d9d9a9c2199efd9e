//! Submission surface for starting tasks on a specific context.

use crate::error::ContextError;
use crate::runtime::Context;
use crate::scheduler::ContextTaskScheduler;
use crate::task::{JoinHandle, Task, WorkItem};

use std::future::Future;

/// Starts tasks on one context.
///
/// Obtained from [`Context::factory`] or
/// [`ContextThread::factory`](crate::ContextThread::factory). Unlike raw
/// [`TaskScheduler::queue_item`](crate::TaskScheduler::queue_item), every task
/// started here keeps its context alive until the task completes.
#[derive(Debug, Clone)]
pub struct TaskFactory {
    scheduler: ContextTaskScheduler,
}

impl TaskFactory {
    pub(crate) fn new(scheduler: ContextTaskScheduler) -> Self {
        Self { scheduler }
    }

    /// The scheduler tasks are started on.
    pub fn scheduler(&self) -> &ContextTaskScheduler {
        &self.scheduler
    }

    /// Starts `future` as a task on the factory's context.
    ///
    /// # Arguments
    /// * `future` - The future to run as a task
    ///
    /// # Returns
    /// A handle resolving to the future's output once the task completes.
    ///
    /// # Errors
    /// Returns [`ContextError::QueueCompleted`] if the context has drained.
    pub fn spawn<F>(&self, future: F) -> Result<JoinHandle<F::Output>, ContextError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let context = self.scheduler.context();

        // Started before the task is queued, so the queue cannot complete
        // between the enqueue and the task's first poll.
        context.operation_started();

        let task = Task::new(future, context.downgrade());
        let handle = JoinHandle::new(task.clone());

        if let Err(err) = context.enqueue(WorkItem::task(task)) {
            tracing::debug!(id = %context.id(), %err, "task submission rejected");
            context.operation_completed()?;
            return Err(err);
        }

        Ok(handle)
    }

    /// Starts a synchronous closure as a task on the factory's context.
    ///
    /// # Errors
    /// Returns [`ContextError::QueueCompleted`] if the context has drained.
    pub fn run<F, T>(&self, function: F) -> Result<JoinHandle<T>, ContextError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.spawn(async move { function() })
    }
}
