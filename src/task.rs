//! Work items, tasks and join handles.
//!
//! Everything a context executes is a [`WorkItem`]: either a plain callback
//! (posted through the synchronization context) or a task wrapping a future.
//!
//! # How tasks work
//!
//! 1. A future is wrapped in a task and the owning context starts one
//!    operation for it
//! 2. The task is enqueued on the context's run queue
//! 3. The executing thread polls it with a waker bound to the task
//! 4. When the future yields `Poll::Pending` it stays parked in the task
//! 5. When the waker fires (from any thread) the task is re-queued on the
//!    same context, never on another one
//! 6. Once the future completes, its output is stored for the
//!    [`JoinHandle`] and the operation is completed
//!
//! # Spawning from inside a context
//!
//! ```ignore
//! use runloop::{Context, spawn};
//!
//! let sum = Context::run_async(|| async {
//!     let handle = spawn(async { 20 + 1 });
//!     handle.await.unwrap() * 2
//! });
//! assert_eq!(sum, 42);
//! ```

use crate::error::JoinError;
use crate::runtime::core::WeakContext;
use crate::runtime::{context, make_waker};

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Poll, Waker};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// A unit of work queued on a context.
///
/// Work items are created by the context itself (tasks, posted callbacks) or
/// by callers of [`TaskScheduler::queue_item`](crate::TaskScheduler::queue_item)
/// through [`WorkItem::new`].
pub struct WorkItem(Kind);

enum Kind {
    Callback(Box<dyn FnOnce() + Send + 'static>),
    Task(Arc<dyn Runnable>),
    ResumeRoot,
}

impl WorkItem {
    /// Wraps a callback as a work item.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        WorkItem(Kind::Callback(Box::new(callback)))
    }

    pub(crate) fn task(task: Arc<dyn Runnable>) -> Self {
        WorkItem(Kind::Task(task))
    }

    /// Marker asking the executing thread to poll the future passed to
    /// [`Context::run_future`](crate::Context::run_future).
    pub(crate) fn resume_root() -> Self {
        WorkItem(Kind::ResumeRoot)
    }

    pub(crate) fn is_resume_root(&self) -> bool {
        matches!(self.0, Kind::ResumeRoot)
    }

    /// Executes the item on the calling thread.
    pub fn run(self) {
        match self.0 {
            Kind::Callback(callback) => callback(),
            Kind::Task(task) => task.run(),
            Kind::ResumeRoot => {}
        }
    }

    /// Discards the item without running it.
    ///
    /// Tasks are resolved as canceled so their join handles do not wait
    /// forever; callbacks are dropped, which releases anything they captured.
    pub(crate) fn cancel(self) {
        match self.0 {
            Kind::Callback(callback) => drop(callback),
            Kind::Task(task) => task.cancel(),
            Kind::ResumeRoot => {}
        }
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Kind::Callback(_) => f.write_str("WorkItem::Callback"),
            Kind::Task(_) => f.write_str("WorkItem::Task"),
            Kind::ResumeRoot => f.write_str("WorkItem::ResumeRoot"),
        }
    }
}

/// Objects the run queue can drive.
///
/// Lets tasks of different output types share one queue.
pub(crate) trait Runnable: Send + Sync + 'static {
    /// Polls the task once.
    fn run(self: Arc<Self>);

    /// Re-queues the task on its context. Called by the waker.
    fn schedule(self: Arc<Self>);

    /// Resolves the task as canceled if it has not completed yet.
    fn cancel(self: Arc<Self>);
}

/// A future bound to one context, plus the slot its output lands in.
pub(crate) struct Task<T> {
    future: Mutex<Option<BoxFuture<T>>>,
    state: Mutex<TaskState<T>>,
    context: WeakContext,
    scheduled: AtomicBool,
    canceled: AtomicBool,
}

struct TaskState<T> {
    outcome: Option<Result<T, JoinError>>,
    completed: bool,
    waiters: Vec<Waker>,
}

impl<T: Send + 'static> Task<T> {
    /// Creates a task that is considered scheduled: the caller is expected to
    /// enqueue it right away.
    pub(crate) fn new<F>(future: F, context: WeakContext) -> Arc<Self>
    where
        F: Future<Output = T> + Send + 'static,
    {
        Arc::new(Task {
            future: Mutex::new(Some(Box::pin(future))),
            state: Mutex::new(TaskState {
                outcome: None,
                completed: false,
                waiters: Vec::new(),
            }),
            context,
            scheduled: AtomicBool::new(true),
            canceled: AtomicBool::new(false),
        })
    }

    fn poll(self: &Arc<Self>) {
        // Cleared before polling so a wake issued during the poll re-queues.
        self.scheduled.store(false, Ordering::SeqCst);

        let waker = make_waker(self.clone());
        let mut cx = std::task::Context::from_waker(&waker);

        let mut slot = self.future.lock().unwrap();
        let Some(future) = slot.as_mut() else {
            return;
        };

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)))
        {
            Ok(Poll::Pending) if !self.canceled.load(Ordering::SeqCst) => return,
            Ok(Poll::Pending) => Err(JoinError::Canceled),
            Ok(Poll::Ready(value)) => Ok(value),
            Err(payload) => {
                tracing::debug!(
                    panic = crate::error::panic_message(payload.as_ref()),
                    "task panicked"
                );
                Err(JoinError::Panicked(payload))
            }
        };

        let finished = slot.take();
        drop(slot);
        drop(finished);

        let canceled = outcome.as_ref().is_err_and(JoinError::is_canceled);
        self.finish(outcome);

        // A canceled task's operation is released by whoever rejected it.
        if !canceled && let Some(context) = self.context.upgrade() {
            context
                .operation_completed()
                .expect("task completion is paired with its submission");
        }
    }

    fn finish(&self, outcome: Result<T, JoinError>) {
        let waiters = {
            let mut state = self.state.lock().unwrap();
            state.outcome = Some(outcome);
            state.completed = true;
            std::mem::take(&mut state.waiters)
        };

        for waiter in waiters {
            waiter.wake();
        }
    }
}

impl<T: Send + 'static> Runnable for Task<T> {
    fn run(self: Arc<Self>) {
        self.poll();
    }

    fn schedule(self: Arc<Self>) {
        if self.scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        match self.context.upgrade() {
            Some(context) => {
                // A rejected item is canceled by the queue itself.
                if let Err(err) = context.enqueue(WorkItem::task(self)) {
                    tracing::trace!(%err, "dropping wake for a drained context");
                }
            }
            None => {
                tracing::trace!("context is gone, canceling task");
                self.cancel();
            }
        }
    }

    fn cancel(self: Arc<Self>) {
        self.canceled.store(true, Ordering::SeqCst);

        // If the future is being polled right now the poll observes the flag.
        let future = match self.future.try_lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => return,
        };

        if let Some(future) = future {
            drop(future);
            self.finish(Err(JoinError::Canceled));
        }
    }
}

/// An owned permission to await a task's output.
///
/// Resolves to `Ok(output)` once the task's future completes, or to a
/// [`JoinError`] if it panicked or was canceled. Dropping the handle detaches
/// the task; it keeps running on its context.
pub struct JoinHandle<T> {
    task: Arc<Task<T>>,
}

impl<T: Send + 'static> JoinHandle<T> {
    pub(crate) fn new(task: Arc<Task<T>>) -> Self {
        Self { task }
    }

    /// Returns `true` once the task has produced an outcome.
    pub fn is_finished(&self) -> bool {
        self.task.state.lock().unwrap().completed
    }

    /// Blocks the calling thread until the task finishes.
    ///
    /// # Panics
    /// Panics when called from the thread executing the task's own context,
    /// including from a nested [`Context::run`](crate::Context::run) on that
    /// thread: it is the only one able to make the task progress.
    pub fn wait(self) -> Result<T, JoinError> {
        if let Some(context) = self.task.context.upgrade()
            && context.is_executing_thread()
        {
            panic!("JoinHandle::wait() called on the thread executing the task's context");
        }

        futures::executor::block_on(self)
    }
}

impl<T: Send + 'static> Future for JoinHandle<T> {
    type Output = Result<T, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let mut state = self.task.state.lock().unwrap();

        if state.completed {
            let outcome = state
                .outcome
                .take()
                .expect("JoinHandle polled after completion");
            return Poll::Ready(outcome);
        }

        if !state.waiters.iter().any(|w| w.will_wake(cx.waker())) {
            state.waiters.push(cx.waker().clone());
        }

        Poll::Pending
    }
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle").finish_non_exhaustive()
    }
}

/// Spawns a future onto the context the calling thread is executing.
///
/// The spawned task counts as outstanding work: the surrounding
/// [`Context::run`](crate::Context::run) call does not return before it
/// completes.
///
/// # Panics
/// Panics if called outside of a context, or if the current context no longer
/// accepts work.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let context = context::current().expect("spawn() called outside of a context");

    match context.factory().spawn(future) {
        Ok(handle) => handle,
        Err(err) => panic!("spawn() failed: {err}"),
    }
}

