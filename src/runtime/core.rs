//! Single-threaded cooperative execution context.
//!
//! A [`Context`] owns a run queue and an outstanding-operation counter. One
//! thread at a time drains the queue through [`Context::execute`]; everything
//! else talks to the context through its synchronization context, its
//! scheduler or its task factory.
//!
//! The queue completes when the operation count reaches zero. `Context::run`
//! starts one operation for the work it is given, so the calling thread keeps
//! draining until that work, and every task or callback it started, is done.
//! That root work is polled by the calling thread itself and is never handed
//! to another thread.

use crate::error::{ContextError, panic_message};
use crate::factory::TaskFactory;
use crate::runtime::context::{self, enter_context};
use crate::runtime::counter::OperationCounter;
use crate::runtime::queue::RunQueue;
use crate::scheduler::{ContextTaskScheduler, SchedulerId};
use crate::sync_context::ContextSynchronizationContext;
use crate::task::WorkItem;

use futures::task::ArcWake;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{self, Poll};
use std::thread::{self, ThreadId};

const IDLE: u8 = 0;
const EXECUTING: u8 = 1;
const DRAINED: u8 = 2;

/// Shared state behind every handle to one context.
pub(crate) struct ContextInner {
    queue: Arc<RunQueue>,
    counter: OperationCounter,
    id: SchedulerId,
    state: AtomicU8,
    owner: Mutex<Option<ThreadId>>,
}

/// A single-threaded execution environment for tasks and callbacks.
///
/// `Context` is a cheap handle; clones refer to the same context and compare
/// equal.
///
/// # Example
/// ```ignore
/// use runloop::Context;
///
/// let value = Context::run_async(|| async {
///     runloop::yield_now().await;
///     21 * 2
/// });
/// assert_eq!(value, 42);
/// ```
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

/// Non-owning handle held by tasks, so a queued task does not keep its own
/// context alive.
#[derive(Clone)]
pub(crate) struct WeakContext(Weak<ContextInner>);

impl Context {
    /// Creates an idle context with an empty queue.
    ///
    /// Nothing runs until a thread calls [`execute`](Self::execute). A context
    /// with no outstanding operations never completes on its own: start one
    /// with [`operation_started`](Self::operation_started) or submit a task
    /// before executing it.
    pub fn new() -> Self {
        let queue = Arc::new(RunQueue::new());
        let counter = OperationCounter::new(queue.clone());
        let id = SchedulerId::next();

        tracing::debug!(%id, "created context");

        Self {
            inner: Arc::new(ContextInner {
                queue,
                counter,
                id,
                state: AtomicU8::new(IDLE),
                owner: Mutex::new(None),
            }),
        }
    }

    /// Returns the context the calling thread is currently executing.
    ///
    /// `None` outside of any [`execute`](Self::execute) call.
    pub fn current() -> Option<Context> {
        context::current()
    }

    /// Identifier of this context, equal to its scheduler's id.
    pub fn id(&self) -> SchedulerId {
        self.inner.id
    }

    /// Synchronization context delivering callbacks into this context.
    pub fn synchronization_context(&self) -> ContextSynchronizationContext {
        ContextSynchronizationContext::new(self.clone())
    }

    /// Scheduler queuing work items onto this context.
    pub fn scheduler(&self) -> ContextTaskScheduler {
        ContextTaskScheduler::new(self.clone())
    }

    /// Factory starting tasks on this context.
    pub fn factory(&self) -> TaskFactory {
        TaskFactory::new(self.scheduler())
    }

    /// Registers an operation the context must wait for before draining.
    pub fn operation_started(&self) {
        self.inner.counter.increment();
    }

    /// Completes an operation registered with
    /// [`operation_started`](Self::operation_started).
    ///
    /// # Errors
    /// Returns [`ContextError::OperationCountUnderflow`] if no operation is
    /// outstanding.
    pub fn operation_completed(&self) -> Result<(), ContextError> {
        self.inner.counter.decrement()
    }

    /// Number of outstanding operations.
    pub fn outstanding_operations(&self) -> usize {
        self.inner.counter.count()
    }

    /// Returns `true` once [`execute`](Self::execute) has returned.
    pub fn is_drained(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst) == DRAINED
    }

    /// Drains the context's queue on the calling thread.
    ///
    /// Makes this context the thread's current one, then runs queued items in
    /// order until the queue completes. The previous current context is
    /// restored afterwards. A context can be executed once.
    ///
    /// A panic raised by a posted callback unwinds out of this call; the
    /// context is then drained and any work left in its queue is canceled.
    ///
    /// # Errors
    /// - [`ContextError::AlreadyExecuting`] if another call is running it.
    /// - [`ContextError::AlreadyDrained`] if it has already been executed.
    pub fn execute(&self) -> Result<(), ContextError> {
        self.execute_with(|| {})
    }

    // Drain loop shared by `execute` and `run_future`. `resume_root` is called
    // each time a root wake marker reaches the head of the queue.
    fn execute_with(&self, mut resume_root: impl FnMut()) -> Result<(), ContextError> {
        self.inner
            .state
            .compare_exchange(IDLE, EXECUTING, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|state| match state {
                DRAINED => ContextError::AlreadyDrained,
                _ => ContextError::AlreadyExecuting,
            })?;

        *self.inner.owner.lock().unwrap() = Some(thread::current().id());
        let _drained = DrainGuard(&self.inner);

        tracing::debug!(id = %self.id(), "executing context");

        enter_context(self.clone(), || {
            while let Some(item) = self.inner.queue.dequeue_blocking() {
                if item.is_resume_root() {
                    resume_root();
                } else {
                    item.run();
                }
            }
        });

        tracing::debug!(id = %self.id(), "context drained");
        Ok(())
    }

    /// Runs `function` in a new context on the calling thread.
    ///
    /// Returns once `function` and everything it started in the context have
    /// finished. A panic in `function` is resumed here with its original
    /// payload.
    ///
    /// `function` runs on the calling thread, so it may borrow from the
    /// caller's stack.
    pub fn run<F, T>(function: F) -> T
    where
        F: FnOnce() -> T,
    {
        Self::run_future(async move { function() })
    }

    /// Runs the future returned by `function` in a new context on the calling
    /// thread.
    ///
    /// `function` itself is invoked inside the context.
    pub fn run_async<F, Fut>(function: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        Self::run_future(async move { function().await })
    }

    /// Drives `future` to completion in a new context on the calling thread.
    ///
    /// The future is polled directly by the calling thread and never leaves
    /// it, so it needs to be neither `Send` nor `'static`. It counts as one
    /// outstanding operation until it completes.
    ///
    /// # Arguments
    /// * `future` - The future to drive
    ///
    /// # Returns
    /// The future's output, once it and every continuation, task and callback
    /// scheduled on the context during its execution have completed.
    pub fn run_future<Fut>(future: Fut) -> Fut::Output
    where
        Fut: Future,
    {
        let context = Context::new();
        context.operation_started();

        let root = Arc::new(RootWaker {
            scheduled: AtomicBool::new(true),
            context: context.downgrade(),
        });
        let waker = futures::task::waker(root.clone());

        context
            .enqueue(WorkItem::resume_root())
            .expect("a new context accepts work");

        let mut future = pin!(future);
        let mut outcome: Option<thread::Result<Fut::Output>> = None;

        context
            .execute_with(|| {
                if outcome.is_some() {
                    return;
                }
                root.scheduled.store(false, Ordering::SeqCst);

                let mut cx = task::Context::from_waker(&waker);
                outcome = match panic::catch_unwind(AssertUnwindSafe(|| {
                    future.as_mut().poll(&mut cx)
                })) {
                    Ok(Poll::Pending) => return,
                    Ok(Poll::Ready(value)) => Some(Ok(value)),
                    Err(payload) => {
                        tracing::debug!(
                            panic = panic_message(payload.as_ref()),
                            "root future panicked"
                        );
                        Some(Err(payload))
                    }
                };

                context
                    .operation_completed()
                    .expect("root completion is paired with its start");
            })
            .expect("a new context is executed exactly once");

        match outcome {
            Some(Ok(value)) => value,
            Some(Err(payload)) => panic::resume_unwind(payload),
            None => panic!("context drained before its root future completed"),
        }
    }

    pub(crate) fn enqueue(&self, item: WorkItem) -> Result<(), ContextError> {
        self.inner.queue.enqueue(item)
    }

    /// Returns `true` if the calling thread is the one executing this context.
    pub(crate) fn is_executing_thread(&self) -> bool {
        *self.inner.owner.lock().unwrap() == Some(thread::current().id())
    }

    pub(crate) fn downgrade(&self) -> WeakContext {
        WeakContext(Arc::downgrade(&self.inner))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Context {}

impl Hash for Context {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.state.load(Ordering::SeqCst) {
            IDLE => "idle",
            EXECUTING => "executing",
            _ => "drained",
        };

        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("state", &state)
            .field("outstanding", &self.inner.counter.count())
            .field("queued", &self.inner.queue.len())
            .finish()
    }
}

impl WeakContext {
    pub(crate) fn upgrade(&self) -> Option<Context> {
        self.0.upgrade().map(|inner| Context { inner })
    }
}

// Waker of the root future: re-queues a resume marker so the root is polled
// in FIFO order with the rest of the context's work.
struct RootWaker {
    scheduled: AtomicBool,
    context: WeakContext,
}

impl ArcWake for RootWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if arc_self.scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(context) = arc_self.context.upgrade()
            && let Err(err) = context.enqueue(WorkItem::resume_root())
        {
            tracing::trace!(%err, "dropping root wake for a drained context");
        }
    }
}

// Moves the context to its drained state when `execute` returns or unwinds.
struct DrainGuard<'a>(&'a ContextInner);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut owner) = self.0.owner.lock() {
            *owner = None;
        }
        self.0.state.store(DRAINED, Ordering::SeqCst);

        if thread::panicking() {
            tracing::debug!(id = %self.0.id, "executor unwinding, shutting down run queue");
        }
        self.0.queue.shutdown();
    }
}
