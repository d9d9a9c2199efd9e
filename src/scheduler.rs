//! Scheduler contract and its single-threaded implementation.
//!
//! [`TaskScheduler`] is the seam through which generic worker-pool code hands
//! work to an executor. [`ContextTaskScheduler`] adapts a [`Context`] to it:
//! every item lands in the context's run queue and executes on the one thread
//! draining that queue.

use crate::error::ContextError;
use crate::runtime::Context;
use crate::task::WorkItem;

use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identifier of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchedulerId(NonZeroU64);

impl SchedulerId {
    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);

        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        SchedulerId(NonZeroU64::new(id).expect("scheduler id space exhausted"))
    }

    /// Returns the raw numeric value.
    pub fn as_u64(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for SchedulerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contract of an executor that accepts queued work items.
pub trait TaskScheduler: Send + Sync {
    /// Stable identifier of this scheduler.
    fn id(&self) -> SchedulerId;

    /// Maximum number of items this scheduler runs at the same time.
    fn maximum_concurrency_level(&self) -> usize;

    /// Queues an item for execution.
    ///
    /// # Errors
    /// Returns [`ContextError::QueueCompleted`] if the scheduler no longer
    /// accepts work.
    fn queue_item(&self, item: WorkItem) -> Result<(), ContextError>;

    /// Runs `item` on the calling thread if the scheduler allows it.
    ///
    /// A refused item is handed back as `Err(item)` so the caller can queue it
    /// instead.
    fn try_execute_item_inline(&self, item: WorkItem) -> Result<(), WorkItem>;
}

/// [`TaskScheduler`] funneling all work into one context's run queue.
///
/// Queued items are not counted as outstanding operations; whoever queues
/// work this way manages the context's operation count explicitly (see
/// [`Context::operation_started`]).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ContextTaskScheduler {
    context: Context,
}

impl ContextTaskScheduler {
    pub(crate) fn new(context: Context) -> Self {
        Self { context }
    }

    /// The context this scheduler feeds.
    pub fn context(&self) -> &Context {
        &self.context
    }
}

impl TaskScheduler for ContextTaskScheduler {
    fn id(&self) -> SchedulerId {
        self.context.id()
    }

    fn maximum_concurrency_level(&self) -> usize {
        1
    }

    fn queue_item(&self, item: WorkItem) -> Result<(), ContextError> {
        self.context.enqueue(item)
    }

    fn try_execute_item_inline(&self, item: WorkItem) -> Result<(), WorkItem> {
        if !self.context.is_executing_thread() {
            tracing::trace!(id = %self.id(), "refusing inline execution off the context thread");
            return Err(item);
        }

        item.run();
        Ok(())
    }
}

impl fmt::Debug for ContextTaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextTaskScheduler")
            .field("id", &self.id())
            .finish()
    }
}
