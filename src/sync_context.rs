//! Callback delivery into a context.
//!
//! [`SynchronizationContext`] is the contract code uses to hand a callback to
//! "wherever it should resume": fire-and-forget with `post`, or blocking with
//! `send`. [`ContextSynchronizationContext`] delivers both through a context's
//! run queue and counts posted work as outstanding operations, so a context
//! keeps draining until every posted callback has run.

use crate::error::{ContextError, panic_message};
use crate::runtime::Context;
use crate::task::WorkItem;

use futures::channel::oneshot;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};

/// A boxed callback together with whatever state it captured.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Contract for delivering callbacks to an execution environment.
pub trait SynchronizationContext: Send + Sync {
    /// Queues `callback` and returns immediately.
    fn post(&self, callback: Callback) -> Result<(), ContextError>;

    /// Runs `callback` in the environment and waits for it to finish.
    fn send(&self, callback: Callback) -> Result<(), ContextError>;

    /// Registers an operation the environment must wait for.
    fn operation_started(&self);

    /// Reports a previously registered operation as finished.
    fn operation_completed(&self) -> Result<(), ContextError>;
}

/// Synchronization context delivering callbacks onto a [`Context`].
///
/// Two values compare equal when they deliver into the same context; `clone`
/// yields an equal copy.
#[derive(Clone)]
pub struct ContextSynchronizationContext {
    context: Context,
}

impl ContextSynchronizationContext {
    pub(crate) fn new(context: Context) -> Self {
        Self { context }
    }

    /// The context callbacks are delivered to.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Queues `callback` on the context and returns without waiting.
    ///
    /// The callback counts as an outstanding operation until it has run. A
    /// panic raised by it is not caught: it unwinds out of the context's
    /// [`execute`](Context::execute) call.
    ///
    /// # Errors
    /// Returns [`ContextError::QueueCompleted`] if the context has drained.
    pub fn post<F>(&self, callback: F) -> Result<(), ContextError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.context.operation_started();

        let context = self.context.downgrade();
        let item = WorkItem::new(move || {
            callback();
            if let Some(context) = context.upgrade() {
                context
                    .operation_completed()
                    .expect("posted callback completion is paired with its post");
            }
        });

        if let Err(err) = self.context.enqueue(item) {
            self.context.operation_completed()?;
            return Err(err);
        }

        Ok(())
    }

    /// Runs `callback` on the context and blocks until it returns.
    ///
    /// Called from the thread executing the context, the callback runs inline
    /// right away. From any other thread it is posted and the caller blocks
    /// until the context thread has run it; a panic in the callback is resumed
    /// on the caller with its original payload. The wait is not cancellable.
    ///
    /// # Errors
    /// - [`ContextError::QueueCompleted`] if the context has drained.
    /// - [`ContextError::Canceled`] if the callback was discarded unrun.
    pub fn send<F, R>(&self, callback: F) -> Result<R, ContextError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.context.is_executing_thread() {
            tracing::trace!(id = %self.context.id(), "running sent callback inline");
            return Ok(callback());
        }

        let (tx, rx) = oneshot::channel();
        self.post(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(callback));
            // The sender is gone only if the caller stopped waiting.
            let _ = tx.send(outcome);
        })?;

        match futures::executor::block_on(rx) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => {
                tracing::debug!(
                    panic = panic_message(payload.as_ref()),
                    "sent callback panicked, resuming on caller"
                );
                panic::resume_unwind(payload)
            }
            Err(oneshot::Canceled) => Err(ContextError::Canceled),
        }
    }

    /// Registers an operation the context must wait for before draining.
    pub fn operation_started(&self) {
        self.context.operation_started();
    }

    /// Completes an operation registered with
    /// [`operation_started`](Self::operation_started).
    ///
    /// # Errors
    /// Returns [`ContextError::OperationCountUnderflow`] if no operation is
    /// outstanding.
    pub fn operation_completed(&self) -> Result<(), ContextError> {
        self.context.operation_completed()
    }
}

impl SynchronizationContext for ContextSynchronizationContext {
    fn post(&self, callback: Callback) -> Result<(), ContextError> {
        ContextSynchronizationContext::post(self, callback)
    }

    fn send(&self, callback: Callback) -> Result<(), ContextError> {
        ContextSynchronizationContext::send(self, callback)
    }

    fn operation_started(&self) {
        ContextSynchronizationContext::operation_started(self);
    }

    fn operation_completed(&self) -> Result<(), ContextError> {
        ContextSynchronizationContext::operation_completed(self)
    }
}

impl PartialEq for ContextSynchronizationContext {
    fn eq(&self, other: &Self) -> bool {
        self.context == other.context
    }
}

impl Eq for ContextSynchronizationContext {}

impl Hash for ContextSynchronizationContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.context.hash(state);
    }
}

impl fmt::Debug for ContextSynchronizationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextSynchronizationContext")
            .field("context", &self.context.id())
            .finish()
    }
}
