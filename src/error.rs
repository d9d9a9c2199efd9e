//! Error types reported by contexts, their queues and their tasks.
//!
//! Two families live here:
//!
//! - [`ContextError`] covers contract violations (work scheduled onto a drained
//!   context, an operation completed more often than it was started, a context
//!   executed twice) and cancellation of work that never got to run.
//! - [`JoinError`] is what a [`JoinHandle`](crate::JoinHandle) resolves to when
//!   its task did not produce a value.

use std::any::Any;
use std::fmt;

/// Errors surfaced by the context machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// Work was scheduled onto a context whose run queue no longer accepts items.
    #[error("work was scheduled onto a context whose run queue has completed")]
    QueueCompleted,

    /// An operation was reported complete without a matching start.
    #[error("operation completed more times than it was started")]
    OperationCountUnderflow,

    /// `execute` was called on a context that has already drained.
    #[error("context has already been drained and cannot be executed again")]
    AlreadyDrained,

    /// `execute` was called while another call is still running the queue.
    #[error("context is already being executed")]
    AlreadyExecuting,

    /// The work item was dropped before it ran.
    #[error("work item was canceled before it could run")]
    Canceled,
}

/// Reason a task finished without producing its output.
pub enum JoinError {
    /// The task's future panicked; holds the original payload.
    Panicked(Box<dyn Any + Send + 'static>),

    /// The task was dropped before it completed.
    Canceled,
}

impl JoinError {
    /// Returns `true` if the task panicked.
    pub fn is_panic(&self) -> bool {
        matches!(self, JoinError::Panicked(_))
    }

    /// Returns `true` if the task was canceled.
    pub fn is_canceled(&self) -> bool {
        matches!(self, JoinError::Canceled)
    }

    /// Consumes the error, returning the panic payload.
    ///
    /// # Panics
    /// Panics if the task was canceled rather than panicking.
    pub fn into_panic(self) -> Box<dyn Any + Send + 'static> {
        match self {
            JoinError::Panicked(payload) => payload,
            JoinError::Canceled => panic!("`JoinError::into_panic` called on a canceled task"),
        }
    }

    /// Re-raises the task's failure on the current thread.
    ///
    /// A panic is resumed with its original payload so `downcast` on the caller
    /// side sees the exact value the task panicked with.
    pub fn resume(self) -> ! {
        match self {
            JoinError::Panicked(payload) => std::panic::resume_unwind(payload),
            JoinError::Canceled => panic!("{}", ContextError::Canceled),
        }
    }
}

impl fmt::Debug for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::Panicked(payload) => f
                .debug_tuple("Panicked")
                .field(&panic_message(payload.as_ref()))
                .finish(),
            JoinError::Canceled => f.write_str("Canceled"),
        }
    }
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::Panicked(payload) => {
                write!(f, "task panicked: {}", panic_message(payload.as_ref()))
            }
            JoinError::Canceled => f.write_str("task was canceled"),
        }
    }
}

impl std::error::Error for JoinError {}

// Best-effort extraction of a panic message for diagnostics.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "Box<dyn Any>"
    }
}
