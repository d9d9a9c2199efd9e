//! Outstanding-operation counter of a context.
//!
//! A context keeps draining its queue for as long as at least one operation is
//! in flight. Operations are started by `run`, by task submissions and by
//! posted callbacks, and completed when that work finishes. The transition to
//! zero completes the run queue.

use crate::error::ContextError;
use crate::runtime::queue::RunQueue;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) struct OperationCounter {
    outstanding: AtomicUsize,
    queue: Arc<RunQueue>,
}

impl OperationCounter {
    pub(crate) fn new(queue: Arc<RunQueue>) -> Self {
        Self {
            outstanding: AtomicUsize::new(0),
            queue,
        }
    }

    /// Registers one more in-flight operation.
    pub(crate) fn increment(&self) {
        let previous = self.outstanding.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(outstanding = previous + 1, "operation started");
    }

    /// Reports one in-flight operation as finished.
    ///
    /// Reaching zero notifies the run queue, which completes unless another
    /// operation was started in the meantime.
    ///
    /// # Errors
    /// Returns [`ContextError::OperationCountUnderflow`] if no operation was in
    /// flight. The counter stays at zero.
    pub(crate) fn decrement(&self) -> Result<(), ContextError> {
        let previous = self
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                count.checked_sub(1)
            })
            .map_err(|_| {
                tracing::error!("operation completed without a matching start");
                ContextError::OperationCountUnderflow
            })?;

        tracing::trace!(outstanding = previous - 1, "operation completed");

        if previous == 1 {
            self.queue.mark_count_reached_zero(&self.outstanding);
        }

        Ok(())
    }

    pub(crate) fn count(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaching_zero_completes_the_queue() {
        let queue = Arc::new(RunQueue::new());
        let counter = OperationCounter::new(queue.clone());

        counter.increment();
        counter.increment();
        counter.decrement().unwrap();
        assert!(!queue.is_complete());

        counter.decrement().unwrap();
        assert_eq!(counter.count(), 0);
        assert!(queue.is_complete());
        assert!(queue.dequeue_blocking().is_none());
    }

    #[test]
    fn decrement_below_zero_is_reported() {
        let queue = Arc::new(RunQueue::new());
        let counter = OperationCounter::new(queue.clone());

        assert_eq!(
            counter.decrement(),
            Err(ContextError::OperationCountUnderflow)
        );
        assert_eq!(counter.count(), 0);
        assert!(!queue.is_complete());
    }
}
