//! Blocking FIFO run queue backing a context.
//!
//! Every piece of work a context executes goes through this queue: posted
//! callbacks, freshly spawned tasks and tasks re-queued by their wakers. The
//! executing thread blocks in [`RunQueue::dequeue_blocking`] until either an
//! item shows up or the queue has been completed and emptied.

use crate::error::ContextError;
use crate::task::WorkItem;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

/// A thread-safe, blocking FIFO queue of work items.
///
/// Items are executed in insertion order. Once the owning context's operation
/// count drops to zero the queue stops accepting work; items already queued
/// are still handed out, after which every dequeue reports completion.
pub(crate) struct RunQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

struct QueueState {
    items: VecDeque<WorkItem>,
    completed: bool,
}

impl RunQueue {
    /// Creates a new empty queue that accepts work.
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                completed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Appends an item to the tail of the queue and wakes one blocked dequeuer.
    ///
    /// # Arguments
    /// * `item` - The work item to queue
    ///
    /// # Errors
    /// Returns [`ContextError::QueueCompleted`] if the queue has already been
    /// completed. The rejected item is canceled.
    pub(crate) fn enqueue(&self, item: WorkItem) -> Result<(), ContextError> {
        let rejected = {
            let mut state = self.state.lock().unwrap();
            if state.completed {
                Some(item)
            } else {
                state.items.push_back(item);
                tracing::trace!(len = state.items.len(), "enqueued work item");
                self.available.notify_one();
                None
            }
        };

        // Canceled outside the lock: canceling releases wakers and completion
        // signals that may touch this queue again.
        match rejected {
            Some(item) => {
                tracing::trace!("rejected work item, queue has completed");
                item.cancel();
                Err(ContextError::QueueCompleted)
            }
            None => Ok(()),
        }
    }

    /// Blocks until the next item is available.
    ///
    /// Returns `None` once the queue has been completed and no items remain.
    pub(crate) fn dequeue_blocking(&self) -> Option<WorkItem> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.completed {
                return None;
            }

            tracing::trace!("run queue empty, parking executor");
            state = self.available.wait(state).unwrap();
        }
    }

    /// Completes the queue if `outstanding` is still zero.
    ///
    /// Called by the operation counter on every transition to zero. The count
    /// is re-read under the queue lock so an operation started between the
    /// decrement and this call keeps the queue open.
    pub(crate) fn mark_count_reached_zero(&self, outstanding: &AtomicUsize) {
        let mut state = self.state.lock().unwrap();
        if state.completed || outstanding.load(Ordering::SeqCst) != 0 {
            return;
        }

        state.completed = true;
        tracing::trace!(remaining = state.items.len(), "run queue completed");
        self.available.notify_all();
    }

    /// Stops accepting work and cancels everything still queued.
    ///
    /// Used when an executor unwinds out of its loop; a queue that completed
    /// normally is already empty and this is a no-op.
    pub(crate) fn shutdown(&self) {
        let abandoned = {
            let mut state = self.state.lock().unwrap();
            state.completed = true;
            self.available.notify_all();
            std::mem::take(&mut state.items)
        };

        if !abandoned.is_empty() {
            tracing::debug!(count = abandoned.len(), "canceling abandoned work items");
        }
        for item in abandoned {
            item.cancel();
        }
    }

    /// Number of queued items.
    pub(crate) fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.state.lock().unwrap().completed
    }
}

impl Drop for RunQueue {
    fn drop(&mut self) {
        let items = match self.state.get_mut() {
            Ok(state) => std::mem::take(&mut state.items),
            Err(poisoned) => std::mem::take(&mut poisoned.into_inner().items),
        };
        for item in items {
            item.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, mpsc};
    use std::thread;
    use std::time::Duration;

    fn recording(log: &Arc<Mutex<Vec<u32>>>, value: u32) -> WorkItem {
        let log = log.clone();
        WorkItem::new(move || log.lock().unwrap().push(value))
    }

    #[test]
    fn items_run_in_insertion_order() {
        let queue = RunQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for value in 1..=3 {
            queue.enqueue(recording(&log, value)).unwrap();
        }
        assert_eq!(queue.len(), 3);

        for _ in 0..3 {
            queue.dequeue_blocking().unwrap().run();
        }
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn completion_drains_remaining_items_first() {
        let queue = RunQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let outstanding = AtomicUsize::new(0);

        queue.enqueue(recording(&log, 7)).unwrap();
        queue.mark_count_reached_zero(&outstanding);
        assert!(queue.is_complete());

        queue.dequeue_blocking().unwrap().run();
        assert!(queue.dequeue_blocking().is_none());
        assert_eq!(*log.lock().unwrap(), vec![7]);
    }

    #[test]
    fn enqueue_after_completion_is_rejected() {
        let queue = RunQueue::new();
        let outstanding = AtomicUsize::new(0);
        queue.mark_count_reached_zero(&outstanding);

        let result = queue.enqueue(WorkItem::new(|| {}));
        assert_eq!(result, Err(ContextError::QueueCompleted));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn nonzero_count_keeps_queue_open() {
        let queue = RunQueue::new();
        let outstanding = AtomicUsize::new(1);
        queue.mark_count_reached_zero(&outstanding);

        assert!(!queue.is_complete());
        assert!(queue.enqueue(WorkItem::new(|| {})).is_ok());
    }

    #[test]
    fn completion_wakes_blocked_dequeuer() {
        let queue = Arc::new(RunQueue::new());
        let (tx, rx) = mpsc::channel();

        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || {
                let next = queue.dequeue_blocking();
                tx.send(next.is_none()).unwrap();
            })
        };

        // The waiter must still be blocked: nothing queued, not completed.
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        queue.mark_count_reached_zero(&AtomicUsize::new(0));
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        waiter.join().unwrap();
    }
}
