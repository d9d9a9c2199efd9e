//! Context executed by a dedicated background thread.
//!
//! A [`ContextThread`] keeps one context alive on its own thread until it is
//! joined, so any number of other threads can keep submitting work to it in
//! the meantime. The context holds one extra operation from construction until
//! the first join request; after that it drains like any other context once
//! its remaining work is done, and the thread exits.

use crate::builder::ContextThreadBuilder;
use crate::factory::TaskFactory;
use crate::runtime::Context;

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::Shared;
use std::fmt;
use std::future::Future;
use std::io;
use std::panic;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// A context bound to a dedicated thread.
///
/// # Example
/// ```ignore
/// use runloop::ContextThread;
///
/// let thread = ContextThread::new()?;
/// let answer = thread.factory().run(|| 6 * 7)?.wait().unwrap();
/// assert_eq!(answer, 42);
/// thread.join();
/// ```
pub struct ContextThread {
    context: Context,
    factory: TaskFactory,
    worker: Arc<Mutex<Option<thread::JoinHandle<()>>>>,
    exited: Shared<oneshot::Receiver<()>>,
    join_requested: AtomicBool,
}

impl ContextThread {
    /// Starts a context thread with default settings.
    ///
    /// # Errors
    /// Returns the OS error if the thread could not be spawned.
    pub fn new() -> io::Result<Self> {
        ContextThreadBuilder::new().build()
    }

    /// Returns a builder for configuring the thread.
    pub fn builder() -> ContextThreadBuilder {
        ContextThreadBuilder::new()
    }

    pub(crate) fn spawn(builder: thread::Builder, context: Context) -> io::Result<Self> {
        // Held until the first join request so the queue stays open while no
        // work has been submitted yet.
        context.operation_started();

        let (exited_tx, exited_rx) = oneshot::channel();
        let worker_context = context.clone();

        let worker = builder.spawn(move || {
            tracing::debug!(id = %worker_context.id(), "context thread started");

            if let Err(err) = worker_context.execute() {
                tracing::error!(id = %worker_context.id(), %err, "context thread could not execute");
            }

            tracing::debug!(id = %worker_context.id(), "context thread exiting");
            drop(worker_context);
            let _ = exited_tx.send(());
        })?;

        Ok(Self {
            factory: context.factory(),
            context,
            worker: Arc::new(Mutex::new(Some(worker))),
            exited: exited_rx.shared(),
            join_requested: AtomicBool::new(false),
        })
    }

    /// The context executed by the thread.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Factory starting tasks on the thread.
    pub fn factory(&self) -> &TaskFactory {
        &self.factory
    }

    /// Signals that no more work will be submitted and waits for the thread
    /// to exit.
    ///
    /// The thread exits once all work already submitted has completed. Safe to
    /// call repeatedly; a panic that escaped the thread is resumed on the
    /// first caller.
    ///
    /// # Panics
    /// Panics when called from the context thread itself.
    pub fn join(&self) {
        if self.context.is_executing_thread() {
            panic!("ContextThread::join() called from its own thread");
        }

        self.request_join();

        let worker = self.worker.lock().unwrap().take();
        match worker {
            Some(worker) => {
                if let Err(payload) = worker.join() {
                    panic::resume_unwind(payload);
                }
            }
            None => {
                let _ = futures::executor::block_on(self.exited.clone());
            }
        }
    }

    /// Signals that no more work will be submitted and returns a future that
    /// resolves once the thread has exited.
    ///
    /// The returned future does not borrow `self` and may be awaited from any
    /// thread other than the context thread. Unless another caller is already
    /// joining the thread, the future joins it before resolving, and resumes
    /// a panic that escaped it.
    pub fn join_async(&self) -> impl Future<Output = ()> + Send + 'static {
        self.request_join();

        let exited = self.exited.clone();
        let worker = self.worker.clone();
        async move {
            let _ = exited.await;

            // The exit signal is the worker's last action, so this join only
            // waits for the thread to finish tearing down.
            let worker = worker.lock().unwrap().take();
            if let Some(worker) = worker
                && let Err(payload) = worker.join()
            {
                panic::resume_unwind(payload);
            }
        }
    }

    fn request_join(&self) {
        if self.join_requested.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::debug!(id = %self.context.id(), "join requested");
        if let Err(err) = self.context.operation_completed() {
            tracing::error!(id = %self.context.id(), %err, "join request found no operation to release");
        }
    }
}

// Dropping without joining detaches the thread; it exits on its own once the
// work already submitted has completed.
impl Drop for ContextThread {
    fn drop(&mut self) {
        self.request_join();
    }
}

impl fmt::Debug for ContextThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextThread")
            .field("context", &self.context)
            .field("join_requested", &self.join_requested.load(Ordering::SeqCst))
            .finish()
    }
}
