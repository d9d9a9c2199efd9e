//! Single-threaded cooperative execution contexts.
//!
//! A [`Context`] runs tasks, their continuations and posted callbacks to
//! completion on one logical thread, in strict FIFO order, while other threads
//! keep feeding it work.
//!
//! # Architecture
//!
//! - **Context**: owns a run queue and an outstanding-operation counter;
//!   [`Context::execute`] drains it on the calling thread
//! - **Context::run**: runs a closure or future in a fresh context on the
//!   calling thread and blocks until all of its work has finished
//! - **ContextThread**: a context drained by a dedicated thread until joined
//! - **ContextSynchronizationContext**: `post`/`send` callback delivery
//! - **ContextTaskScheduler**: queues work items, concurrency level one
//! - **TaskFactory / JoinHandle**: start tasks on a context and await them
//! - **Context::current**: the context the calling thread is executing
//!
//! # Example
//! ```ignore
//! use runloop::{Context, spawn, yield_now};
//!
//! let total = Context::run_async(|| async {
//!     let child = spawn(async { 40 });
//!     yield_now().await;
//!     child.await.unwrap() + 2
//! });
//! assert_eq!(total, 42);
//! ```

mod builder;
mod error;
mod factory;
mod runtime;
mod scheduler;
mod sync_context;
mod task;

pub use builder::ContextThreadBuilder;
pub use error::{ContextError, JoinError};
pub use factory::TaskFactory;
pub use runtime::yield_now::yield_now;
pub use runtime::{Context, ContextThread};
pub use scheduler::{ContextTaskScheduler, SchedulerId, TaskScheduler};
pub use sync_context::{Callback, ContextSynchronizationContext, SynchronizationContext};
pub use task::{JoinHandle, WorkItem, spawn};
