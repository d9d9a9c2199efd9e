//! Context subsystem modules.

pub(crate) mod context;
pub(crate) mod core;
pub(crate) mod counter;
pub(crate) mod queue;
pub(crate) mod thread;
pub(crate) mod waker;
pub mod yield_now;

pub use self::core::Context;
pub use thread::ContextThread;
pub(crate) use waker::make_waker;
