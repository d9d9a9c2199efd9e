//! Thread-local ambient context.
//!
//! While a thread is inside [`Context::execute`], that context is the thread's
//! "current" one. Code running on the thread can discover it through
//! [`Context::current`] instead of being handed a context explicitly; this is
//! what lets [`spawn`](crate::spawn) work without a handle.
//!
//! Entering a context saves whatever was current before and restores it on
//! exit, including when the closure unwinds, so executing a context from
//! inside another one on the same thread is fine.

use crate::runtime::core::Context;

use std::cell::RefCell;

thread_local! {
    /// The context the calling thread is executing, if any.
    ///
    /// Set by [`enter_context`] for the duration of every `execute` call.
    static CURRENT_CONTEXT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

/// Makes `context` the current one for the duration of `function`.
pub(crate) fn enter_context<F, R>(context: Context, function: F) -> R
where
    F: FnOnce() -> R,
{
    let previous = CURRENT_CONTEXT.with(|current| current.borrow_mut().replace(context));
    let _restore = Restore(Some(previous));

    function()
}

/// Returns the context the calling thread is executing, if any.
pub(crate) fn current() -> Option<Context> {
    CURRENT_CONTEXT
        .try_with(|current| current.borrow().clone())
        .ok()
        .flatten()
}

// Puts the previous context back, on return or unwind.
struct Restore(Option<Option<Context>>);

impl Drop for Restore {
    fn drop(&mut self) {
        if let Some(previous) = self.0.take() {
            // Dropped outside the borrow: releasing the last handle of a
            // context may run code that looks up the current context.
            let replaced = CURRENT_CONTEXT.try_with(|current| current.replace(previous));
            drop(replaced);
        }
    }
}
