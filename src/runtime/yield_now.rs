//! Cooperative yielding inside a context.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Yields once so that other queued work runs first.
///
/// The current task wakes itself and returns `Pending`; its waker re-queues it
/// at the tail of the run queue, behind everything queued before the yield.
pub async fn yield_now() {
    YieldNow { yielded: false }.await
}

struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }

        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
