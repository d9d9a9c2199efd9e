//! Waker implementation for task wake-up notifications.
//!
//! A task's waker re-queues the task on the context it belongs to. Wakers may
//! be cloned and fired from any thread; the task itself is only ever polled by
//! the thread executing that context.
//!
//! The data pointer of every raw waker is an `Arc<R>` turned into a raw
//! pointer; each vtable function rebuilds the `Arc` and keeps the reference
//! count balanced.

use crate::task::Runnable;

use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::task::{RawWaker, RawWakerVTable, Waker};

/// Per-type raw waker vtable.
trait WakerVTable: Runnable + Sized {
    const VTABLE: RawWakerVTable = RawWakerVTable::new(
        clone_raw::<Self>,
        wake_raw::<Self>,
        wake_by_ref_raw::<Self>,
        drop_raw::<Self>,
    );
}

impl<R: Runnable> WakerVTable for R {}

fn raw<R: Runnable>(task: Arc<R>) -> RawWaker {
    RawWaker::new(Arc::into_raw(task) as *const (), &R::VTABLE)
}

fn clone_raw<R: Runnable>(ptr: *const ()) -> RawWaker {
    // Safety: `ptr` came from `Arc::into_raw` in `raw` and is still owned by
    // the waker being cloned.
    let task = ManuallyDrop::new(unsafe { Arc::from_raw(ptr as *const R) });
    raw(Arc::clone(&task))
}

fn wake_raw<R: Runnable>(ptr: *const ()) {
    // Safety: consumes the reference owned by the waker.
    let task = unsafe { Arc::from_raw(ptr as *const R) };
    tracing::trace!("waking task");
    task.schedule();
}

fn wake_by_ref_raw<R: Runnable>(ptr: *const ()) {
    // Safety: borrows the waker's reference without consuming it.
    let task = ManuallyDrop::new(unsafe { Arc::from_raw(ptr as *const R) });
    tracing::trace!("waking task by ref");
    Arc::clone(&task).schedule();
}

fn drop_raw<R: Runnable>(ptr: *const ()) {
    // Safety: releases the reference owned by the waker.
    unsafe { drop(Arc::from_raw(ptr as *const R)) };
}

/// Creates a waker that re-queues `task` on its context when woken.
pub(crate) fn make_waker<R: Runnable>(task: Arc<R>) -> Waker {
    // Safety: the vtable functions uphold the `RawWaker` contract for `Arc<R>`.
    unsafe { Waker::from_raw(raw(task)) }
}
