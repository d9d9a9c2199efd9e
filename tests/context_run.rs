mod support;

use futures::channel::oneshot;
use runloop::{Context, ContextError, TaskScheduler, WorkItem, spawn, yield_now};
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, PartialEq)]
struct Boom(u32);

#[test]
fn test_run_returns_value_on_calling_thread() {
    support::init_tracing();
    let caller = thread::current().id();

    let (value, inside) = Context::run(|| (42, thread::current().id()));

    assert_eq!(value, 42);
    assert_eq!(inside, caller, "work should execute on the calling thread");
    assert_eq!(thread::current().id(), caller);
}

#[test]
fn test_run_unit_action() {
    let completed = Arc::new(AtomicBool::new(false));
    let flag = completed.clone();

    Context::run(move || flag.store(true, Ordering::SeqCst));

    assert!(completed.load(Ordering::SeqCst));
}

#[test]
fn test_run_async_waits_for_continuation_after_yield() {
    support::init_tracing();
    let values = Arc::new(Mutex::new(Vec::new()));
    let v = values.clone();

    Context::run_async(move || async move {
        v.lock().unwrap().push(1);
        yield_now().await;
        v.lock().unwrap().push(2);
    });

    assert_eq!(*values.lock().unwrap(), vec![1, 2]);
}

#[test]
fn test_run_future_returns_output() {
    let value = Context::run_future(async {
        yield_now().await;
        "done"
    });

    assert_eq!(value, "done");
}

#[test]
fn test_run_waits_for_continuation_woken_from_another_thread() {
    support::init_tracing();
    let values = Arc::new(Mutex::new(Vec::new()));
    let v = values.clone();
    let caller = thread::current().id();

    let resumed_on = Context::run_async(move || async move {
        let (tx, rx) = oneshot::channel();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.send(5).unwrap();
        });

        let value = rx.await.unwrap();
        v.lock().unwrap().push(value);
        thread::current().id()
    });

    assert_eq!(*values.lock().unwrap(), vec![5]);
    assert_eq!(resumed_on, caller, "continuation should resume on the context thread");
}

#[test]
fn test_run_waits_for_detached_tasks() {
    let counter = Arc::new(Mutex::new(0));
    let c = counter.clone();

    Context::run_async(move || async move {
        spawn(async move {
            for _ in 0..3 {
                yield_now().await;
            }
            *c.lock().unwrap() += 10;
        });
    });

    assert_eq!(
        *counter.lock().unwrap(),
        10,
        "detached task should finish before run returns"
    );
}

#[test]
fn test_run_waits_for_posted_callbacks() {
    let completed = Arc::new(AtomicBool::new(false));
    let flag = completed.clone();

    Context::run(move || {
        let context = Context::current().unwrap();
        context
            .synchronization_context()
            .post(move || flag.store(true, Ordering::SeqCst))
            .unwrap();
    });

    assert!(completed.load(Ordering::SeqCst));
}

#[test]
fn test_spawned_task_output_is_joinable() {
    let value = Context::run_async(|| async {
        let handle = spawn(async {
            yield_now().await;
            20 + 1
        });
        handle.await.unwrap() * 2
    });

    assert_eq!(value, 42);
}

#[test]
fn test_wait_in_nested_run_on_task_thread_panics() {
    let value = Context::run_async(|| async {
        let handle = spawn(async { 5 });

        // The outer context's thread is the only one that can poll the task,
        // so blocking on it from a nested run must fail instead of hanging.
        let blocked = panic::catch_unwind(AssertUnwindSafe(|| {
            Context::run(move || handle.wait())
        }));
        assert!(blocked.is_err());

        spawn(async { 6 }).await.unwrap()
    });

    assert_eq!(value, 6);
}

#[test]
fn test_run_borrows_caller_locals() {
    let words = vec!["alpha", "beta", "gamma"];
    let mut seen = Vec::new();

    let count = Context::run(|| {
        seen.extend(words.iter().map(|word| word.len()));
        words.len()
    });

    assert_eq!(count, 3);
    assert_eq!(seen, vec![5, 4, 5]);
}

#[test]
fn test_run_async_accepts_non_send_future() {
    let shared = Rc::new(RefCell::new(Vec::new()));
    let values = shared.clone();

    let total = Context::run_async(move || async move {
        values.borrow_mut().push(1);
        yield_now().await;
        values.borrow_mut().push(2);
        let sum: i32 = values.borrow().iter().sum();
        sum
    });

    assert_eq!(total, 3);
    assert_eq!(*shared.borrow(), vec![1, 2]);
}

#[test]
fn test_current_is_none_outside_context() {
    assert!(Context::current().is_none());
}

#[test]
fn test_current_is_enclosing_context() {
    let (current, id) = Context::run(|| {
        let current = Context::current().unwrap();
        let id = current.id();
        (current, id)
    });

    assert_eq!(current.id(), id);
    assert_eq!(current.scheduler().id(), id);
    assert!(current.is_drained());
    assert!(Context::current().is_none());
}

#[test]
fn test_nested_run_restores_outer_context() {
    let (outer_before, inner, outer_after) = Context::run(|| {
        let outer_before = Context::current().unwrap();
        let inner = Context::run(|| Context::current().unwrap());
        let outer_after = Context::current().unwrap();
        (outer_before, inner, outer_after)
    });

    assert_ne!(outer_before, inner);
    assert_eq!(outer_before, outer_after);
}

#[test]
fn test_run_resumes_original_panic() {
    let result: std::thread::Result<()> =
        panic::catch_unwind(|| Context::run(|| panic::panic_any(Boom(7))));

    let payload = result.unwrap_err();
    assert_eq!(payload.downcast_ref::<Boom>(), Some(&Boom(7)));
    assert!(Context::current().is_none());
}

#[test]
fn test_run_async_resumes_panic_raised_after_yield() {
    let result: std::thread::Result<()> = panic::catch_unwind(|| {
        Context::run_async(|| async {
            yield_now().await;
            panic!("late failure");
        })
    });

    let payload = result.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"late failure"));
}

#[test]
fn test_result_errors_pass_through_unchanged() {
    let result: Result<(), String> = Context::run(|| Err(String::from("rejected")));
    assert_eq!(result, Err(String::from("rejected")));
}

#[test]
fn test_posted_callback_panic_unwinds_out_of_run() {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        Context::run(|| {
            Context::current()
                .unwrap()
                .synchronization_context()
                .post(|| panic::panic_any(Boom(3)))
                .unwrap();
        })
    }));

    let payload = result.unwrap_err();
    assert_eq!(payload.downcast_ref::<Boom>(), Some(&Boom(3)));
    assert!(Context::current().is_none());
}

#[test]
fn test_scheduling_after_drain_never_executes() {
    let executed = Arc::new(AtomicBool::new(false));
    let context = Context::run(|| Context::current().unwrap());

    let flag = executed.clone();
    let queued = context
        .scheduler()
        .queue_item(WorkItem::new(move || flag.store(true, Ordering::SeqCst)));
    assert_eq!(queued, Err(ContextError::QueueCompleted));

    let flag = executed.clone();
    let spawned = context
        .factory()
        .run(move || flag.store(true, Ordering::SeqCst));
    assert_eq!(spawned.unwrap_err(), ContextError::QueueCompleted);

    let flag = executed.clone();
    let posted = context
        .synchronization_context()
        .post(move || flag.store(true, Ordering::SeqCst));
    assert_eq!(posted, Err(ContextError::QueueCompleted));

    assert!(!executed.load(Ordering::SeqCst));
    assert_eq!(context.outstanding_operations(), 0);
}

#[test]
fn test_execute_returns_when_single_operation_completes() {
    let context = Context::new();
    context.operation_started();
    assert_eq!(context.outstanding_operations(), 1);

    let ctx = context.clone();
    context
        .scheduler()
        .queue_item(WorkItem::new(move || ctx.operation_completed().unwrap()))
        .unwrap();

    context.execute().unwrap();

    assert!(context.is_drained());
    assert_eq!(context.outstanding_operations(), 0);
}

#[test]
fn test_execute_twice_is_rejected() {
    let context = Context::new();
    context.operation_started();
    let ctx = context.clone();
    context
        .scheduler()
        .queue_item(WorkItem::new(move || ctx.operation_completed().unwrap()))
        .unwrap();

    context.execute().unwrap();
    assert_eq!(context.execute(), Err(ContextError::AlreadyDrained));
}

#[test]
fn test_concurrent_execute_is_rejected() {
    let context = Context::new();
    context.operation_started();

    let worker = {
        let context = context.clone();
        thread::spawn(move || context.execute())
    };

    // Wait for the worker to enter the loop before probing.
    let (tx, rx) = std::sync::mpsc::channel();
    context
        .synchronization_context()
        .post(move || tx.send(()).unwrap())
        .unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();

    assert_eq!(context.execute(), Err(ContextError::AlreadyExecuting));

    context.operation_completed().unwrap();
    worker.join().unwrap().unwrap();
}

#[test]
fn test_operation_completed_without_start_is_reported() {
    let context = Context::new();
    assert_eq!(
        context.operation_completed(),
        Err(ContextError::OperationCountUnderflow)
    );
}

#[test]
#[should_panic(expected = "spawn() called outside of a context")]
fn test_spawn_panics_outside_context() {
    spawn(async {});
}
