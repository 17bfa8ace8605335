//! End-to-end coordination scenarios.
//!
//! Several verified operations share one completion latch; waits on an
//! operation are bounded by a cancellation scope.

mod common;

use appverify::cancel::{CancelKind, CancelReason, CancelToken};
use appverify::combinator::FaultPropagating;
use appverify::sync::CompletionLatch;
use appverify::test_utils::{complete_parked, deferred_begin, sync_begin, Parked};
use appverify::verifier::{CompletionMode, OperationState, ResultRef, Settled};
use appverify::{assert_with_log, test_complete, test_phase, test_section};
use common::{init_test_logging, Fixture};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

fn noop(_: ResultRef) {}

#[test]
fn three_operations_signal_latch_once() {
    init_test("three_operations_signal_latch_once");
    let fx = Fixture::new();
    let latch = Arc::new(CompletionLatch::new(3));
    let signalled = Arc::new(AtomicUsize::new(0));

    let waiter = {
        let completion = latch.completion();
        let signalled = Arc::clone(&signalled);
        thread::spawn(move || {
            completion.wait();
            signalled.fetch_add(1, Ordering::SeqCst);
        })
    };

    test_section!("two synchronous completions");
    let sync_ops: Vec<_> = (0..2)
        .map(|_| {
            let op = fx
                .verifier
                .operation(fx.host())
                .with_latch(Arc::clone(&latch));
            op.start(Some(sync_begin), noop, None)
                .expect("synchronous begin");
            op
        })
        .collect();
    assert_eq!(latch.pending(), 1);
    assert!(!latch.is_completed());
    assert!(!latch.wait_timeout(Duration::from_millis(20)));

    test_section!("one asynchronous completion from another thread");
    let parked = Parked::default();
    let async_op = fx
        .verifier
        .operation(fx.host())
        .with_latch(Arc::clone(&latch));
    async_op
        .start(Some(deferred_begin(&parked)), noop, None)
        .expect("deferred begin");
    assert!(!latch.is_completed());

    let remote = Arc::clone(&parked);
    thread::spawn(move || assert!(complete_parked(&remote)))
        .join()
        .expect("callback thread panicked");

    waiter.join().expect("waiter panicked");
    assert!(latch.is_completed());
    let count = signalled.load(Ordering::SeqCst);
    assert_with_log!(count == 1, "latch observers woken", 1usize, count);

    for op in &sync_ops {
        assert_eq!(
            op.outcome().get(),
            Some(&Ok(Settled::Dispatched(CompletionMode::Synchronous)))
        );
    }
    assert_eq!(async_op.state(), OperationState::Dispatched);
    assert!(fx.recorder().is_empty());
    test_complete!("three_operations_signal_latch_once");
}

#[test]
fn racing_completions_signal_latch_once() {
    init_test("racing_completions_signal_latch_once");
    let fx = Fixture::new();
    let latch = Arc::new(CompletionLatch::new(3));
    let start = Arc::new(Barrier::new(3));

    let parked: Vec<Parked> = (0..3).map(|_| Parked::default()).collect();
    let ops: Vec<_> = parked
        .iter()
        .map(|slot| {
            let op = fx
                .verifier
                .operation(fx.host())
                .with_latch(Arc::clone(&latch));
            op.start(Some(deferred_begin(slot)), noop, None)
                .expect("deferred begin");
            op
        })
        .collect();

    let handles: Vec<_> = parked
        .into_iter()
        .map(|slot| {
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                assert!(complete_parked(&slot));
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("callback thread panicked");
    }

    assert!(latch.is_completed());
    assert_eq!(latch.pending(), 0);
    assert!(ops.iter().all(|op| op.state() == OperationState::Dispatched));
    test_complete!("racing_completions_signal_latch_once");
}

#[test]
fn faulted_operation_still_releases_latch() {
    init_test("faulted_operation_still_releases_latch");
    let fx = Fixture::new();
    let latch = Arc::new(CompletionLatch::new(1));
    let parked = Parked::default();
    let op = fx
        .verifier
        .operation(fx.host())
        .with_latch(Arc::clone(&latch));
    op.start(Some(deferred_begin(&parked)), noop, None)
        .expect("deferred begin");
    fx.host.reassign();
    assert!(complete_parked(&parked));
    assert!(latch.is_completed());
    assert!(op.outcome().resolve().is_err());
    test_complete!("faulted_operation_still_releases_latch");
}

#[test]
fn scope_cancelled_wait_returns_promptly() {
    init_test("scope_cancelled_wait_returns_promptly");
    let fx = Fixture::new();
    let parked = Parked::default();
    let op = fx.verifier.operation(fx.host());
    op.start(Some(deferred_begin(&parked)), noop, None)
        .expect("deferred begin");
    let outcome = op.outcome();

    test_section!("request completes while the operation is in flight");
    let scope = fx.host.scope();
    let completer = {
        let host = Arc::clone(&fx.host);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            host.complete_request();
        })
    };
    let waited = outcome.wait_within(&scope);
    completer.join().expect("completer panicked");

    let abandoned = waited.expect_err("wait must be abandoned");
    assert_eq!(abandoned.reason.kind, CancelKind::RequestCompleted);
    assert!(!outcome.is_completed());
    assert_eq!(op.state(), OperationState::Started);

    test_section!("operation completes afterwards and is inspectable");
    assert!(complete_parked(&parked));
    assert_eq!(
        outcome.resolve(),
        Ok(Settled::Dispatched(CompletionMode::Asynchronous))
    );
    assert!(op.fault().is_none());
    test_complete!("scope_cancelled_wait_returns_promptly");
}

#[test]
fn explicit_cancel_abandons_wait() {
    init_test("explicit_cancel_abandons_wait");
    let fx = Fixture::new();
    let parked = Parked::default();
    let op = fx.verifier.operation(fx.host());
    op.start(Some(deferred_begin(&parked)), noop, None)
        .expect("deferred begin");

    let scope = CancelToken::new();
    scope.cancel(&CancelReason::user("caller gave up"));
    let abandoned = op
        .outcome()
        .wait_within(&scope)
        .expect_err("wait must be abandoned");
    assert_eq!(abandoned.reason, CancelReason::user("caller gave up"));
    assert!(!fx.host.scope().is_cancelled());

    assert!(complete_parked(&parked));
    assert_eq!(op.state(), OperationState::Dispatched);
    test_complete!("explicit_cancel_abandons_wait");
}

#[test]
fn awaiting_within_live_scope_sees_fault() {
    init_test("awaiting_within_live_scope_sees_fault");
    let fx = Fixture::new();
    let parked = Parked::default();
    let op = fx.verifier.operation(fx.host());
    op.start(Some(deferred_begin(&parked)), noop, None)
        .expect("deferred begin");

    let scope = fx.host.scope();
    let remote = Arc::clone(&parked);
    let host = Arc::clone(&fx.host);
    let completer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        host.reassign();
        assert!(complete_parked(&remote));
    });

    let outcome = futures_lite::future::block_on(op.outcome().within(&scope))
        .expect("scope is still live");
    completer.join().expect("completer panicked");
    let fault = outcome.expect_err("reassigned context faults");
    assert_eq!(
        fault.code(),
        appverify::ErrorCode::AsyncCallbackCalledAfterHttpApplicationReassigned
    );
    test_complete!("awaiting_within_live_scope_sees_fault");
}
