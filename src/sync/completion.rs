//! One-shot shared completion signal.
//!
//! [`CompletionSource`] is the producing half; [`Completion`] is a cloneable
//! handle that observes the value. The value is set at most once: every
//! producer may attempt [`try_complete`](CompletionSource::try_complete),
//! but only the attempt that moves the cell from pending to done has any
//! effect.
//!
//! A [`Completion`] can be observed three ways:
//!
//! - non-blocking: [`Completion::get`] / [`Completion::is_completed`]
//! - blocking: [`Completion::wait`] / [`Completion::wait_timeout`]
//! - async: `Completion<T>` is itself a [`Future`] yielding a clone of `T`
//!
//! Completing never blocks on waiters: wakers are collected under the lock
//! and woken after it is released, so the completing thread finishes its own
//! accounting before any waiter resumes on it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex as StdMutex, OnceLock};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

const PENDING: u8 = 0;
const COMPLETING: u8 = 1;
const COMPLETE: u8 = 2;

struct Shared<T> {
    /// PENDING, COMPLETING or COMPLETE.
    state: AtomicU8,
    value: OnceLock<T>,
    /// Async waiters.
    waiters: StdMutex<Vec<Waker>>,
    /// Blocking waiters.
    cvar: Condvar,
}

impl<T> Shared<T> {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(PENDING),
            value: OnceLock::new(),
            waiters: StdMutex::new(Vec::new()),
            cvar: Condvar::new(),
        }
    }

    fn is_complete(&self) -> bool {
        self.state.load(Ordering::Acquire) == COMPLETE
    }

    fn lock_waiters(&self) -> std::sync::MutexGuard<'_, Vec<Waker>> {
        match self.waiters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn try_complete(&self, value: T) -> bool {
        if self
            .state
            .compare_exchange(PENDING, COMPLETING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let _ = self.value.set(value);
        self.state.store(COMPLETE, Ordering::Release);

        // Taking the lock orders this store against any waiter that checked
        // the state and is about to park.
        let wakers = {
            let mut waiters = self.lock_waiters();
            self.cvar.notify_all();
            std::mem::take(&mut *waiters)
        };
        for waker in wakers {
            waker.wake();
        }
        true
    }
}

/// Producing half of a one-shot completion.
pub struct CompletionSource<T> {
    shared: Arc<Shared<T>>,
}

impl<T> CompletionSource<T> {
    /// Creates a pending completion.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::new()),
        }
    }

    /// Creates a source that is already completed with `value`.
    #[must_use]
    pub fn completed(value: T) -> Self {
        let source = Self::new();
        source.shared.try_complete(value);
        source
    }

    /// Returns a handle observing this completion.
    #[must_use]
    pub fn completion(&self) -> Completion<T> {
        Completion {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Attempts to complete with `value`.
    ///
    /// Returns `true` if this call set the value. Later attempts return
    /// `false` and drop their value.
    pub fn try_complete(&self, value: T) -> bool {
        self.shared.try_complete(value)
    }

    /// Returns `true` once a value has been set.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.shared.is_complete()
    }
}

impl<T> Default for CompletionSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CompletionSource<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for CompletionSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSource")
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Observing handle for a one-shot completion.
///
/// Awaiting a `Completion` yields a clone of the value; clone the handle
/// first if it is still needed afterwards.
pub struct Completion<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Completion<T> {
    /// Returns `true` once a value has been set.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.shared.is_complete()
    }

    /// Returns the value if completed.
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        if self.is_completed() {
            self.shared.value.get()
        } else {
            None
        }
    }

    /// Blocks the calling thread until the completion is set.
    pub fn wait(&self) -> &T {
        let mut guard = self.shared.lock_waiters();
        while !self.shared.is_complete() {
            guard = match self.shared.cvar.wait(guard) {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        drop(guard);
        self.completed_value()
    }

    /// Blocks until the completion is set or `timeout` elapses.
    ///
    /// Returns `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<&T> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.shared.lock_waiters();
        while !self.shared.is_complete() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            guard = match self.shared.cvar.wait_timeout(guard, deadline - now) {
                Ok((g, _)) => g,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        drop(guard);
        Some(self.completed_value())
    }

    /// Returns `true` if both handles observe the same completion.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn completed_value(&self) -> &T {
        match self.shared.value.get() {
            Some(value) => value,
            None => unreachable!("completion marked complete without a value"),
        }
    }

    fn register_waker(&self, waker: &Waker) {
        let mut waiters = self.shared.lock_waiters();
        if !waiters.iter().any(|w| w.will_wake(waker)) {
            waiters.push(waker.clone());
        }
    }
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone> Future for Completion<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        if let Some(value) = self.get() {
            return Poll::Ready(value.clone());
        }
        self.register_waker(cx.waker());
        // Double-check after registering.
        match self.get() {
            Some(value) => Poll::Ready(value.clone()),
            None => Poll::Pending,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Completion");
        match self.get() {
            Some(v) => d.field("value", v),
            None => d.field("value", &format_args!("<pending>")),
        };
        d.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::AtomicUsize;
    use std::task::Wake;
    use std::thread;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn first_completion_wins() {
        init_test("first_completion_wins");
        let source = CompletionSource::new();
        let completion = source.completion();
        assert!(!completion.is_completed());
        assert!(source.try_complete(1));
        assert!(!source.try_complete(2));
        assert_eq!(completion.get(), Some(&1));
        crate::test_complete!("first_completion_wins");
    }

    #[test]
    fn completed_source_is_ready() {
        init_test("completed_source_is_ready");
        let source = CompletionSource::completed("done");
        assert!(source.is_completed());
        assert_eq!(source.completion().get(), Some(&"done"));
        crate::test_complete!("completed_source_is_ready");
    }

    #[test]
    fn wait_blocks_until_completed() {
        init_test("wait_blocks_until_completed");
        let source = CompletionSource::new();
        let completion = source.completion();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            source.try_complete(42)
        });
        assert_eq!(*completion.wait(), 42);
        assert!(handle.join().expect("thread panicked"));
        crate::test_complete!("wait_blocks_until_completed");
    }

    #[test]
    fn wait_timeout_expires() {
        init_test("wait_timeout_expires");
        let source: CompletionSource<u8> = CompletionSource::new();
        let completion = source.completion();
        assert!(completion.wait_timeout(Duration::from_millis(10)).is_none());
        source.try_complete(3);
        assert_eq!(completion.wait_timeout(Duration::from_millis(10)), Some(&3));
        crate::test_complete!("wait_timeout_expires");
    }

    #[test]
    fn poll_registers_waker_and_wakes_once() {
        init_test("poll_registers_waker_and_wakes_once");
        let source = CompletionSource::new();
        let mut completion = source.completion();
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counter));
        let mut cx = Context::from_waker(&waker);

        assert!(Pin::new(&mut completion).poll(&mut cx).is_pending());
        assert!(Pin::new(&mut completion).poll(&mut cx).is_pending());
        source.try_complete(7);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(Pin::new(&mut completion).poll(&mut cx), Poll::Ready(7));
        crate::test_complete!("poll_registers_waker_and_wakes_once");
    }

    #[test]
    fn racing_completers_set_value_once() {
        init_test("racing_completers_set_value_once");
        let source = CompletionSource::new();
        let winners = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let source = source.clone();
                let winners = Arc::clone(&winners);
                thread::spawn(move || {
                    if source.try_complete(i) {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread panicked");
        }
        let won = winners.load(Ordering::SeqCst);
        crate::assert_with_log!(won == 1, "winning completions", 1usize, won);
        assert!(source.completion().get().is_some());
        crate::test_complete!("racing_completers_set_value_once");
    }
}
