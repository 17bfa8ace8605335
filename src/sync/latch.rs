//! Completion-counting latch.
//!
//! A [`CompletionLatch`] tracks a number of pending operations and completes
//! a shared one-shot signal exactly once, when the pending count reaches
//! zero. Increments and decrements are single atomic operations and never
//! block, so they are safe to call from a callback thread.
//!
//! Every decrement that lands on zero attempts to set the signal; only the
//! first attempt has any effect. The latch is one-shot: marking new work
//! pending after the signal fired does not reset it.
//!
//! Decrementing below zero means more completions than registrations. That
//! is a bug in the caller, not a recoverable condition, and it panics.

use std::fmt;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::atomic::AtomicUsize;
use super::completion::{Completion, CompletionSource};

/// Countdown primitive that signals once all pending operations complete.
///
/// # Example
///
/// ```
/// use appverify::sync::CompletionLatch;
///
/// let latch = CompletionLatch::new(2);
/// assert!(!latch.mark_completed());
/// assert!(latch.mark_completed());
/// assert!(latch.is_completed());
/// ```
pub struct CompletionLatch {
    pending: AtomicUsize,
    signal: CompletionSource<()>,
}

impl CompletionLatch {
    /// Creates a latch expecting `initial` completions.
    ///
    /// A latch created with `0` starts completed.
    #[must_use]
    pub fn new(initial: usize) -> Self {
        let signal = if initial == 0 {
            CompletionSource::completed(())
        } else {
            CompletionSource::new()
        };
        Self {
            pending: AtomicUsize::new(initial),
            signal,
        }
    }

    /// Registers one more pending operation.
    pub fn mark_pending(&self) {
        self.mark_pending_by(1);
    }

    /// Registers `delta` more pending operations.
    pub fn mark_pending_by(&self, delta: usize) {
        let previous = self.pending.fetch_add(delta, Ordering::AcqRel);
        if self.signal.is_completed() {
            tracing::warn!(
                previous,
                delta,
                "operation marked pending on a latch that already completed"
            );
        } else {
            tracing::trace!(pending = previous + delta, "latch mark pending");
        }
    }

    /// Records one completed operation.
    ///
    /// Returns `true` if this call completed the latch's signal.
    ///
    /// # Panics
    ///
    /// Panics if there is no pending operation to complete.
    pub fn mark_completed(&self) -> bool {
        self.mark_completed_by(1)
    }

    /// Records `delta` completed operations.
    ///
    /// Returns `true` if this call completed the latch's signal.
    ///
    /// # Panics
    ///
    /// Panics if `delta` exceeds the pending count.
    pub fn mark_completed_by(&self, delta: usize) -> bool {
        let previous = match self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(delta)
            }) {
            Ok(previous) => previous,
            Err(current) => panic!(
                "completion latch underflow: {delta} completion(s) with only {current} pending"
            ),
        };

        let remaining = previous - delta;
        tracing::trace!(remaining, "latch mark completed");
        if remaining != 0 {
            return false;
        }

        let fired = self.signal.try_complete(());
        if fired {
            tracing::debug!("latch reached zero, completion signalled");
        }
        fired
    }

    /// Returns the current number of pending operations.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Returns `true` once the signal has been set.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.signal.is_completed()
    }

    /// Returns the shared completion signal.
    #[must_use]
    pub fn completion(&self) -> Completion<()> {
        self.signal.completion()
    }

    /// Blocks until the latch completes.
    pub fn wait(&self) {
        self.signal.completion().wait();
    }

    /// Blocks until the latch completes or `timeout` elapses.
    ///
    /// Returns `true` if the latch completed.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.signal.completion().wait_timeout(timeout).is_some()
    }
}

impl fmt::Debug for CompletionLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionLatch")
            .field("pending", &self.pending())
            .field("completed", &self.is_completed())
            .finish()
    }
}
