//! Cancellation token bounding a wait to an external lifetime.
//!
//! A [`CancelToken`] is a cheap, cloneable handle to shared cancellation
//! state. Cancelling is a one-way, first-caller-wins transition: the first
//! [`cancel`](CancelToken::cancel) records the reason and wakes every task
//! waiting on the token.
//!
//! Cancelling a token never touches the work being waited on; it only ends
//! the waits bound to it.

use core::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use super::reason::CancelReason;

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

struct CancelTokenState {
    token_id: u64,
    /// Set once, by the winning `cancel`.
    reason: OnceLock<CancelReason>,
    wakers: Mutex<Vec<Waker>>,
}

/// A cancellation token for a waiting scope.
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<CancelTokenState>,
}

impl CancelToken {
    /// Creates a new, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(CancelTokenState {
                token_id: NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed),
                reason: OnceLock::new(),
                wakers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns the token ID.
    #[must_use]
    pub fn token_id(&self) -> u64 {
        self.state.token_id
    }

    /// Returns true if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.reason.get().is_some()
    }

    /// Returns the cancellation reason, if cancelled.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.state.reason.get().cloned()
    }

    /// Requests cancellation with the given reason.
    ///
    /// Returns true if this call triggered the cancellation (first caller wins).
    #[allow(clippy::must_use_candidate)]
    pub fn cancel(&self, reason: &CancelReason) -> bool {
        if self.state.reason.set(reason.clone()).is_err() {
            return false;
        }
        tracing::debug!(token_id = self.state.token_id, %reason, "cancel token cancelled");

        // Taken after the reason is visible: a waker registered later sees
        // the token cancelled and is never stored.
        let wakers = std::mem::take(&mut *self.state.wakers.lock());
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// Returns a future that resolves with the reason once cancelled.
    #[must_use]
    pub fn cancelled(&self) -> Cancelled<'_> {
        Cancelled { token: self }
    }

    /// Registers `waker` to be woken on cancellation.
    ///
    /// Returns `false` if the token is already cancelled, in which case the
    /// waker was not stored.
    pub(crate) fn register_waker(&self, waker: &Waker) -> bool {
        let mut wakers = self.state.wakers.lock();
        if self.is_cancelled() {
            return false;
        }
        if !wakers.iter().any(|w| w.will_wake(waker)) {
            wakers.push(waker.clone());
        }
        true
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("token_id", &self.state.token_id)
            .field("reason", &self.state.reason.get())
            .finish()
    }
}

/// Future returned by [`CancelToken::cancelled`].
#[derive(Debug)]
pub struct Cancelled<'a> {
    token: &'a CancelToken,
}

impl Future for Cancelled<'_> {
    type Output = CancelReason;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<CancelReason> {
        if self.token.register_waker(cx.waker()) {
            return Poll::Pending;
        }
        Poll::Ready(self.token.reason().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelKind;
    use crate::test_utils::init_test_logging;
    use std::thread;
    use std::time::Duration;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn first_cancel_wins() {
        init_test("first_cancel_wins");
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.cancel(&CancelReason::request_completed()));
        assert!(!token.cancel(&CancelReason::user("too late")));
        assert_eq!(
            token.reason().map(|r| r.kind),
            Some(CancelKind::RequestCompleted)
        );
        crate::test_complete!("first_cancel_wins");
    }

    #[test]
    fn clones_share_state() {
        init_test("clones_share_state");
        let token = CancelToken::new();
        let other = token.clone();
        assert_eq!(token.token_id(), other.token_id());
        other.cancel(&CancelReason::user("stop"));
        assert!(token.is_cancelled());
        assert_ne!(CancelToken::new().token_id(), token.token_id());
        crate::test_complete!("clones_share_state");
    }

    #[test]
    fn cancelled_future_resolves_from_other_thread() {
        init_test("cancelled_future_resolves_from_other_thread");
        let token = CancelToken::new();
        let remote = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel(&CancelReason::request_completed());
        });
        let reason = futures_lite::future::block_on(token.cancelled());
        assert_eq!(reason.kind, CancelKind::RequestCompleted);
        handle.join().expect("thread panicked");
        crate::test_complete!("cancelled_future_resolves_from_other_thread");
    }
}
