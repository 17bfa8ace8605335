//! Scope-bound waiting and fault propagation.
//!
//! [`Within`] races an operation against a [`CancelToken`]. If the token is
//! cancelled first, the wait is abandoned with [`Abandoned`]; the operation
//! itself is not touched and keeps running, so its outcome can still be
//! inspected later through another handle.
//!
//! The operation is polled before the token, so an operation that is already
//! finished when the token fires is still observed. Callers must not rely on
//! that ordering when both become ready at the same time from different
//! threads.
//!
//! [`FaultPropagating`] adapts a [`Completion`] carrying a `Result` so that a
//! synchronous caller can re-raise the operation's fault with `?`, exactly as
//! an `.await` on it would.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::cancel::{CancelReason, CancelToken};
use crate::sync::Completion;

/// The wait was abandoned because its scope ended first.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("wait abandoned: {reason}")]
pub struct Abandoned {
    /// Why the scope ended.
    pub reason: CancelReason,
}

/// Future returned by [`within`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Within<'a, F> {
    fut: F,
    token: &'a CancelToken,
}

impl<F: Future + Unpin> Future for Within<'_, F> {
    type Output = Result<F::Output, Abandoned>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        if let Poll::Ready(value) = Pin::new(&mut this.fut).poll(cx) {
            return Poll::Ready(Ok(value));
        }

        if this.token.register_waker(cx.waker()) {
            return Poll::Pending;
        }

        let reason = this.token.reason().unwrap_or_default();
        tracing::debug!(
            token_id = this.token.token_id(),
            %reason,
            "scope ended before operation finished, abandoning wait"
        );
        Poll::Ready(Err(Abandoned { reason }))
    }
}

/// Bounds the wait on `fut` to the lifetime of `token`.
pub fn within<F>(fut: F, token: &CancelToken) -> Within<'_, F>
where
    F: Future + Unpin,
{
    Within { fut, token }
}

/// Fault propagation for completed or pending operation outcomes.
pub trait FaultPropagating<T, E> {
    /// Re-raises the operation's fault, or returns its value.
    ///
    /// # Panics
    ///
    /// Panics if the operation has not finished. Callers must establish
    /// completion first.
    fn resolve(&self) -> Result<T, E>;

    /// Waits for the operation, abandoning the wait if `token` is cancelled.
    fn within<'a>(&self, token: &'a CancelToken) -> Within<'a, Completion<Result<T, E>>>;

    /// Blocking form of [`within`](Self::within).
    ///
    /// Returns `Err(Abandoned)` if the scope ends first; otherwise the
    /// operation's own result, fault included.
    fn wait_within(&self, token: &CancelToken) -> Result<Result<T, E>, Abandoned>;
}

impl<T: Clone, E: Clone> FaultPropagating<T, E> for Completion<Result<T, E>> {
    fn resolve(&self) -> Result<T, E> {
        match self.get() {
            Some(outcome) => outcome.clone(),
            None => panic!("resolve called on an operation that has not finished"),
        }
    }

    fn within<'a>(&self, token: &'a CancelToken) -> Within<'a, Completion<Result<T, E>>> {
        within(self.clone(), token)
    }

    fn wait_within(&self, token: &CancelToken) -> Result<Result<T, E>, Abandoned> {
        futures_lite::future::block_on(FaultPropagating::within(self, token))
    }
}
