//! Host request/execution context boundary.
//!
//! The verifier consumes a host context through [`HostContext`]: a nullable
//! identity, a reentrant enter/leave pair and a "request completed" flag.
//! [`RequestHost`] is a ready-made implementation for hosts that do not
//! bring their own.
//!
//! A [`RequestHost`] also carries the request's [`CancelToken`]: completing
//! the request cancels it, which ends every wait bound to the request
//! without touching the operations being waited on.
//!
//! Context identity is reference identity. Every context instance receives a
//! fresh [`ContextId`] from a process-wide counter; ids are never reused, so
//! two distinct contexts never compare equal even if their contents match.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cancel::{CancelReason, CancelToken};
use crate::sync::{ReleaseAction, ReleaseGuard};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one context instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    /// Allocates an id that no other context has or will have.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// The host context an operation runs under.
pub trait HostContext: Send + Sync {
    /// Returns the context currently attached to the host, if any.
    ///
    /// Must never fail. `None` means no context is attached.
    fn context_id(&self) -> Option<ContextId>;

    /// Enters the context. The returned lock leaves it exactly once.
    fn enter(&self) -> ContextLock;

    /// Returns `true` once the request this context serves has completed.
    fn is_request_completed(&self) -> bool;
}

/// A held context entry.
///
/// Leaving happens on [`leave`](Self::leave) or on drop, whichever comes
/// first, and never twice.
#[must_use = "dropping a ContextLock leaves the context immediately"]
pub struct ContextLock {
    guard: ReleaseGuard<ReleaseAction>,
}

impl ContextLock {
    /// Creates a lock whose leave action is `leave`.
    pub fn new(leave: impl FnOnce() + Send + 'static) -> Self {
        Self {
            guard: ReleaseGuard::new(Box::new(leave)),
        }
    }

    /// Leaves the context. Returns `false` if it was already left.
    pub fn leave(&self) -> bool {
        self.guard.release()
    }

    /// Returns `true` once the context has been left.
    #[must_use]
    pub fn is_left(&self) -> bool {
        self.guard.is_released()
    }
}

impl fmt::Debug for ContextLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextLock")
            .field("left", &self.is_left())
            .finish()
    }
}

/// A simple host context with reassignable identity.
#[derive(Debug)]
pub struct RequestHost {
    current: Mutex<Option<ContextId>>,
    depth: Arc<AtomicUsize>,
    completed: AtomicBool,
    scope: CancelToken,
}

impl RequestHost {
    /// Creates a host with a freshly assigned context.
    #[must_use]
    pub fn new() -> Self {
        Self::with_context(Some(ContextId::next()))
    }

    /// Creates a host with no context attached.
    #[must_use]
    pub fn detached() -> Self {
        Self::with_context(None)
    }

    fn with_context(current: Option<ContextId>) -> Self {
        Self {
            current: Mutex::new(current),
            depth: Arc::new(AtomicUsize::new(0)),
            completed: AtomicBool::new(false),
            scope: CancelToken::new(),
        }
    }

    /// Attaches a new context, replacing the current one.
    pub fn reassign(&self) -> ContextId {
        let id = ContextId::next();
        let previous = self.current.lock().replace(id);
        tracing::debug!(?previous, current = %id, "host context reassigned");
        id
    }

    /// Detaches the current context.
    pub fn release(&self) {
        let previous = self.current.lock().take();
        tracing::debug!(?previous, "host context released");
    }

    /// Marks the request as completed and cancels its scope.
    pub fn complete_request(&self) {
        self.completed.store(true, Ordering::Release);
        if self.scope.cancel(&CancelReason::request_completed()) {
            tracing::debug!(context = ?self.context_id(), "request completed");
        }
    }

    /// Returns the token that is cancelled when the request completes.
    ///
    /// Bind waits on operations to it with
    /// [`FaultPropagating::within`](crate::combinator::FaultPropagating::within).
    #[must_use]
    pub fn scope(&self) -> CancelToken {
        self.scope.clone()
    }

    /// Returns the current enter nesting depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }
}

impl Default for RequestHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostContext for RequestHost {
    fn context_id(&self) -> Option<ContextId> {
        *self.current.lock()
    }

    fn enter(&self) -> ContextLock {
        let depth = self.depth.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::trace!(depth, "host context entered");
        let counter = Arc::clone(&self.depth);
        ContextLock::new(move || {
            let depth = counter.fetch_sub(1, Ordering::AcqRel) - 1;
            tracing::trace!(depth, "host context left");
        })
    }

    fn is_request_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }
}
