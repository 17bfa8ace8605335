//! The begin/callback result-token protocol.
//!
//! A begin handler returns a result token; the callback later receives a
//! token too. The verifier only ever compares tokens and their state by
//! reference identity, never by value.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::HandlerError;

/// Opaque caller state threaded from `start` to the result token.
pub type AsyncState = Option<Arc<dyn Any + Send + Sync>>;

/// Completion status reported by a result token.
pub trait AsyncResult: Send + Sync {
    /// Returns `true` once the operation has finished.
    fn is_completed(&self) -> bool;

    /// Returns `true` if the operation finished within the begin call.
    fn completed_synchronously(&self) -> bool;

    /// Returns the state supplied when the operation was started.
    fn async_state(&self) -> AsyncState;
}

/// Shared handle to a result token.
pub type ResultRef = Arc<dyn AsyncResult>;

/// Callback handed to a begin handler. `None` models a null token.
pub type AsyncCallback = Arc<dyn Fn(Option<ResultRef>) + Send + Sync>;

/// Callback invoked once a completion has been validated.
pub type CompletionCallback = Arc<dyn Fn(ResultRef) + Send + Sync>;

/// What a begin handler returns. `Ok(None)` models a null token and
/// `Err` a handler that threw.
pub type BeginResult = Result<Option<ResultRef>, HandlerError>;

/// Returns `true` if both handles refer to the same token instance.
#[must_use]
pub fn same_result(a: &ResultRef, b: &ResultRef) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

/// Returns `true` if both states are absent or refer to the same object.
#[must_use]
pub fn same_state(a: &AsyncState, b: &AsyncState) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
        }
        _ => false,
    }
}

/// A plain, thread-safe result token.
///
/// Flags are published with release/acquire ordering so a token completed on
/// one thread is observed as completed on the callback thread.
pub struct ResultToken {
    state: AsyncState,
    completed: AtomicBool,
    completed_synchronously: AtomicBool,
}

impl ResultToken {
    /// Creates a pending token carrying `state`.
    #[must_use]
    pub fn new(state: AsyncState) -> Arc<Self> {
        Arc::new(Self {
            state,
            completed: AtomicBool::new(false),
            completed_synchronously: AtomicBool::new(false),
        })
    }

    /// Creates a token that is already completed.
    #[must_use]
    pub fn completed(state: AsyncState, synchronously: bool) -> Arc<Self> {
        Arc::new(Self {
            state,
            completed: AtomicBool::new(true),
            completed_synchronously: AtomicBool::new(synchronously),
        })
    }

    /// Marks the token completed.
    pub fn complete(&self, synchronously: bool) {
        self.completed_synchronously
            .store(synchronously, Ordering::Release);
        self.completed.store(true, Ordering::Release);
    }
}

impl AsyncResult for ResultToken {
    fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    fn completed_synchronously(&self) -> bool {
        self.completed_synchronously.load(Ordering::Acquire)
    }

    fn async_state(&self) -> AsyncState {
        self.state.clone()
    }
}

impl fmt::Debug for ResultToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultToken")
            .field("completed", &self.is_completed())
            .field("completed_synchronously", &self.completed_synchronously())
            .field("has_state", &self.state.is_some())
            .finish()
    }
}
