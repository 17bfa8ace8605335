//! At-most-once release actions.
//!
//! [`SingleFire`] holds a release action that runs at most once, no matter
//! how many threads race to release it. The first caller wins an atomic
//! claim and runs the action; every later caller observes the claim and
//! does nothing.
//!
//! [`ReleaseGuard`] is the scoped form: the action runs on explicit release
//! or on drop, whichever comes first.
//!
//! A losing claim is how callers detect "released twice". The guard itself
//! never fails; it is up to the owner to decide whether a second attempt is
//! a protocol violation.

use std::fmt;
use std::sync::atomic::Ordering;

use super::atomic::AtomicBool;

use parking_lot::Mutex;

/// Boxed release action.
pub type ReleaseAction = Box<dyn FnOnce() + Send + 'static>;

/// A release action that executes at most once.
///
/// # Example
///
/// ```
/// use appverify::sync::SingleFire;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let count = AtomicUsize::new(0);
/// let guard = SingleFire::new(|| {
///     count.fetch_add(1, Ordering::SeqCst);
/// });
/// assert!(guard.try_fire());
/// assert!(!guard.try_fire());
/// assert_eq!(count.load(Ordering::SeqCst), 1);
/// ```
pub struct SingleFire<F = ReleaseAction> {
    /// Set by the first caller to claim the slot.
    claimed: AtomicBool,
    /// Pending action; emptied by the winning claim.
    action: Mutex<Option<F>>,
}

impl<F: FnOnce()> SingleFire<F> {
    /// Creates a guard holding a pending action.
    #[must_use]
    pub fn new(action: F) -> Self {
        Self {
            claimed: AtomicBool::new(false),
            action: Mutex::new(Some(action)),
        }
    }

    /// Attempts to claim the slot and run the action.
    ///
    /// Returns `true` for exactly one caller: the one whose claim moved the
    /// slot from pending to empty. That caller has run the action by the
    /// time this returns.
    pub fn try_fire(&self) -> bool {
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!("single-fire claim lost");
            return false;
        }

        let action = self.action.lock().take();
        if let Some(action) = action {
            action();
        }
        tracing::trace!("single-fire action executed");
        true
    }

    /// Releases the guard. Repeated calls are no-ops.
    pub fn release(&self) {
        let _ = self.try_fire();
    }
}

impl<F> SingleFire<F> {
    /// Creates a guard whose slot starts empty; every claim fails.
    #[must_use]
    pub fn fired() -> Self {
        Self {
            claimed: AtomicBool::new(true),
            action: Mutex::new(None),
        }
    }

    /// Returns `true` once the slot has been claimed.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

/// A [`SingleFire`] with no action, used purely as a one-time claim.
pub type Claim = SingleFire<fn()>;

impl Claim {
    /// Creates an unclaimed one-time claim.
    #[must_use]
    pub fn unclaimed() -> Self {
        fn noop() {}
        Self::new(noop as fn())
    }
}

impl<F> fmt::Debug for SingleFire<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFire")
            .field("fired", &self.is_fired())
            .finish()
    }
}

/// Scoped release: runs its action exactly once, on [`release`](Self::release)
/// or on drop.
#[must_use = "dropping a ReleaseGuard runs its release action immediately"]
pub struct ReleaseGuard<F: FnOnce() = ReleaseAction> {
    inner: SingleFire<F>,
}

impl<F: FnOnce()> ReleaseGuard<F> {
    /// Creates a guard that will run `action` when released or dropped.
    pub fn new(action: F) -> Self {
        Self {
            inner: SingleFire::new(action),
        }
    }

    /// Runs the release action if it has not run yet.
    ///
    /// Returns `true` if this call ran it.
    pub fn release(&self) -> bool {
        self.inner.try_fire()
    }

    /// Returns `true` once the action has run.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.inner.is_fired()
    }
}

impl<F: FnOnce()> Drop for ReleaseGuard<F> {
    fn drop(&mut self) {
        self.inner.release();
    }
}

impl<F: FnOnce()> fmt::Debug for ReleaseGuard<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseGuard")
            .field("released", &self.is_released())
            .finish()
    }
}
