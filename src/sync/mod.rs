//! Exactly-once coordination primitives.
//!
//! # Primitives
//!
//! - [`SingleFire`]: release action that runs at most once under any contention
//! - [`ReleaseGuard`]: scoped form of [`SingleFire`], released on drop
//! - [`CompletionSource`] / [`Completion`]: one-shot shared completion signal
//! - [`CompletionLatch`]: countdown that completes a shared signal at zero
//!
//! # Exactly-Once Pattern
//!
//! Every primitive here resolves a "who acts first" race with a single
//! compare-and-swap claim:
//!
//! - The first claimant performs the effect (runs the action, sets the value).
//! - Every other claimant, including ones racing the first, observes the
//!   claim and does nothing.
//!
//! None of the claim paths block, so they may run on callback threads that
//! must not stall.

mod completion;
mod latch;
mod single_fire;

/// Atomics behind the single-fire claim and the latch count; swapped for
/// loom's under `--cfg loom` so the model checker drives the real types.
mod atomic {
    #[cfg(loom)]
    pub(crate) use loom::sync::atomic::{AtomicBool, AtomicUsize};
    #[cfg(not(loom))]
    pub(crate) use std::sync::atomic::{AtomicBool, AtomicUsize};
}

pub use completion::{Completion, CompletionSource};
pub use latch::CompletionLatch;
pub use single_fire::{Claim, ReleaseAction, ReleaseGuard, SingleFire};
