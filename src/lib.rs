//! appverify: runtime verification for begin/callback asynchronous operations.
//!
//! # Overview
//!
//! Legacy asynchronous APIs start work through a *begin handler* that
//! promises to invoke a completion callback exactly once, synchronously or
//! asynchronously, with a result token. Nothing in that contract checks
//! itself. This crate wraps each operation in an explicit state machine that
//! detects every way the contract can be broken, and provides the
//! coordination primitives needed to wait on many such operations.
//!
//! # Core Guarantees
//!
//! - **One code per checkpoint**: every violation maps to exactly one [`ErrorCode`]
//! - **Exactly-once release**: [`SingleFire`] and [`ReleaseGuard`] run their action once under any contention
//! - **Exactly-once signalling**: a [`CompletionLatch`] signals once, on the decrement that reaches zero
//! - **Abandon the wait, not the work**: [`within`] ends a wait on scope cancellation and leaves the operation running
//!
//! # Module Structure
//!
//! - [`error`]: Error taxonomy and fault types
//! - [`sync`]: Single-fire release, one-shot completion, completion latch
//! - [`cancel`]: Cancellation tokens for bounding waits
//! - [`combinator`]: Scope-bound waiting and fault propagation
//! - [`verifier`]: Operation state machine, host boundary, sinks, facade
//! - [`config`]: Configuration from code, environment and TOML
//! - [`test_utils`]: Logging and assertion helpers for tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod cancel;
pub mod combinator;
pub mod config;
pub mod error;
pub mod sync;
pub mod test_utils;
pub mod verifier;

// Re-exports for convenient access to core types
pub use cancel::{CancelKind, CancelReason, CancelToken};
pub use combinator::{within, Abandoned, FaultPropagating, Within};
pub use config::{ConfigError, FaultBehavior, VerifierConfig};
pub use error::{BeginError, ErrorCategory, ErrorCode, HandlerError, VerifierFault};
pub use sync::{Completion, CompletionLatch, CompletionSource, ReleaseGuard, SingleFire};
pub use verifier::{
    AsyncResult, FaultSink, HostContext, OperationState, OperationVerifier, RecordingSink,
    RequestHost, ResultToken, SyncContext, Verifier,
};
