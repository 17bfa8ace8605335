//! External cancellation scopes.
//!
//! A [`CancelToken`] represents a lifetime that a wait can be bound to, such
//! as the request a [`RequestHost`](crate::verifier::RequestHost) serves.
//! When the token is cancelled, waits bound to it are abandoned; the
//! operations being waited on are left running.

pub mod reason;
pub mod token;

pub use reason::{CancelKind, CancelReason};
pub use token::{CancelToken, Cancelled};
