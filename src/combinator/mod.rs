//! Combinators over finished and in-flight operations.
//!
//! - [`within`](mod@within): bound a wait to a [`CancelToken`](crate::cancel::CancelToken)
//!   and re-raise an operation's fault at a synchronous call site

pub mod within;

pub use within::{within, Abandoned, FaultPropagating, Within};
