//! Error types for the verifier.
//!
//! Two families of failure live here and they never mix:
//!
//! - **Protocol faults** ([`VerifierFault`]): the code driving a begin/callback
//!   operation broke the contract. Every fault carries exactly one
//!   [`ErrorCode`], and every code is raised from exactly one checkpoint in
//!   the verifier.
//! - **Handler failures** ([`BeginError::Handler`]): the begin handler failed
//!   on its own without violating the protocol. These propagate to the caller
//!   unchanged.
//!
//! Programming errors in this crate's own primitives (a latch decremented
//! below zero, resolving an unfinished completion) are not errors at all:
//! they panic.
//!
//! Faults are in-process diagnostics. They are deliberately not serializable
//! and the set of codes may grow between versions.

use core::fmt;

/// A protocol violation detected by the verifier.
///
/// Each variant corresponds to a single detection point; see
/// [`ErrorCode::description`] for the condition it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // === Begin handler preconditions ===
    /// No begin handler was supplied.
    BeginHandlerDelegateWasNull,
    /// No owning host/request context was supplied.
    HttpApplicationInstanceWasNull,

    // === Callback invocation ===
    /// The completion callback fired more than once.
    AsyncCallbackInvokedMultipleTimes,
    /// The completion callback fired without a result token.
    AsyncCallbackInvokedWithNullParameter,
    /// The callback received a result token still reporting `is_completed == false`.
    AsyncCallbackGivenAsyncResultWhichWasNotCompleted,
    /// The callback fired inside the begin frame but the token claims asynchronous completion.
    AsyncCallbackInvokedSynchronouslyButAsyncResultWasNotMarkedCompletedSynchronously,
    /// The callback fired outside the begin frame but the token claims synchronous completion.
    AsyncCallbackInvokedAsynchronouslyButAsyncResultWasMarkedCompletedSynchronously,
    /// The callback received a token other than the one the begin handler returned.
    AsyncCallbackInvokedWithUnexpectedAsyncResultInstance,
    /// The callback received a token carrying state other than the state supplied at start.
    AsyncCallbackInvokedWithUnexpectedAsyncResultAsyncState,
    /// The callback fired after the owning context was reassigned.
    AsyncCallbackCalledAfterHttpApplicationReassigned,

    // === Begin handler / callback ordering ===
    /// The callback fired asynchronously, then the begin handler failed.
    AsyncCallbackInvokedAsynchronouslyThenBeginHandlerThrew,
    /// The begin handler failed, then the callback fired anyway.
    BeginHandlerThrewThenAsyncCallbackInvokedAsynchronously,
    /// The callback fired synchronously, then the begin handler failed.
    AsyncCallbackInvokedSynchronouslyThenBeginHandlerThrew,

    // === Begin handler return value ===
    /// The begin handler returned no result token.
    BeginHandlerReturnedNull,
    /// The begin handler returned a token other than the one passed to the callback.
    BeginHandlerReturnedUnexpectedAsyncResultInstance,
    /// The begin handler returned a token carrying state other than the state supplied at start.
    BeginHandlerReturnedUnexpectedAsyncResultAsyncState,
    /// The returned token claims synchronous completion but is not completed.
    BeginHandlerReturnedAsyncResultMarkedCompletedSynchronouslyButWhichWasNotCompleted,
    /// The returned token claims synchronous completion but the callback never fired.
    BeginHandlerReturnedAsyncResultMarkedCompletedSynchronouslyButAsyncCallbackNeverCalled,

    // === Synchronization context ===
    /// Send/post through the synchronization context after the request completed.
    SyncContextSendOrPostCalledAfterRequestCompleted,
}

impl ErrorCode {
    /// Every code, in declaration order.
    pub const ALL: [Self; 19] = [
        Self::BeginHandlerDelegateWasNull,
        Self::HttpApplicationInstanceWasNull,
        Self::AsyncCallbackInvokedMultipleTimes,
        Self::AsyncCallbackInvokedWithNullParameter,
        Self::AsyncCallbackGivenAsyncResultWhichWasNotCompleted,
        Self::AsyncCallbackInvokedSynchronouslyButAsyncResultWasNotMarkedCompletedSynchronously,
        Self::AsyncCallbackInvokedAsynchronouslyButAsyncResultWasMarkedCompletedSynchronously,
        Self::AsyncCallbackInvokedWithUnexpectedAsyncResultInstance,
        Self::AsyncCallbackInvokedWithUnexpectedAsyncResultAsyncState,
        Self::AsyncCallbackCalledAfterHttpApplicationReassigned,
        Self::AsyncCallbackInvokedAsynchronouslyThenBeginHandlerThrew,
        Self::BeginHandlerThrewThenAsyncCallbackInvokedAsynchronously,
        Self::AsyncCallbackInvokedSynchronouslyThenBeginHandlerThrew,
        Self::BeginHandlerReturnedNull,
        Self::BeginHandlerReturnedUnexpectedAsyncResultInstance,
        Self::BeginHandlerReturnedUnexpectedAsyncResultAsyncState,
        Self::BeginHandlerReturnedAsyncResultMarkedCompletedSynchronouslyButWhichWasNotCompleted,
        Self::BeginHandlerReturnedAsyncResultMarkedCompletedSynchronouslyButAsyncCallbackNeverCalled,
        Self::SyncContextSendOrPostCalledAfterRequestCompleted,
    ];

    /// Returns the checkpoint family this code is raised from.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::BeginHandlerDelegateWasNull
            | Self::BeginHandlerReturnedNull
            | Self::BeginHandlerReturnedUnexpectedAsyncResultInstance
            | Self::BeginHandlerReturnedUnexpectedAsyncResultAsyncState
            | Self::BeginHandlerReturnedAsyncResultMarkedCompletedSynchronouslyButWhichWasNotCompleted
            | Self::BeginHandlerReturnedAsyncResultMarkedCompletedSynchronouslyButAsyncCallbackNeverCalled
            | Self::AsyncCallbackInvokedAsynchronouslyThenBeginHandlerThrew
            | Self::AsyncCallbackInvokedSynchronouslyThenBeginHandlerThrew => {
                ErrorCategory::BeginHandler
            }
            Self::AsyncCallbackInvokedMultipleTimes
            | Self::AsyncCallbackInvokedWithNullParameter
            | Self::AsyncCallbackGivenAsyncResultWhichWasNotCompleted
            | Self::AsyncCallbackInvokedSynchronouslyButAsyncResultWasNotMarkedCompletedSynchronously
            | Self::AsyncCallbackInvokedAsynchronouslyButAsyncResultWasMarkedCompletedSynchronously
            | Self::AsyncCallbackInvokedWithUnexpectedAsyncResultInstance
            | Self::AsyncCallbackInvokedWithUnexpectedAsyncResultAsyncState
            | Self::BeginHandlerThrewThenAsyncCallbackInvokedAsynchronously => {
                ErrorCategory::Callback
            }
            Self::HttpApplicationInstanceWasNull
            | Self::AsyncCallbackCalledAfterHttpApplicationReassigned => ErrorCategory::Host,
            Self::SyncContextSendOrPostCalledAfterRequestCompleted => ErrorCategory::SyncContext,
        }
    }

    /// Returns a short human-readable description of the violated rule.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::BeginHandlerDelegateWasNull => "the begin handler was missing",
            Self::HttpApplicationInstanceWasNull => "the owning host context was missing",
            Self::AsyncCallbackInvokedMultipleTimes => {
                "the completion callback was invoked more than once"
            }
            Self::AsyncCallbackInvokedWithNullParameter => {
                "the completion callback was invoked without a result token"
            }
            Self::AsyncCallbackGivenAsyncResultWhichWasNotCompleted => {
                "the completion callback was given a result token that was not completed"
            }
            Self::AsyncCallbackInvokedSynchronouslyButAsyncResultWasNotMarkedCompletedSynchronously => {
                "the completion callback ran inside the begin handler but the result token \
                 was not marked completed synchronously"
            }
            Self::AsyncCallbackInvokedAsynchronouslyButAsyncResultWasMarkedCompletedSynchronously => {
                "the completion callback ran outside the begin handler but the result token \
                 was marked completed synchronously"
            }
            Self::AsyncCallbackInvokedWithUnexpectedAsyncResultInstance => {
                "the completion callback was given a different result token than the begin \
                 handler returned"
            }
            Self::AsyncCallbackInvokedWithUnexpectedAsyncResultAsyncState => {
                "the completion callback was given a result token carrying unexpected state"
            }
            Self::AsyncCallbackCalledAfterHttpApplicationReassigned => {
                "the completion callback ran after the owning context was reassigned"
            }
            Self::AsyncCallbackInvokedAsynchronouslyThenBeginHandlerThrew => {
                "the completion callback ran asynchronously and then the begin handler failed"
            }
            Self::BeginHandlerThrewThenAsyncCallbackInvokedAsynchronously => {
                "the begin handler failed and then the completion callback ran"
            }
            Self::AsyncCallbackInvokedSynchronouslyThenBeginHandlerThrew => {
                "the completion callback ran synchronously and then the begin handler failed"
            }
            Self::BeginHandlerReturnedNull => "the begin handler returned no result token",
            Self::BeginHandlerReturnedUnexpectedAsyncResultInstance => {
                "the begin handler returned a different result token than the completion \
                 callback received"
            }
            Self::BeginHandlerReturnedUnexpectedAsyncResultAsyncState => {
                "the begin handler returned a result token carrying unexpected state"
            }
            Self::BeginHandlerReturnedAsyncResultMarkedCompletedSynchronouslyButWhichWasNotCompleted => {
                "the begin handler returned a result token marked completed synchronously \
                 which was not completed"
            }
            Self::BeginHandlerReturnedAsyncResultMarkedCompletedSynchronouslyButAsyncCallbackNeverCalled => {
                "the begin handler returned a result token marked completed synchronously \
                 but never invoked the completion callback"
            }
            Self::SyncContextSendOrPostCalledAfterRequestCompleted => {
                "the synchronization context was used after the request completed"
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Checkpoint family an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Raised while the begin handler is invoked or when it returns.
    BeginHandler,
    /// Raised when the completion callback fires.
    Callback,
    /// Raised by the host/request context checks.
    Host,
    /// Raised by the synchronization context wrapper.
    SyncContext,
}

/// A detected protocol violation.
///
/// Constructed once at the checkpoint that detects the violation and raised
/// immediately. The message adds operation-specific detail to the code's
/// fixed description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierFault {
    code: ErrorCode,
    message: String,
}

impl VerifierFault {
    /// Creates a fault with the code's default description as its message.
    #[must_use]
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.description().to_owned(),
        }
    }

    /// Creates a fault with a custom message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Returns the violated checkpoint.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    /// Returns the diagnostic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the checkpoint family.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Display for VerifierFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for VerifierFault {}

/// Error produced by a begin handler that failed on its own.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error returned from a verified begin call.
#[derive(Debug, thiserror::Error)]
pub enum BeginError {
    /// The begin/callback protocol was violated.
    #[error(transparent)]
    Fault(#[from] VerifierFault),
    /// The begin handler failed without violating the protocol.
    #[error("begin handler failed: {0}")]
    Handler(#[source] HandlerError),
}

impl BeginError {
    /// Returns the fault if this error is a protocol violation.
    #[must_use]
    pub fn fault(&self) -> Option<&VerifierFault> {
        match self {
            Self::Fault(fault) => Some(fault),
            Self::Handler(_) => None,
        }
    }

    /// Returns the fault code if this error is a protocol violation.
    #[must_use]
    pub fn code(&self) -> Option<ErrorCode> {
        self.fault().map(VerifierFault::code)
    }
}

/// Result alias for verifier checkpoints.
pub type Result<T> = core::result::Result<T, VerifierFault>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::error::Error as _;

    #[derive(Debug)]
    struct Underlying;

    impl fmt::Display for Underlying {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "underlying")
        }
    }

    impl std::error::Error for Underlying {}

    #[test]
    fn display_uses_code_and_message() {
        let fault = VerifierFault::with_message(ErrorCode::BeginHandlerReturnedNull, "op 7");
        assert_eq!(fault.to_string(), "BeginHandlerReturnedNull: op 7");
    }

    #[test]
    fn default_message_is_description() {
        let fault = VerifierFault::new(ErrorCode::AsyncCallbackInvokedMultipleTimes);
        assert_eq!(
            fault.message(),
            ErrorCode::AsyncCallbackInvokedMultipleTimes.description()
        );
    }

    #[test]
    fn all_codes_are_distinct() {
        let unique: HashSet<_> = ErrorCode::ALL.iter().copied().collect();
        assert_eq!(unique.len(), ErrorCode::ALL.len());
        let descriptions: HashSet<_> = ErrorCode::ALL.iter().map(ErrorCode::description).collect();
        assert_eq!(descriptions.len(), ErrorCode::ALL.len());
    }

    #[test]
    fn categories_cover_each_family() {
        assert_eq!(
            ErrorCode::AsyncCallbackInvokedWithNullParameter.category(),
            ErrorCategory::Callback
        );
        assert_eq!(
            ErrorCode::BeginHandlerReturnedNull.category(),
            ErrorCategory::BeginHandler
        );
        assert_eq!(
            ErrorCode::AsyncCallbackCalledAfterHttpApplicationReassigned.category(),
            ErrorCategory::Host
        );
        assert_eq!(
            ErrorCode::SyncContextSendOrPostCalledAfterRequestCompleted.category(),
            ErrorCategory::SyncContext
        );
    }

    #[test]
    fn begin_error_exposes_fault() {
        let err: BeginError = VerifierFault::new(ErrorCode::BeginHandlerReturnedNull).into();
        assert_eq!(err.code(), Some(ErrorCode::BeginHandlerReturnedNull));

        let err = BeginError::Handler(Box::new(Underlying));
        assert!(err.fault().is_none());
        assert_eq!(err.to_string(), "begin handler failed: underlying");
        assert_eq!(err.source().expect("source").to_string(), "underlying");
    }
}
