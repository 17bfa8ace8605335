//! Why a scope stopped waiting.

use core::fmt;

/// What ended a waiting scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CancelKind {
    /// Cancelled explicitly by the caller.
    #[default]
    User,
    /// The request the scope belongs to completed.
    RequestCompleted,
}

impl CancelKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::RequestCompleted => "request completed",
        }
    }
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a scope was cancelled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelReason {
    /// What ended the scope.
    pub kind: CancelKind,
    /// Optional detail supplied by the canceller.
    pub message: Option<&'static str>,
}

impl CancelReason {
    /// Explicit cancellation with a short explanation.
    #[must_use]
    pub const fn user(message: &'static str) -> Self {
        Self {
            kind: CancelKind::User,
            message: Some(message),
        }
    }

    /// The owning request completed.
    #[must_use]
    pub const fn request_completed() -> Self {
        Self {
            kind: CancelKind::RequestCompleted,
            message: None,
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message {
            Some(message) => write!(f, "{}: {message}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_message() {
        assert_eq!(CancelReason::user("stop").to_string(), "user: stop");
        assert_eq!(
            CancelReason::request_completed().to_string(),
            "request completed"
        );
        assert_eq!(CancelReason::default().kind, CancelKind::User);
    }
}
