//! Adapter and processor errors
//!
//! Both error types carry an [`ErrorKind`]; the retry class follows from
//! the kind, so a processor only has to say what went wrong.

use picker_artifact::ErrorClass;
use std::fmt::{self, Display, Formatter};

/// What went wrong in an adapter or processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Deadline exceeded
    Timeout,
    /// Upstream asked us to slow down (HTTP 429)
    RateLimited,
    /// Connection failure or upstream server error
    Network,
    /// Upstream refused the request (HTTP 4xx other than 429)
    Rejected,
    /// Input could not be parsed
    MalformedInput,
    /// Input or output does not match the stage contract
    ContractViolation,
    /// Bug or unexpected state inside the processor
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub fn class(self) -> ErrorClass {
        match self {
            ErrorKind::Timeout | ErrorKind::RateLimited | ErrorKind::Network => {
                ErrorClass::Transient
            }
            ErrorKind::Rejected
            | ErrorKind::MalformedInput
            | ErrorKind::ContractViolation
            | ErrorKind::Internal => ErrorClass::Permanent,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimited => "rate limited",
            ErrorKind::Network => "network error",
            ErrorKind::Rejected => "request rejected",
            ErrorKind::MalformedInput => "malformed input",
            ErrorKind::ContractViolation => "contract violation",
            ErrorKind::Internal => "internal error",
        })
    }
}

/// Source adapter failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("fetch failed ({kind}): {message}")]
pub struct FetchError {
    pub kind: ErrorKind,
    pub message: String,
}

impl FetchError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedInput, message)
    }

    #[inline]
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        self.kind.class()
    }

    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class().is_transient()
    }
}

/// Stage processor failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StageError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedInput, message)
    }

    #[must_use]
    pub fn contract(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ContractViolation, message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    #[inline]
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        self.kind.class()
    }

    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class().is_transient()
    }
}

impl From<FetchError> for StageError {
    fn from(err: FetchError) -> Self {
        Self {
            kind: err.kind,
            message: err.message,
        }
    }
}
