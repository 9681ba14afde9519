//! Writer errors

use picker_artifact::ErrorClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriterErrorKind {
    /// Backend unreachable or refusing connections
    Unavailable,
    /// Backend did not answer in time
    Timeout,
    /// Delta violates a store invariant (dangling edge, bad embedding)
    InvalidDelta,
    Internal,
}

impl WriterErrorKind {
    #[must_use]
    pub fn class(self) -> ErrorClass {
        match self {
            WriterErrorKind::Unavailable | WriterErrorKind::Timeout => ErrorClass::Transient,
            WriterErrorKind::InvalidDelta | WriterErrorKind::Internal => ErrorClass::Permanent,
        }
    }
}

/// Graph or vector writer failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{writer} writer: {message}")]
pub struct WriterError {
    pub kind: WriterErrorKind,
    pub writer: String,
    pub message: String,
}

impl WriterError {
    #[must_use]
    pub fn new(kind: WriterErrorKind, writer: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            writer: writer.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unavailable(writer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(WriterErrorKind::Unavailable, writer, message)
    }

    #[must_use]
    pub fn invalid(writer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(WriterErrorKind::InvalidDelta, writer, message)
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
