//! Store errors

use picker_artifact::ErrorClass;
use std::path::PathBuf;

/// Artifact store failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Encoding or decoding failure
    #[error("serialization error at {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Stored file disagrees with where it was found
    #[error("corrupt store entry {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Stage name unusable as a path component
    #[error("invalid store path component {0:?}")]
    InvalidComponent(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn serde(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Serde {
            path: path.into(),
            source,
        }
    }

    /// IO failures may clear up; everything else is a data problem
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Io { .. } => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class().is_transient()
    }
}
