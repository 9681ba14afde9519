//! Error types for Picker Core
//!
//! Provides error handling for:
//! - Configuration loading and validation
//! - Pipeline construction (DAG, processor lookup)
//! - Stage, writer and store failures surfaced from the orchestrator

use picker_artifact::{ErrorClass, HashError};
use picker_dag::DagError;
use picker_sinks::WriterError;
use picker_stages::StageError;
use picker_store::StoreError;
use picker_symbol::SymbolError;
use std::path::PathBuf;

/// Main pipeline error type
///
/// The batch entry points only return configuration-time variants; failures
/// during a symbol's run are recorded on its `RunRecord` instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Configuration could not be loaded or is invalid
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Stage graph rejected
    #[error("pipeline graph error: {0}")]
    Dag(#[from] DagError),

    /// A stage names a processor nobody registered
    #[error("stage {stage:?} uses unknown processor {processor:?}")]
    UnknownProcessor { stage: String, processor: String },

    /// Symbol parsing or lookup failed
    #[error("symbol error: {0}")]
    Symbol(#[from] SymbolError),

    /// Stage processor failure
    #[error("stage failed: {0}")]
    Stage(#[from] StageError),

    /// Graph or vector writer failure
    #[error("writer failed: {0}")]
    Writer(#[from] WriterError),

    /// Artifact store failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Payload or delta could not be hashed
    #[error("hash error: {0}")]
    Hash(#[from] HashError),

    /// Two succeeded artifacts disagree for the same key
    #[error("cache conflict for {key}")]
    CacheConflict { key: String },

    /// The batch was cancelled
    #[error("operation cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Retry classification
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Stage(e) => e.class(),
            Self::Writer(e) => e.class(),
            Self::Store(e) => e.class(),
            Self::Cancelled => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class().is_transient()
    }

    /// Errors that stop a batch before any symbol runs
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Dag(_) | Self::UnknownProcessor { .. } | Self::Symbol(_)
        )
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid TOML
    #[error("invalid toml: {0}")]
    Toml(#[from] toml::de::Error),

    /// Invalid YAML
    #[error("invalid yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Extension is neither toml nor yaml
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(PathBuf),

    /// A value is out of range or inconsistent
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
