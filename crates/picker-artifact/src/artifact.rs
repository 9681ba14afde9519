//! Stage artifacts
//!
//! An [`Artifact`] is the output of one stage for one symbol at one run.
//! It is owned by the artifact store; once `succeeded` it is never edited,
//! a retry produces a new version.

use crate::hash::{ContentHash, HashError};
use crate::payload::Payload;
use crate::run::RunId;
use chrono::{DateTime, Utc};
use picker_symbol::Symbol;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use ulid::Ulid;

/// Unique artifact identifier (ULID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtifactId(Ulid);

impl ArtifactId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ArtifactId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Pending,
    Succeeded,
    Failed,
}

/// Store key: one cache slot per (symbol, stage, input hash)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub symbol: Symbol,
    pub stage: String,
    pub input_hash: ContentHash,
}

impl ArtifactKey {
    #[must_use]
    pub fn new(symbol: Symbol, stage: impl Into<String>, input_hash: ContentHash) -> Self {
        Self {
            symbol,
            stage: stage.into(),
            input_hash,
        }
    }
}

impl Display for ArtifactKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.symbol, self.stage, self.input_hash.short())
    }
}

/// Output of one stage attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub key: ArtifactKey,
    /// Hash of the stage inputs without the run nonce; equal to
    /// `key.input_hash` for idempotent stages
    pub base_hash: ContentHash,
    /// Assigned by the store, increasing per key starting at 1
    pub version: u32,
    /// Attempt number within the run that produced it
    pub attempt: u32,
    pub run_id: RunId,
    pub status: ArtifactStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_hash: Option<ContentHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub produced_at: DateTime<Utc>,
}

impl Artifact {
    fn base(key: ArtifactKey, base_hash: ContentHash, run_id: RunId, attempt: u32) -> Self {
        Self {
            id: ArtifactId::new(),
            key,
            base_hash,
            version: 0,
            attempt,
            run_id,
            status: ArtifactStatus::Pending,
            payload: None,
            payload_hash: None,
            error: None,
            produced_at: Utc::now(),
        }
    }

    /// Placeholder for an attempt that has not produced output yet
    #[must_use]
    pub fn pending(key: ArtifactKey, base_hash: ContentHash, run_id: RunId, attempt: u32) -> Self {
        Self::base(key, base_hash, run_id, attempt)
    }

    /// Successful attempt carrying its payload
    ///
    /// # Errors
    /// Returns error if the payload cannot be hashed
    pub fn succeeded(
        key: ArtifactKey,
        base_hash: ContentHash,
        run_id: RunId,
        attempt: u32,
        payload: Payload,
    ) -> Result<Self, HashError> {
        let payload_hash = payload.content_hash()?;
        let mut artifact = Self::base(key, base_hash, run_id, attempt);
        artifact.status = ArtifactStatus::Succeeded;
        artifact.payload = Some(payload);
        artifact.payload_hash = Some(payload_hash);
        Ok(artifact)
    }

    /// Failed attempt; carries the error message and no payload
    #[must_use]
    pub fn failed(
        key: ArtifactKey,
        base_hash: ContentHash,
        run_id: RunId,
        attempt: u32,
        error: impl Into<String>,
    ) -> Self {
        let mut artifact = Self::base(key, base_hash, run_id, attempt);
        artifact.status = ArtifactStatus::Failed;
        artifact.error = Some(error.into());
        artifact
    }

    #[inline]
    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        self.status == ArtifactStatus::Succeeded
    }

    #[inline]
    #[must_use]
    pub fn symbol(&self) -> &Symbol {
        &self.key.symbol
    }

    #[inline]
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.key.stage
    }

    /// Whether both artifacts carry the same payload
    #[must_use]
    pub fn same_payload(&self, other: &Artifact) -> bool {
        self.payload_hash == other.payload_hash
    }
}
