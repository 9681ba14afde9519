//! Run records
//!
//! A [`RunRecord`] is one execution attempt of the whole stage graph for
//! one symbol. Records are persisted by the artifact store so a later
//! process can resume or retry from them.

use crate::artifact::{ArtifactId, ArtifactKey};
use crate::hash::ContentHash;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use picker_symbol::Symbol;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use ulid::Ulid;

/// Retry classification shared by every error type in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// Retry-eligible (network, timeout, rate limit)
    Transient,
    /// Immediately terminal (malformed input, contract violation)
    Permanent,
}

impl ErrorClass {
    #[inline]
    #[must_use]
    pub fn is_transient(self) -> bool {
        self == ErrorClass::Transient
    }
}

impl Display for ErrorClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
        })
    }
}

/// Run identifier (ULID); also the nonce for non-idempotent stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(Ulid);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// Status of one stage within a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    NotStarted,
    Running,
    Succeeded,
    Failed,
    /// Not run because an upstream stage failed; reported as failed
    Skipped,
    /// Not run because the batch was cancelled
    Cancelled,
}

impl StageStatus {
    /// Failed directly or through an upstream failure
    #[inline]
    #[must_use]
    pub fn is_failed(self) -> bool {
        matches!(self, StageStatus::Failed | StageStatus::Skipped)
    }

    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, StageStatus::NotStarted | StageStatus::Running)
    }
}

impl Display for StageStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageStatus::NotStarted => "not_started",
            StageStatus::Running => "running",
            StageStatus::Succeeded => "succeeded",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
            StageStatus::Cancelled => "cancelled",
        })
    }
}

/// One attempt at executing a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<ErrorClass>,
}

impl AttemptRecord {
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-stage result inside a run record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub status: StageStatus,
    /// Store key of the artifact the stage resolved to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<ArtifactKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<ArtifactId>,
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
}

/// The two downstream writers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterKind {
    Graph,
    Vector,
}

impl Display for WriterKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WriterKind::Graph => "graph_writer",
            WriterKind::Vector => "vector_writer",
        })
    }
}

/// Writer status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterStatus {
    #[default]
    NotAttempted,
    Succeeded,
    Failed,
}

impl Display for WriterStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WriterStatus::NotAttempted => "not_attempted",
            WriterStatus::Succeeded => "succeeded",
            WriterStatus::Failed => "failed",
        })
    }
}

/// Per-writer result inside a run record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterOutcome {
    pub status: WriterStatus,
    /// Total attempts across the original run and any retries
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl WriterOutcome {
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == WriterStatus::Succeeded
    }
}

/// Error attached to a run record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writer: Option<WriterKind>,
    pub class: ErrorClass,
    pub message: String,
    pub attempt: u32,
    pub at: DateTime<Utc>,
}

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalState {
    /// Every stage and both writers succeeded
    Complete,
    /// Some work succeeded, or the run was cancelled
    Partial,
    /// No stage succeeded
    Failed,
}

impl Display for TerminalState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TerminalState::Complete => "complete",
            TerminalState::Partial => "partial",
            TerminalState::Failed => "failed",
        })
    }
}

/// One pass of one symbol through the stage graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub symbol: Symbol,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Stage outcomes in topological order
    pub stages: IndexMap<String, StageOutcome>,
    pub graph_writer: WriterOutcome,
    pub vector_writer: WriterOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_delta_hash: Option<ContentHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_delta_hash: Option<ContentHash>,
    #[serde(default)]
    pub errors: Vec<RecordedError>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub cancelled: bool,
    /// Run this one retried, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<RunId>,
    pub terminal: TerminalState,
}

impl RunRecord {
    /// Fresh record with every stage `NotStarted`
    #[must_use]
    pub fn new<I, S>(symbol: Symbol, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            run_id: RunId::new(),
            symbol,
            started_at: Utc::now(),
            finished_at: None,
            stages: stages
                .into_iter()
                .map(|s| (s.into(), StageOutcome::default()))
                .collect(),
            graph_writer: WriterOutcome::default(),
            vector_writer: WriterOutcome::default(),
            graph_delta_hash: None,
            vector_delta_hash: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            cancelled: false,
            resumed_from: None,
            terminal: TerminalState::Failed,
        }
    }

    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageOutcome> {
        self.stages.get(name)
    }

    /// Outcome slot for a stage, created if missing
    pub fn stage_mut(&mut self, name: &str) -> &mut StageOutcome {
        self.stages.entry(name.to_string()).or_default()
    }

    #[must_use]
    pub fn writer(&self, kind: WriterKind) -> &WriterOutcome {
        match kind {
            WriterKind::Graph => &self.graph_writer,
            WriterKind::Vector => &self.vector_writer,
        }
    }

    pub fn writer_mut(&mut self, kind: WriterKind) -> &mut WriterOutcome {
        match kind {
            WriterKind::Graph => &mut self.graph_writer,
            WriterKind::Vector => &mut self.vector_writer,
        }
    }

    #[must_use]
    pub fn all_stages_succeeded(&self) -> bool {
        !self.stages.is_empty()
            && self
                .stages
                .values()
                .all(|s| s.status == StageStatus::Succeeded)
    }

    /// Writers that did not succeed; empty unless every stage succeeded
    #[must_use]
    pub fn pending_writers(&self) -> Vec<WriterKind> {
        if !self.all_stages_succeeded() {
            return Vec::new();
        }
        [WriterKind::Graph, WriterKind::Vector]
            .into_iter()
            .filter(|k| !self.writer(*k).succeeded())
            .collect()
    }

    /// Attempts recorded for a stage (0 for unknown stages)
    #[must_use]
    pub fn attempts_for(&self, stage: &str) -> usize {
        self.stage(stage).map_or(0, |s| s.attempts.len())
    }

    pub fn record_error(
        &mut self,
        stage: Option<&str>,
        writer: Option<WriterKind>,
        class: ErrorClass,
        message: impl Into<String>,
        attempt: u32,
    ) {
        self.errors.push(RecordedError {
            stage: stage.map(str::to_string),
            writer,
            class,
            message: message.into(),
            attempt,
            at: Utc::now(),
        });
    }

    /// Derive the terminal state from stage and writer outcomes
    #[must_use]
    pub fn resolve_terminal(&self) -> TerminalState {
        let any_succeeded = self
            .stages
            .values()
            .any(|s| s.status == StageStatus::Succeeded);
        if self.cancelled {
            TerminalState::Partial
        } else if self.all_stages_succeeded()
            && self.graph_writer.succeeded()
            && self.vector_writer.succeeded()
        {
            TerminalState::Complete
        } else if any_succeeded {
            TerminalState::Partial
        } else {
            TerminalState::Failed
        }
    }

    /// Stamp finish time and terminal state
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
        self.terminal = self.resolve_terminal();
    }
}
