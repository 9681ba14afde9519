//! Picker Artifact
//!
//! Content-addressed stage outputs for the signal pipeline.
//!
//! Core types:
//! - [`ContentHash`]: Blake3 content hash, hex on the wire
//! - [`Artifact`]: output of one stage attempt, immutable once succeeded
//! - [`Payload`]: typed stage output, one variant per [`PayloadKind`]
//! - [`GraphDelta`] / [`VectorDelta`]: store upserts derived from artifacts
//! - [`RunRecord`]: one pass of one symbol through the stage graph

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod artifact;
mod delta;
mod hash;
mod payload;
mod run;

pub use artifact::{Artifact, ArtifactId, ArtifactKey, ArtifactStatus};
pub use delta::{
    props, GraphDelta, GraphEdge, GraphNode, NodeRef, Properties, VectorDelta, VectorDocument,
    VectorRecord,
};
pub use hash::{ContentHash, HashError, InputHasher};
pub use payload::{
    CleanPost, CleanText, Fundamentals, MonthlySentiment, MonthlySummary, Payload, PayloadKind,
    PostSentiment, RawDocument, RuleResult, ScreeningResult, SentimentLabel, SentimentReport,
    Summary,
};
pub use run::{
    AttemptRecord, ErrorClass, RecordedError, RunId, RunRecord, StageOutcome, StageStatus,
    TerminalState, WriterKind, WriterOutcome, WriterStatus,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
