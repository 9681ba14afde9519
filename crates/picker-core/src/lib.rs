//! # Picker Core
//!
//! The orchestrator that turns a symbol list into knowledge-graph and
//! vector-index updates.
//!
//! ## Flow
//!
//! ```text
//! PipelineConfig ──► PipelineContext ──► Orchestrator::run_batch
//!                                             │
//!                      per symbol (concurrent)│
//!                                             ▼
//!     ready stages ──► cache lookup ──► processor (timeout, retry)
//!                                             │
//!                                 artifact store (versioned)
//!                                             │
//!                  all stages succeeded ──► DeltaBuilder
//!                                             │
//!                          GraphWriter ◄──────┴──────► VectorWriter
//! ```
//!
//! Every symbol ends in a [`RunRecord`](picker_artifact::RunRecord) with a
//! terminal state of complete, partial or failed. A failed symbol never
//! aborts the batch; [`Orchestrator::retry_batch`] resumes from the store
//! and only recomputes what did not succeed.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod context;
pub mod delta;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod report;
pub mod retry;

pub use config::{PipelineConfig, StageConfig};
pub use context::{registry_from_config, ContextBuilder, PipelineContext};
pub use delta::{DeltaBuilder, SignalDeltaBuilder, StageArtifacts};
pub use error::{ConfigError, PipelineError};
pub use orchestrator::{Orchestrator, RunOptions};
pub use pipeline::{default_stages, Pipeline};
pub use report::{BatchReport, BatchSummary};
pub use retry::RetryPolicy;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
