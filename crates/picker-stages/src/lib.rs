//! # Picker Stages
//!
//! Source adapters and stage processors for the signal pipeline.
//!
//! A stage processor turns upstream payloads into one output payload.
//! Root stages wrap a [`SourceAdapter`] in an [`AdapterStage`]. Each error
//! carries an [`ErrorKind`] whose class decides whether the orchestrator
//! retries it.
//!
//! ```
//! use picker_stages::{ProcessorRegistry, StageProcessor};
//!
//! let registry = ProcessorRegistry::with_builtins();
//! let cleaner = registry.get("text_cleaner").unwrap();
//! assert_eq!(cleaner.name(), "text_cleaner");
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod adapters;
pub mod error;
pub mod http;
pub mod processor;
pub mod processors;
pub mod registry;

pub use adapters::{DiscourseForumAdapter, EodhdAdapter, FileAdapter, ForumBody, ForumPost, ForumThread};
pub use error::{ErrorKind, FetchError, StageError};
pub use processor::{AdapterStage, FetchParams, SourceAdapter, StageInput, StageProcessor};
pub use processors::{
    CompletionClient, ExtractiveSummarizer, FundamentalsParser, HttpCompletionClient,
    LexiconSentiment, LlmSummarizer, LogisticScorer, MlScorer, RuleScreener, ScreenRule,
    TextCleaner,
};
pub use registry::ProcessorRegistry;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
