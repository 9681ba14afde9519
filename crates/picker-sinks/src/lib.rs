//! # Picker Sinks
//!
//! Writers for the two downstream stores: the knowledge graph and the
//! vector index. Both upsert by key, so re-applying a delta is harmless,
//! and both are independent; the orchestrator records each outcome
//! separately.
//!
//! The graph lives in memory, in an append-only file or in Neo4j; the
//! vector index in memory or in an append-only file.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod embed;
pub mod error;
pub mod fs;
pub mod graph;
mod log;
pub mod neo4j;
pub mod vector;

pub use embed::{cosine, Embedder, HashingEmbedder};
pub use error::{WriterError, WriterErrorKind};
pub use fs::{FsGraphStore, FsVectorIndex};
pub use graph::{labels, GraphWriter, MemoryGraphStore};
pub use neo4j::{Neo4jGraphWriter, Neo4jSettings};
pub use vector::{MemoryVectorIndex, SearchHit, VectorWriter};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
