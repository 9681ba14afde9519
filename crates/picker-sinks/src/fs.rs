//! File-backed graph and vector sinks
//!
//! Each keeps its in-memory store as the read model and an append-only
//! JSON-lines log as the durable copy. The graph log holds applied deltas,
//! the vector log holds embedded records, so reopening never calls the
//! embedder again. A write is logged before it becomes visible in memory.

use crate::embed::Embedder;
use crate::error::WriterError;
use crate::graph::{GraphWriter, MemoryGraphStore};
use crate::log::JsonLog;
use crate::vector::{MemoryVectorIndex, VectorWriter};
use async_trait::async_trait;
use picker_artifact::{GraphDelta, VectorDelta, VectorRecord};
use std::path::Path;
use std::sync::Arc;

/// Knowledge graph persisted as a log of applied deltas
#[derive(Debug)]
pub struct FsGraphStore {
    log: JsonLog,
    graph: MemoryGraphStore,
}

impl FsGraphStore {
    /// Open (creating if needed) the delta log at `path` and replay it
    ///
    /// # Errors
    /// Returns error if the file cannot be read or a logged delta is corrupt
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, WriterError> {
        let (log, deltas) = JsonLog::open::<GraphDelta>(path.as_ref(), "graph").await?;
        let graph = MemoryGraphStore::new();
        for delta in &deltas {
            graph.merge(delta);
        }
        tracing::info!(
            path = %log.path().display(),
            deltas = deltas.len(),
            nodes = graph.node_count(),
            "graph log replayed"
        );
        Ok(Self { log, graph })
    }

    /// Read access to the replayed graph
    #[must_use]
    pub fn graph(&self) -> &MemoryGraphStore {
        &self.graph
    }
}

#[async_trait]
impl GraphWriter for FsGraphStore {
    async fn apply(&self, delta: &GraphDelta) -> Result<(), WriterError> {
        MemoryGraphStore::validate(delta)?;
        if delta.is_empty() {
            return Ok(());
        }
        let bytes = self.log.encode(std::slice::from_ref(delta))?;
        self.log.append(&bytes, || self.graph.merge(delta)).await?;
        tracing::debug!(
            symbol = %delta.symbol,
            nodes = delta.nodes().len(),
            edges = delta.edges().len(),
            "graph delta logged"
        );
        Ok(())
    }
}

/// Vector index persisted as a log of embedded records
#[derive(Debug)]
pub struct FsVectorIndex {
    log: JsonLog,
    index: MemoryVectorIndex,
}

impl FsVectorIndex {
    /// Open (creating if needed) the record log at `path`
    ///
    /// # Errors
    /// Returns error if the file cannot be read, a record is corrupt, or a
    /// record was embedded with a different dimension than `embedder`
    pub async fn open(path: impl AsRef<Path>, embedder: Arc<dyn Embedder>) -> Result<Self, WriterError> {
        let (log, records) = JsonLog::open::<VectorRecord>(path.as_ref(), "vector").await?;
        let index = MemoryVectorIndex::new(embedder);
        let dimension = index.dimension();
        if let Some(bad) = records.iter().find(|r| r.embedding.len() != dimension) {
            return Err(WriterError::invalid(
                "vector",
                format!(
                    "{} holds {}-dimensional embeddings, configured dimension is {dimension}",
                    log.path().display(),
                    bad.embedding.len()
                ),
            ));
        }
        let restored = index.restore(records);
        tracing::info!(path = %log.path().display(), restored, "vector log replayed");
        Ok(Self { log, index })
    }

    /// Read access to the replayed index, including search
    #[must_use]
    pub fn index(&self) -> &MemoryVectorIndex {
        &self.index
    }
}

#[async_trait]
impl VectorWriter for FsVectorIndex {
    async fn apply(&self, delta: &VectorDelta) -> Result<(), WriterError> {
        let records = self.index.embed_fresh(delta).await?;
        if records.is_empty() {
            return Ok(());
        }
        let bytes = self.log.encode(&records)?;
        let inserted = self.log.append(&bytes, || self.index.store(records)).await?;
        tracing::debug!(symbol = %delta.symbol, inserted, "vector delta logged");
        Ok(())
    }
}
