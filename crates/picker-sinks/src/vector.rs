//! Vector index writer

use crate::embed::{cosine, Embedder};
use crate::error::{WriterError, WriterErrorKind};
use async_trait::async_trait;
use parking_lot::RwLock;
use picker_artifact::{ContentHash, VectorDelta, VectorDocument, VectorRecord};
use picker_symbol::Symbol;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Embeds and upserts vector deltas
#[async_trait]
pub trait VectorWriter: Send + Sync {
    fn name(&self) -> &str {
        "vector"
    }

    async fn apply(&self, delta: &VectorDelta) -> Result<(), WriterError>;
}

/// One search result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub hash: ContentHash,
    pub symbol: Symbol,
    pub score: f32,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

/// In-process vector index keyed by document content hash
pub struct MemoryVectorIndex {
    embedder: Arc<dyn Embedder>,
    records: RwLock<BTreeMap<ContentHash, VectorRecord>>,
    embedded: AtomicUsize,
}

impl std::fmt::Debug for MemoryVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryVectorIndex")
            .field("dimension", &self.embedder.dimension())
            .field("records", &self.len())
            .finish_non_exhaustive()
    }
}

impl MemoryVectorIndex {
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            records: RwLock::new(BTreeMap::new()),
            embedded: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.records.read().contains_key(hash)
    }

    #[must_use]
    pub fn get(&self, hash: &ContentHash) -> Option<VectorRecord> {
        self.records.read().get(hash).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Documents embedded since construction; skipped duplicates not counted
    #[must_use]
    pub fn embedded_count(&self) -> usize {
        self.embedded.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn records_for(&self, symbol: &Symbol) -> Vec<VectorRecord> {
        self.records
            .read()
            .values()
            .filter(|r| &r.symbol == symbol)
            .cloned()
            .collect()
    }

    /// Nearest documents to `query` by cosine similarity
    ///
    /// # Errors
    /// Returns error if the query cannot be embedded
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, WriterError> {
        let mut vectors = self.embedder.embed(&[query.to_string()]).await?;
        let Some(query) = vectors.pop() else {
            return Err(WriterError::new(
                WriterErrorKind::Internal,
                "vector",
                "embedder returned no vector for the query",
            ));
        };
        let records = self.records.read();
        let mut hits: Vec<SearchHit> = records
            .values()
            .map(|r| SearchHit {
                hash: r.hash,
                symbol: r.symbol.clone(),
                score: cosine(&query, &r.embedding),
                text: r.text.clone(),
                metadata: r.metadata.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.hash.cmp(&b.hash)));
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Embed the documents of `delta` not yet indexed
    pub(crate) async fn embed_fresh(&self, delta: &VectorDelta) -> Result<Vec<VectorRecord>, WriterError> {
        let fresh: Vec<&VectorDocument> = {
            let records = self.records.read();
            delta
                .documents()
                .iter()
                .filter(|d| !records.contains_key(&d.hash))
                .collect()
        };
        if fresh.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = fresh.iter().map(|d| d.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != fresh.len() {
            return Err(WriterError::invalid(
                "vector",
                format!("embedder returned {} vectors for {} texts", embeddings.len(), fresh.len()),
            ));
        }
        let dimension = self.embedder.dimension();
        if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension) {
            return Err(WriterError::invalid(
                "vector",
                format!("embedding has {} dimensions, expected {dimension}", bad.len()),
            ));
        }

        Ok(fresh
            .into_iter()
            .zip(embeddings)
            .map(|(doc, embedding)| VectorRecord {
                hash: doc.hash,
                symbol: delta.symbol.clone(),
                text: doc.text.clone(),
                embedding,
                metadata: doc.metadata.clone(),
            })
            .collect())
    }

    /// Insert records whose hash is not indexed yet; returns how many were new
    pub(crate) fn restore(&self, records: impl IntoIterator<Item = VectorRecord>) -> usize {
        let mut index = self.records.write();
        let mut inserted = 0;
        for record in records {
            if index.contains_key(&record.hash) {
                continue;
            }
            index.insert(record.hash, record);
            inserted += 1;
        }
        inserted
    }

    /// [`restore`](Self::restore) freshly embedded records
    pub(crate) fn store(&self, records: Vec<VectorRecord>) -> usize {
        let inserted = self.restore(records);
        self.embedded.fetch_add(inserted, Ordering::Relaxed);
        inserted
    }

    pub(crate) fn dimension(&self) -> usize {
        self.embedder.dimension()
    }
}

#[async_trait]
impl VectorWriter for MemoryVectorIndex {
    async fn apply(&self, delta: &VectorDelta) -> Result<(), WriterError> {
        let records = self.embed_fresh(delta).await?;
        if records.is_empty() {
            return Ok(());
        }
        let inserted = self.store(records);
        tracing::debug!(symbol = %delta.symbol, inserted, "vector delta applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashingEmbedder;

    fn acme() -> Symbol {
        Symbol::parse("ACME").unwrap()
    }

    fn delta(texts: &[&str]) -> VectorDelta {
        let mut delta = VectorDelta::new(acme());
        for text in texts {
            delta.push(VectorDocument::new(&acme(), *text, BTreeMap::new()));
        }
        delta
    }

    fn index() -> MemoryVectorIndex {
        MemoryVectorIndex::new(Arc::new(HashingEmbedder::default()))
    }

    #[tokio::test]
    async fn same_hash_is_embedded_once() {
        let index = index();
        index.apply(&delta(&["strong growth", "debt risk"])).await.unwrap();
        index.apply(&delta(&["strong growth", "new order book"])).await.unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.embedded_count(), 3);
        assert_eq!(index.records_for(&acme()).len(), 3);
    }

    #[tokio::test]
    async fn search_ranks_by_similarity() {
        let index = index();
        index
            .apply(&delta(&["rising debt is a risk", "monsoon demand for tractors"]))
            .await
            .unwrap();
        let hits = index.search("debt risk", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "rising debt is a risk");
    }

    struct Broken;

    #[async_trait]
    impl Embedder for Broken {
        fn dimension(&self) -> usize {
            4
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, WriterError> {
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    #[tokio::test]
    async fn wrong_dimension_inserts_nothing() {
        let index = MemoryVectorIndex::new(Arc::new(Broken));
        let err = index.apply(&delta(&["a", "b"])).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(index.is_empty());
    }
}
