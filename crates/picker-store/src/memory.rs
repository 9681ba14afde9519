//! In-memory artifact store

use crate::error::StoreError;
use crate::store::{latest_by_start, pick_current, resolve_put, ArtifactStore, PutOutcome};
use async_trait::async_trait;
use dashmap::DashMap;
use picker_artifact::{Artifact, ArtifactKey, ContentHash, RunRecord};
use picker_symbol::Symbol;

type BaseKey = (Symbol, String, ContentHash);

/// `DashMap`-backed store for tests and single-process runs
///
/// A put holds the key's map entry for the whole read-decide-append step,
/// which serializes puts for the same key.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: DashMap<ArtifactKey, Vec<Artifact>>,
    by_base: DashMap<BaseKey, Vec<ContentHash>>,
    runs: DashMap<Symbol, Vec<RunRecord>>,
}

impl MemoryArtifactStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored artifact versions across all keys
    #[must_use]
    pub fn version_count(&self) -> usize {
        self.artifacts.iter().map(|e| e.value().len()).sum()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn get(
        &self,
        symbol: &Symbol,
        stage: &str,
        input_hash: &ContentHash,
    ) -> Result<Option<Artifact>, StoreError> {
        let key = ArtifactKey::new(symbol.clone(), stage, *input_hash);
        Ok(self
            .artifacts
            .get(&key)
            .and_then(|versions| pick_current(&versions)))
    }

    async fn versions(&self, key: &ArtifactKey) -> Result<Vec<Artifact>, StoreError> {
        Ok(self
            .artifacts
            .get(key)
            .map(|v| v.value().clone())
            .unwrap_or_default())
    }

    async fn latest(
        &self,
        symbol: &Symbol,
        stage: &str,
        base_hash: &ContentHash,
    ) -> Result<Option<Artifact>, StoreError> {
        let base = (symbol.clone(), stage.to_string(), *base_hash);
        let hashes = self
            .by_base
            .get(&base)
            .map(|h| h.value().clone())
            .unwrap_or_default();

        let mut best: Option<Artifact> = None;
        for input_hash in hashes {
            let key = ArtifactKey::new(symbol.clone(), stage, input_hash);
            let Some(versions) = self.artifacts.get(&key) else {
                continue;
            };
            for candidate in versions.iter().filter(|a| a.is_succeeded()) {
                let newer = best
                    .as_ref()
                    .map_or(true, |b| (candidate.produced_at, candidate.version) > (b.produced_at, b.version));
                if newer {
                    best = Some(candidate.clone());
                }
            }
        }
        Ok(best)
    }

    async fn put(&self, artifact: Artifact) -> Result<PutOutcome, StoreError> {
        let base = (
            artifact.key.symbol.clone(),
            artifact.key.stage.clone(),
            artifact.base_hash,
        );
        let input_hash = artifact.key.input_hash;

        let outcome = {
            let mut versions = self.artifacts.entry(artifact.key.clone()).or_default();
            let (outcome, append) = resolve_put(&versions, artifact);
            if append {
                versions.push(outcome.artifact().clone());
            }
            outcome
        };

        if matches!(outcome, PutOutcome::Stored(_)) {
            let mut hashes = self.by_base.entry(base).or_default();
            if !hashes.contains(&input_hash) {
                hashes.push(input_hash);
            }
        }
        Ok(outcome)
    }

    async fn put_run(&self, record: &RunRecord) -> Result<(), StoreError> {
        let mut runs = self.runs.entry(record.symbol.clone()).or_default();
        match runs.iter_mut().find(|r| r.run_id == record.run_id) {
            Some(existing) => *existing = record.clone(),
            None => runs.push(record.clone()),
        }
        Ok(())
    }

    async fn latest_run(&self, symbol: &Symbol) -> Result<Option<RunRecord>, StoreError> {
        Ok(self
            .runs
            .get(symbol)
            .and_then(|runs| latest_by_start(runs.iter().cloned())))
    }

    async fn runs(&self, symbol: &Symbol) -> Result<Vec<RunRecord>, StoreError> {
        let mut runs = self
            .runs
            .get(symbol)
            .map(|r| r.value().clone())
            .unwrap_or_default();
        runs.sort_by(|a, b| (a.started_at, a.run_id).cmp(&(b.started_at, b.run_id)));
        Ok(runs)
    }

    async fn run_symbols(&self) -> Result<Vec<Symbol>, StoreError> {
        let mut symbols: Vec<Symbol> = self.runs.iter().map(|e| e.key().clone()).collect();
        symbols.sort();
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use picker_artifact::{Payload, RunId, Summary};

    fn acme() -> Symbol {
        Symbol::parse("ACME").unwrap()
    }

    fn summary(text: &str) -> Payload {
        Payload::Summary(Summary {
            text: text.into(),
            method: "llm".into(),
            source_posts: 1,
            monthly: Default::default(),
        })
    }

    #[tokio::test]
    async fn put_then_get() {
        let store = MemoryArtifactStore::new();
        let key = ArtifactKey::new(acme(), "summarize", ContentHash::compute(b"in"));
        let artifact =
            Artifact::succeeded(key.clone(), key.input_hash, RunId::new(), 1, summary("a")).unwrap();
        let stored = store.put(artifact).await.unwrap();
        assert!(matches!(stored, PutOutcome::Stored(ref a) if a.version == 1));

        let fetched = store.get_key(&key).await.unwrap().unwrap();
        assert_eq!(fetched.id, stored.artifact().id);
        assert_eq!(store.version_count(), 1);
    }

    #[tokio::test]
    async fn latest_spans_nonced_keys() {
        let store = MemoryArtifactStore::new();
        let base = ContentHash::compute(b"base");
        let run_one = ArtifactKey::new(acme(), "summarize", ContentHash::compute(b"n1"));
        let run_two = ArtifactKey::new(acme(), "summarize", ContentHash::compute(b"n2"));

        store
            .put(Artifact::succeeded(run_one, base, RunId::new(), 1, summary("first")).unwrap())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store
            .put(Artifact::succeeded(run_two, base, RunId::new(), 1, summary("second")).unwrap())
            .await
            .unwrap();

        let latest = store.latest(&acme(), "summarize", &base).await.unwrap().unwrap();
        assert_eq!(latest.payload, Some(summary("second")));
        assert!(store
            .latest(&acme(), "summarize", &ContentHash::compute(b"other"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn put_run_replaces_same_id() {
        let store = MemoryArtifactStore::new();
        let mut record = RunRecord::new(acme(), ["a"]);
        store.put_run(&record).await.unwrap();
        record.cancelled = true;
        store.put_run(&record).await.unwrap();

        let runs = store.runs(&acme()).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].cancelled);
        assert_eq!(store.run_symbols().await.unwrap(), vec![acme()]);
    }
}
