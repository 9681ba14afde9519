//! Artifact store contract

use crate::error::StoreError;
use async_trait::async_trait;
use picker_artifact::{Artifact, ArtifactKey, ContentHash, RunRecord};
use picker_symbol::Symbol;

/// Result of [`ArtifactStore::put`]
#[derive(Debug, Clone, PartialEq)]
pub enum PutOutcome {
    /// The artifact was written with the version assigned by the store
    Stored(Artifact),
    /// A succeeded artifact already holds the key and was kept
    Existing {
        artifact: Artifact,
        /// The rejected artifact succeeded with a different payload
        conflict: bool,
    },
}

impl PutOutcome {
    /// The artifact now authoritative for the key
    #[must_use]
    pub fn artifact(&self) -> &Artifact {
        match self {
            PutOutcome::Stored(artifact) | PutOutcome::Existing { artifact, .. } => artifact,
        }
    }

    #[must_use]
    pub fn into_artifact(self) -> Artifact {
        match self {
            PutOutcome::Stored(artifact) | PutOutcome::Existing { artifact, .. } => artifact,
        }
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, PutOutcome::Existing { conflict: true, .. })
    }
}

/// Durable, content-addressed cache of stage outputs and run records
///
/// Implementations must tolerate concurrent calls for different keys and
/// serialize puts for the same key.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Latest succeeded version for the key, otherwise the latest version
    async fn get(
        &self,
        symbol: &Symbol,
        stage: &str,
        input_hash: &ContentHash,
    ) -> Result<Option<Artifact>, StoreError>;

    /// Every version stored under the key, oldest first
    async fn versions(&self, key: &ArtifactKey) -> Result<Vec<Artifact>, StoreError>;

    /// Latest succeeded artifact among all keys sharing a base hash
    async fn latest(
        &self,
        symbol: &Symbol,
        stage: &str,
        base_hash: &ContentHash,
    ) -> Result<Option<Artifact>, StoreError>;

    /// Store a new version unless a succeeded artifact already holds the key
    async fn put(&self, artifact: Artifact) -> Result<PutOutcome, StoreError>;

    /// Insert or replace a run record
    async fn put_run(&self, record: &RunRecord) -> Result<(), StoreError>;

    /// Most recently started run for a symbol
    async fn latest_run(&self, symbol: &Symbol) -> Result<Option<RunRecord>, StoreError>;

    /// All runs for a symbol, oldest first
    async fn runs(&self, symbol: &Symbol) -> Result<Vec<RunRecord>, StoreError>;

    /// Symbols with at least one persisted run
    async fn run_symbols(&self) -> Result<Vec<Symbol>, StoreError>;

    /// Artifact identified by its key
    async fn get_key(&self, key: &ArtifactKey) -> Result<Option<Artifact>, StoreError> {
        self.get(&key.symbol, &key.stage, &key.input_hash).await
    }
}

/// Pick the version `get` returns
pub(crate) fn pick_current(versions: &[Artifact]) -> Option<Artifact> {
    versions
        .iter()
        .rev()
        .find(|a| a.is_succeeded())
        .or_else(|| versions.last())
        .cloned()
}

/// Decide what a put does against the versions already stored
///
/// Returns the outcome and, when the incoming artifact is accepted, the
/// versioned copy to append.
pub(crate) fn resolve_put(versions: &[Artifact], mut incoming: Artifact) -> (PutOutcome, bool) {
    if let Some(existing) = versions.iter().find(|a| a.is_succeeded()) {
        let conflict = incoming.is_succeeded() && !existing.same_payload(&incoming);
        return (
            PutOutcome::Existing {
                artifact: existing.clone(),
                conflict,
            },
            false,
        );
    }
    incoming.version = versions.iter().map(|a| a.version).max().unwrap_or(0) + 1;
    (PutOutcome::Stored(incoming), true)
}

/// Ordering used to pick the latest run
pub(crate) fn latest_by_start(runs: impl IntoIterator<Item = RunRecord>) -> Option<RunRecord> {
    runs.into_iter()
        .max_by(|a, b| (a.started_at, a.run_id).cmp(&(b.started_at, b.run_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use picker_artifact::{Payload, RunId, Summary};

    fn key() -> ArtifactKey {
        ArtifactKey::new(
            Symbol::parse("ACME").unwrap(),
            "summarize",
            ContentHash::compute(b"k"),
        )
    }

    fn ok(text: &str) -> Artifact {
        let k = key();
        let payload = Payload::Summary(Summary {
            text: text.into(),
            method: "extractive".into(),
            source_posts: 1,
            monthly: Default::default(),
        });
        Artifact::succeeded(k.clone(), k.input_hash, RunId::new(), 1, payload).unwrap()
    }

    fn failed() -> Artifact {
        let k = key();
        Artifact::failed(k.clone(), k.input_hash, RunId::new(), 1, "timeout")
    }

    #[test]
    fn first_put_gets_version_one() {
        let (outcome, append) = resolve_put(&[], ok("a"));
        assert!(append);
        assert_eq!(outcome.artifact().version, 1);
    }

    #[test]
    fn failures_accumulate_versions() {
        let mut first = failed();
        first.version = 1;
        let (outcome, append) = resolve_put(&[first], ok("a"));
        assert!(append);
        assert_eq!(outcome.artifact().version, 2);
    }

    #[test]
    fn succeeded_is_never_replaced() {
        let mut existing = ok("a");
        existing.version = 1;

        let (same, append) = resolve_put(&[existing.clone()], ok("a"));
        assert!(!append);
        assert!(!same.is_conflict());
        assert_eq!(same.artifact().id, existing.id);

        let (different, _) = resolve_put(&[existing.clone()], ok("b"));
        assert!(different.is_conflict());
        assert_eq!(different.artifact().payload, existing.payload);

        let (late_failure, append) = resolve_put(&[existing], failed());
        assert!(!append);
        assert!(!late_failure.is_conflict());
    }

    #[test]
    fn current_prefers_succeeded() {
        let mut a = failed();
        a.version = 1;
        let mut b = ok("x");
        b.version = 2;
        let mut c = failed();
        c.version = 3;
        assert_eq!(pick_current(&[a.clone(), b.clone(), c]).unwrap().version, 2);
        assert_eq!(pick_current(&[a]).unwrap().version, 1);
        assert!(pick_current(&[]).is_none());
    }
}
