//! Filesystem artifact store
//!
//! Layout under the root directory:
//!
//! ```text
//! artifacts/<symbol>/<stage>/<input_hash>.json   every version of one key
//! index/<symbol>/<stage>/<base_hash>.json        input hashes sharing a base hash
//! runs/<symbol>/<run_id>.json                    run records
//! ```
//!
//! Every file is written to a temporary sibling and renamed into place, so
//! readers see either the old or the new content. Artifact slots are
//! fronted by a moka cache.

use crate::error::StoreError;
use crate::locks::KeyLocks;
use crate::store::{latest_by_start, pick_current, resolve_put, ArtifactStore, PutOutcome};
use async_trait::async_trait;
use moka::future::Cache;
use picker_artifact::{Artifact, ArtifactKey, ContentHash, RunRecord};
use picker_symbol::Symbol;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

type BaseKey = (Symbol, String, ContentHash);

#[derive(Debug, Serialize, Deserialize)]
struct Slot {
    key: ArtifactKey,
    versions: Vec<Artifact>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BaseIndex {
    input_hashes: Vec<ContentHash>,
}

/// Durable JSON store on the local filesystem
#[derive(Debug)]
pub struct FsArtifactStore {
    root: PathBuf,
    cache: Cache<ArtifactKey, Arc<Vec<Artifact>>>,
    slot_locks: KeyLocks<ArtifactKey>,
    index_locks: KeyLocks<BaseKey>,
    tmp_counter: AtomicU64,
}

impl FsArtifactStore {
    /// Open (creating if needed) a store rooted at `root`
    ///
    /// # Errors
    /// Returns `StoreError::Io` if the directories cannot be created
    pub async fn open(root: impl Into<PathBuf>, cache_capacity: u64) -> Result<Self, StoreError> {
        let root = root.into();
        for dir in ["artifacts", "index", "runs"] {
            let path = root.join(dir);
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| StoreError::io(&path, e))?;
        }
        tracing::debug!(root = %root.display(), cache_capacity, "opened artifact store");
        Ok(Self {
            root,
            cache: Cache::new(cache_capacity),
            slot_locks: KeyLocks::new(),
            index_locks: KeyLocks::new(),
            tmp_counter: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slot_path(&self, key: &ArtifactKey) -> Result<PathBuf, StoreError> {
        Ok(self
            .root
            .join("artifacts")
            .join(key.symbol.as_str())
            .join(component(&key.stage)?)
            .join(format!("{}.json", key.input_hash)))
    }

    fn index_path(&self, symbol: &Symbol, stage: &str, base: &ContentHash) -> Result<PathBuf, StoreError> {
        Ok(self
            .root
            .join("index")
            .join(symbol.as_str())
            .join(component(stage)?)
            .join(format!("{base}.json")))
    }

    fn runs_dir(&self, symbol: &Symbol) -> PathBuf {
        self.root.join("runs").join(symbol.as_str())
    }

    async fn load_slot(&self, key: &ArtifactKey) -> Result<Arc<Vec<Artifact>>, StoreError> {
        if let Some(cached) = self.cache.get(key).await {
            return Ok(cached);
        }
        let path = self.slot_path(key)?;
        let Some(slot) = read_json::<Slot>(&path).await? else {
            return Ok(Arc::new(Vec::new()));
        };
        if slot.key != *key {
            return Err(StoreError::Corrupt {
                path,
                reason: format!("file holds key {}, expected {key}", slot.key),
            });
        }
        if let Some(stray) = slot.versions.iter().find(|a| a.key != *key) {
            return Err(StoreError::Corrupt {
                path,
                reason: format!("version {} carries key {}", stray.version, stray.key),
            });
        }
        let versions = Arc::new(slot.versions);
        self.cache.insert(key.clone(), Arc::clone(&versions)).await;
        Ok(versions)
    }

    async fn index_hashes(&self, symbol: &Symbol, stage: &str, base: &ContentHash) -> Result<Vec<ContentHash>, StoreError> {
        let path = self.index_path(symbol, stage, base)?;
        Ok(read_json::<BaseIndex>(&path)
            .await?
            .unwrap_or_default()
            .input_hashes)
    }

    async fn add_to_index(&self, artifact: &Artifact) -> Result<(), StoreError> {
        let key = &artifact.key;
        let base = (key.symbol.clone(), key.stage.clone(), artifact.base_hash);
        let _guard = self.index_locks.lock(&base).await;
        let path = self.index_path(&key.symbol, &key.stage, &artifact.base_hash)?;
        let mut index = read_json::<BaseIndex>(&path).await?.unwrap_or_default();
        if index.input_hashes.contains(&key.input_hash) {
            return Ok(());
        }
        index.input_hashes.push(key.input_hash);
        self.write_json(&path, &index).await
    }

    async fn write_json<T: Serialize + Sync>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::serde(path, e))?;
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::InvalidComponent(path.display().to_string()))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent, e))?;

        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = parent.join(format!(".{file_name}.{}.{n}.tmp", std::process::id()));

        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        file.sync_all().await.map_err(|e| StoreError::io(&tmp, e))?;
        drop(file);

        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| StoreError::io(path, e))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn get(
        &self,
        symbol: &Symbol,
        stage: &str,
        input_hash: &ContentHash,
    ) -> Result<Option<Artifact>, StoreError> {
        let key = ArtifactKey::new(symbol.clone(), stage, *input_hash);
        Ok(pick_current(&self.load_slot(&key).await?))
    }

    async fn versions(&self, key: &ArtifactKey) -> Result<Vec<Artifact>, StoreError> {
        Ok(self.load_slot(key).await?.as_ref().clone())
    }

    async fn latest(
        &self,
        symbol: &Symbol,
        stage: &str,
        base_hash: &ContentHash,
    ) -> Result<Option<Artifact>, StoreError> {
        let mut best: Option<Artifact> = None;
        for input_hash in self.index_hashes(symbol, stage, base_hash).await? {
            let key = ArtifactKey::new(symbol.clone(), stage, input_hash);
            let versions = self.load_slot(&key).await?;
            for candidate in versions.iter().filter(|a| a.is_succeeded()) {
                let newer = best.as_ref().map_or(true, |b| {
                    (candidate.produced_at, candidate.version) > (b.produced_at, b.version)
                });
                if newer {
                    best = Some(candidate.clone());
                }
            }
        }
        Ok(best)
    }

    async fn put(&self, artifact: Artifact) -> Result<PutOutcome, StoreError> {
        let key = artifact.key.clone();
        let path = self.slot_path(&key)?;
        let _guard = self.slot_locks.lock(&key).await;

        let versions = self.load_slot(&key).await?;
        let (outcome, append) = resolve_put(&versions, artifact);
        if !append {
            if outcome.is_conflict() {
                tracing::debug!(key = %key, "kept existing artifact over differing payload");
            }
            return Ok(outcome);
        }

        let mut next = versions.as_ref().clone();
        next.push(outcome.artifact().clone());
        let slot = Slot {
            key: key.clone(),
            versions: next,
        };
        self.write_json(&path, &slot).await?;
        self.cache.insert(key, Arc::new(slot.versions)).await;
        self.add_to_index(outcome.artifact()).await?;
        Ok(outcome)
    }

    async fn put_run(&self, record: &RunRecord) -> Result<(), StoreError> {
        let path = self
            .runs_dir(&record.symbol)
            .join(format!("{}.json", record.run_id));
        self.write_json(&path, record).await
    }

    async fn latest_run(&self, symbol: &Symbol) -> Result<Option<RunRecord>, StoreError> {
        Ok(latest_by_start(self.runs(symbol).await?))
    }

    async fn runs(&self, symbol: &Symbol) -> Result<Vec<RunRecord>, StoreError> {
        let dir = self.runs_dir(symbol);
        let mut runs = Vec::new();
        for path in json_files(&dir).await? {
            let Some(record) = read_json::<RunRecord>(&path).await? else {
                continue;
            };
            let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned());
            if record.symbol != *symbol || stem.as_deref() != Some(record.run_id.to_string().as_str()) {
                return Err(StoreError::Corrupt {
                    path,
                    reason: format!("run {} for {} filed under {symbol}", record.run_id, record.symbol),
                });
            }
            runs.push(record);
        }
        runs.sort_by(|a, b| (a.started_at, a.run_id).cmp(&(b.started_at, b.run_id)));
        Ok(runs)
    }

    async fn run_symbols(&self) -> Result<Vec<Symbol>, StoreError> {
        let dir = self.root.join("runs");
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };
        let mut symbols = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| StoreError::io(&dir, e))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            match Symbol::parse(&name) {
                Ok(symbol) if symbol.as_str() == name => symbols.push(symbol),
                _ => tracing::warn!(entry = %name, "ignoring unexpected entry in runs directory"),
            }
        }
        symbols.sort();
        Ok(symbols)
    }
}

/// Stage names become directory names
fn component(name: &str) -> Result<&str, StoreError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(name)
    } else {
        Err(StoreError::InvalidComponent(name.to_string()))
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::serde(path, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// `*.json` files directly under `dir`, temporaries excluded
async fn json_files(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(dir, e)),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| StoreError::io(dir, e))? {
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_rejects_traversal() {
        assert!(component("clean_text").is_ok());
        assert!(component("..").is_err());
        assert!(component("a/b").is_err());
        assert!(component("").is_err());
    }
}
