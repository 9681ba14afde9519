use picker_artifact::{Artifact, ArtifactKey, ContentHash, Payload, RunId, RunRecord, Summary};
use picker_store::{ArtifactStore, FsArtifactStore, PutOutcome, StoreError};
use picker_symbol::Symbol;
use std::sync::Arc;
use tempfile::TempDir;

fn acme() -> Symbol {
    Symbol::parse("ACME").unwrap()
}

fn summary(text: &str) -> Payload {
    Payload::Summary(Summary {
        text: text.into(),
        method: "extractive".into(),
        source_posts: 3,
        monthly: Default::default(),
    })
}

fn key(input: &[u8]) -> ArtifactKey {
    ArtifactKey::new(acme(), "summarize", ContentHash::compute(input))
}

fn succeeded(key: &ArtifactKey, text: &str) -> Artifact {
    Artifact::succeeded(key.clone(), key.input_hash, RunId::new(), 1, summary(text)).unwrap()
}

async fn open(dir: &TempDir) -> FsArtifactStore {
    FsArtifactStore::open(dir.path(), 100).await.unwrap()
}

#[tokio::test]
async fn artifacts_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let k = key(b"inputs");
    {
        let store = open(&dir).await;
        store.put(succeeded(&k, "strong quarter")).await.unwrap();
    }
    let store = open(&dir).await;
    let artifact = store.get_key(&k).await.unwrap().unwrap();
    assert_eq!(artifact.payload, Some(summary("strong quarter")));
    assert_eq!(artifact.version, 1);
}

#[tokio::test]
async fn failed_versions_accumulate_until_success() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    let k = key(b"inputs");
    let run = RunId::new();

    store
        .put(Artifact::failed(k.clone(), k.input_hash, run, 1, "timeout"))
        .await
        .unwrap();
    store
        .put(Artifact::failed(k.clone(), k.input_hash, run, 2, "timeout"))
        .await
        .unwrap();
    let third = Artifact::succeeded(k.clone(), k.input_hash, run, 3, summary("done")).unwrap();
    store.put(third).await.unwrap();

    let versions = store.versions(&k).await.unwrap();
    assert_eq!(
        versions.iter().map(|a| a.version).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    let current = store.get_key(&k).await.unwrap().unwrap();
    assert!(current.is_succeeded());
    assert_eq!(current.attempt, 3);
}

#[tokio::test]
async fn succeeded_artifact_is_never_overwritten() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    let k = key(b"inputs");
    let first = store.put(succeeded(&k, "one")).await.unwrap();

    let second = store.put(succeeded(&k, "two")).await.unwrap();
    match second {
        PutOutcome::Existing { artifact, conflict } => {
            assert!(conflict);
            assert_eq!(artifact.id, first.artifact().id);
        }
        PutOutcome::Stored(_) => panic!("succeeded artifact was replaced"),
    }
    assert_eq!(store.versions(&k).await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_puts_for_one_key_keep_a_single_winner() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open(&dir).await);
    let k = key(b"race");

    let mut tasks = Vec::new();
    for i in 0..8 {
        let store = Arc::clone(&store);
        let artifact = succeeded(&k, &format!("payload {i}"));
        tasks.push(tokio::spawn(async move { store.put(artifact).await }));
    }
    let outcomes: Vec<PutOutcome> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    let stored = outcomes
        .iter()
        .filter(|o| matches!(o, PutOutcome::Stored(_)))
        .count();
    assert_eq!(stored, 1);
    let winner = store.get_key(&k).await.unwrap().unwrap();
    assert!(outcomes.iter().all(|o| o.artifact().id == winner.id));
}

#[tokio::test]
async fn latest_finds_nonced_versions_across_reopen() {
    let dir = TempDir::new().unwrap();
    let base = ContentHash::compute(b"base");
    {
        let store = open(&dir).await;
        let k = key(b"nonce-1");
        let artifact = Artifact::succeeded(k, base, RunId::new(), 1, summary("llm output")).unwrap();
        store.put(artifact).await.unwrap();
    }
    let store = open(&dir).await;
    let latest = store.latest(&acme(), "summarize", &base).await.unwrap().unwrap();
    assert_eq!(latest.payload, Some(summary("llm output")));
}

#[tokio::test]
async fn run_records_roundtrip() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    let first = RunRecord::new(acme(), ["clean_text"]);
    store.put_run(&first).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let second = RunRecord::new(acme(), ["clean_text"]);
    store.put_run(&second).await.unwrap();

    assert_eq!(store.runs(&acme()).await.unwrap().len(), 2);
    let latest = store.latest_run(&acme()).await.unwrap().unwrap();
    assert_eq!(latest.run_id, second.run_id);
    assert_eq!(store.run_symbols().await.unwrap(), vec![acme()]);
    assert!(store
        .latest_run(&Symbol::parse("BETA").unwrap())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn mismatched_slot_is_reported_corrupt() {
    let dir = TempDir::new().unwrap();
    let k = key(b"one");
    let other = key(b"two");
    {
        let store = open(&dir).await;
        store.put(succeeded(&k, "x")).await.unwrap();
    }
    let from = dir
        .path()
        .join("artifacts/ACME/summarize")
        .join(format!("{}.json", k.input_hash));
    let to = dir
        .path()
        .join("artifacts/ACME/summarize")
        .join(format!("{}.json", other.input_hash));
    std::fs::copy(from, to).unwrap();

    let store = open(&dir).await;
    let err = store.get_key(&other).await.unwrap_err();
    assert!(matches!(err, StoreError::Corrupt { .. }));
}

#[tokio::test]
async fn unsafe_stage_names_are_rejected() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    let err = store
        .get(&acme(), "../escape", &ContentHash::compute(b"x"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidComponent(_)));
}
