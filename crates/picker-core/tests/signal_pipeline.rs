//! The built-in signal pipeline end to end, over fixed source data

use picker_artifact::{NodeRef, StageStatus, TerminalState, WriterStatus};
use picker_core::pipeline::{FINANCIALS, FORUM_POSTS, PARSE_FUNDAMENTALS, SCREEN, SENTIMENT, SUMMARIZE};
use picker_core::{Orchestrator, PipelineContext, RunOptions};
use picker_sinks::{labels, HashingEmbedder, MemoryGraphStore, MemoryVectorIndex};
use picker_store::FsArtifactStore;
use picker_test_utils::{forum_body, fundamentals_body, signal_registry, symbol, test_config, FixedAdapter};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;

struct Fixture {
    forum: Arc<FixedAdapter>,
    financials: Arc<FixedAdapter>,
    graph: Arc<MemoryGraphStore>,
    vectors: Arc<MemoryVectorIndex>,
}

impl Fixture {
    fn new() -> Self {
        let forum = FixedAdapter::new("forum")
            .with("ACME", forum_body("Acme Chemicals"))
            .with("BETA", forum_body("Beta Pumps"));
        // BETA has no financial data
        let financials = FixedAdapter::new("financials").with("ACME", fundamentals_body("Acme Chemicals"));
        Self {
            forum: Arc::new(forum),
            financials: Arc::new(financials),
            graph: Arc::new(MemoryGraphStore::new()),
            vectors: Arc::new(MemoryVectorIndex::new(Arc::new(HashingEmbedder::new(64).unwrap()))),
        }
    }

    fn orchestrator(&self) -> Orchestrator {
        let ctx = PipelineContext::builder(test_config(&["ACME", "BETA"]))
            .registry(signal_registry(Arc::clone(&self.forum), Arc::clone(&self.financials)))
            .graph_writer(self.graph.clone())
            .vector_writer(self.vectors.clone())
            .build()
            .unwrap();
        Orchestrator::new(ctx)
    }
}

#[tokio::test]
async fn complete_symbol_lands_in_both_stores() {
    let fx = Fixture::new();
    let orchestrator = fx.orchestrator();
    let report = orchestrator
        .run_batch(&[symbol("ACME")], RunOptions::new())
        .await
        .unwrap();

    let record = report.record(&symbol("ACME")).unwrap();
    assert_eq!(record.terminal, TerminalState::Complete, "{:?}", record.errors);
    assert!(record.errors.is_empty());
    assert_eq!(record.graph_writer.status, WriterStatus::Succeeded);
    assert_eq!(record.vector_writer.status, WriterStatus::Succeeded);

    let company = fx.graph.node(&NodeRef::new(labels::COMPANY, "ACME")).unwrap();
    assert_eq!(company["name"], "Acme Chemicals");
    assert!(fx.graph.node(&NodeRef::new(labels::SCREENING, "ACME")).is_some());
    assert_eq!(fx.graph.company_metrics(&symbol("ACME"))["ROCE"], 24.0);
    assert!(!fx.vectors.records_for(&symbol("ACME")).is_empty());
}

#[tokio::test]
async fn missing_financials_leave_symbol_partial_without_failing_batch() {
    let fx = Fixture::new();
    let report = fx.orchestrator().run_batch(&[], RunOptions::new()).await.unwrap();
    assert_eq!(report.records.len(), 2);
    assert_eq!(report.records[0].symbol, symbol("ACME"));

    let acme = report.record(&symbol("ACME")).unwrap();
    assert_eq!(acme.terminal, TerminalState::Complete);

    let beta = report.record(&symbol("BETA")).unwrap();
    assert_eq!(beta.terminal, TerminalState::Partial);
    let financials = beta.stage(FINANCIALS).unwrap();
    assert_eq!(financials.status, StageStatus::Failed);
    // rejected input is permanent: no retry
    assert_eq!(financials.attempts.len(), 1);
    assert_eq!(beta.stage(PARSE_FUNDAMENTALS).unwrap().status, StageStatus::Skipped);
    assert_eq!(beta.stage(SCREEN).unwrap().status, StageStatus::Skipped);
    assert_eq!(beta.stage(SENTIMENT).unwrap().status, StageStatus::Succeeded);
    assert_eq!(beta.stage(SUMMARIZE).unwrap().status, StageStatus::Succeeded);
    assert_eq!(beta.graph_writer.status, WriterStatus::NotAttempted);
    assert_eq!(beta.vector_writer.status, WriterStatus::NotAttempted);
    assert!(beta.errors.iter().any(|e| e.stage.as_deref() == Some(FINANCIALS)));

    // nothing of BETA reached the stores
    assert!(fx.graph.node(&NodeRef::new(labels::COMPANY, "BETA")).is_none());
    assert!(fx.vectors.records_for(&symbol("BETA")).is_empty());
}

#[tokio::test]
async fn rerun_reuses_derived_stages_and_rebuilds_identical_deltas() {
    let fx = Fixture::new();
    let orchestrator = fx.orchestrator();
    let acme = [symbol("ACME")];
    let first = orchestrator.run_batch(&acme, RunOptions::new()).await.unwrap();
    let second = orchestrator.run_batch(&acme, RunOptions::new()).await.unwrap();
    let (first, second) = (&first.records[0], &second.records[0]);

    assert_eq!(second.terminal, TerminalState::Complete);
    // sources are fetched again, everything derived from them is cached
    assert_eq!(fx.forum.calls(), 2);
    assert!(!second.stage(FORUM_POSTS).unwrap().cache_hit);
    for stage in [SUMMARIZE, SENTIMENT, PARSE_FUNDAMENTALS, SCREEN] {
        assert!(second.stage(stage).unwrap().cache_hit, "{stage}");
        assert_eq!(
            first.stage(stage).unwrap().artifact_id,
            second.stage(stage).unwrap().artifact_id
        );
    }
    assert_eq!(first.graph_delta_hash, second.graph_delta_hash);
    assert_eq!(first.vector_delta_hash, second.vector_delta_hash);
    assert!(second.warnings.is_empty());
}

async fn fs_orchestrator(root: &Path, fx: &Fixture) -> Orchestrator {
    let store = FsArtifactStore::open(root, 64).await.unwrap();
    let ctx = PipelineContext::builder(test_config(&["ACME"]))
        .registry(signal_registry(Arc::clone(&fx.forum), Arc::clone(&fx.financials)))
        .store(Arc::new(store))
        .build()
        .unwrap();
    Orchestrator::new(ctx)
}

#[tokio::test]
async fn fs_store_carries_artifacts_across_orchestrators() {
    let dir = tempfile::tempdir().unwrap();
    let fx = Fixture::new();

    let first = fs_orchestrator(dir.path(), &fx)
        .await
        .run_batch(&[], RunOptions::new())
        .await
        .unwrap();
    assert!(first.is_complete());

    let restarted = fs_orchestrator(dir.path(), &fx).await;
    let latest = restarted.latest_report(&[]).await.unwrap();
    assert_eq!(latest.records.len(), 1);
    assert_eq!(latest.records[0].run_id, first.records[0].run_id);

    let second = restarted.run_batch(&[], RunOptions::new()).await.unwrap();
    assert!(second.records[0].stage(SUMMARIZE).unwrap().cache_hit);
}
