//! Orchestrator scenarios over scripted processors

use picker_artifact::{ErrorClass, StageStatus, TerminalState, WriterKind, WriterStatus};
use picker_core::config::RetryConfig;
use picker_core::{
    ContextBuilder, Orchestrator, PipelineConfig, PipelineContext, PipelineError, RunOptions, StageConfig,
};
use picker_sinks::{HashingEmbedder, MemoryGraphStore, MemoryVectorIndex};
use picker_stages::ProcessorRegistry;
use picker_store::{ArtifactStore, MemoryArtifactStore};
use picker_test_utils::{
    symbol, test_config, FlakyGraphWriter, FlakyVectorWriter, ScriptedProcessor, Step,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

struct Harness {
    processors: Vec<Arc<ScriptedProcessor>>,
    graph: Arc<FlakyGraphWriter>,
    vectors: Arc<FlakyVectorWriter>,
}

impl Harness {
    fn new(processors: Vec<ScriptedProcessor>) -> Self {
        let embedder = Arc::new(HashingEmbedder::new(32).unwrap());
        Self {
            processors: processors.into_iter().map(Arc::new).collect(),
            graph: Arc::new(FlakyGraphWriter::new(Arc::new(MemoryGraphStore::new()))),
            vectors: Arc::new(FlakyVectorWriter::new(Arc::new(MemoryVectorIndex::new(embedder)))),
        }
    }

    fn processor(&self, name: &str) -> &ScriptedProcessor {
        self.processors
            .iter()
            .find(|p| picker_stages::StageProcessor::name(p.as_ref()) == name)
            .unwrap()
    }

    fn context(&self, config: PipelineConfig) -> ContextBuilder {
        let mut registry = ProcessorRegistry::new();
        for processor in &self.processors {
            registry.register(processor.clone());
        }
        PipelineContext::builder(config)
            .registry(registry)
            .graph_writer(self.graph.clone())
            .vector_writer(self.vectors.clone())
    }

    fn orchestrator(&self, config: PipelineConfig) -> Orchestrator {
        Orchestrator::new(self.context(config).build().unwrap())
    }
}

/// `fetch -> derive`
fn chain() -> Vec<StageConfig> {
    vec![
        StageConfig::new("fetch", "fetch"),
        StageConfig::new("derive", "derive").after(["fetch"]),
    ]
}

#[tokio::test]
async fn stages_run_in_dependency_order_and_complete() {
    let harness = Harness::new(vec![ScriptedProcessor::new("fetch"), ScriptedProcessor::new("derive")]);
    let orchestrator = harness.orchestrator(test_config(&["ACME"]).with_stages(chain()));
    let report = orchestrator.run_batch(&[], RunOptions::new()).await.unwrap();

    let record = &report.records[0];
    assert_eq!(record.terminal, TerminalState::Complete);
    let order: Vec<&str> = record.stages.keys().map(String::as_str).collect();
    assert_eq!(order, ["fetch", "derive"]);
    assert!(record.stages.values().all(|s| s.attempts.len() == 1));
    assert_eq!(harness.graph.calls(), 1);
    assert_eq!(harness.vectors.calls(), 1);
}

#[tokio::test]
async fn cyclic_stage_config_is_fatal_before_any_work() {
    let stages = vec![
        StageConfig::new("a", "a").after(["b"]),
        StageConfig::new("b", "b").after(["a"]),
    ];
    let mut registry = ProcessorRegistry::new();
    registry.register(Arc::new(ScriptedProcessor::new("a")));
    registry.register(Arc::new(ScriptedProcessor::new("b")));
    let err = PipelineContext::builder(test_config(&["ACME"]).with_stages(stages))
        .registry(registry)
        .build()
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, PipelineError::Dag(_)));
}

#[tokio::test]
async fn unknown_symbol_is_rejected() {
    let harness = Harness::new(vec![ScriptedProcessor::new("fetch"), ScriptedProcessor::new("derive")]);
    let orchestrator = harness.orchestrator(test_config(&["ACME"]).with_stages(chain()));
    let err = orchestrator
        .run_batch(&[symbol("ZZZZ")], RunOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Symbol(_)));
}

#[tokio::test]
async fn timeouts_are_retried_until_success() {
    let fetch = ScriptedProcessor::new("fetch").script(
        "ACME",
        [Step::Slow(Duration::from_secs(3)), Step::Slow(Duration::from_secs(3))],
    );
    let harness = Harness::new(vec![fetch, ScriptedProcessor::new("derive")]);
    let stages = vec![
        StageConfig::new("fetch", "fetch").timeout_secs(1),
        StageConfig::new("derive", "derive").after(["fetch"]),
    ];
    let orchestrator = harness.orchestrator(test_config(&["ACME"]).with_stages(stages));
    let record = &orchestrator.run_batch(&[], RunOptions::new()).await.unwrap().records[0];

    assert_eq!(record.terminal, TerminalState::Complete);
    let attempts = &record.stage("fetch").unwrap().attempts;
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts[0].class, Some(ErrorClass::Transient));
    assert_eq!(attempts[1].class, Some(ErrorClass::Transient));
    assert!(attempts[2].succeeded());
    // failures stay on the record even though the run completed
    assert_eq!(record.errors.len(), 2);
}

#[tokio::test]
async fn exhausted_retries_fail_the_stage() {
    let fetch = ScriptedProcessor::new("fetch").script("ACME", [Step::Transient; 5]);
    let harness = Harness::new(vec![fetch, ScriptedProcessor::new("derive")]);
    let orchestrator = harness.orchestrator(test_config(&["ACME"]).with_stages(chain()));
    let record = &orchestrator.run_batch(&[], RunOptions::new()).await.unwrap().records[0];

    assert_eq!(record.terminal, TerminalState::Failed);
    assert_eq!(record.attempts_for("fetch"), 3);
    assert_eq!(record.stage("derive").unwrap().status, StageStatus::Skipped);
    assert_eq!(harness.processor("derive").total_calls(), 0);
}

#[tokio::test]
async fn permanent_failure_skips_only_dependents() {
    // left and right are independent roots; join needs both
    let stages = vec![
        StageConfig::new("left", "left"),
        StageConfig::new("right", "right"),
        StageConfig::new("tail", "tail").after(["right"]),
        StageConfig::new("join", "join").after(["left", "right"]),
    ];
    let left = ScriptedProcessor::new("left").script("BETA", [Step::Permanent]);
    let harness = Harness::new(vec![
        left,
        ScriptedProcessor::new("right"),
        ScriptedProcessor::new("tail"),
        ScriptedProcessor::new("join"),
    ]);
    let orchestrator = harness.orchestrator(test_config(&["ACME", "BETA"]).with_stages(stages));
    let report = orchestrator.run_batch(&[], RunOptions::new()).await.unwrap();

    assert_eq!(report.record(&symbol("ACME")).unwrap().terminal, TerminalState::Complete);
    let beta = report.record(&symbol("BETA")).unwrap();
    assert_eq!(beta.terminal, TerminalState::Partial);
    assert_eq!(beta.attempts_for("left"), 1);
    assert_eq!(beta.stage("left").unwrap().status, StageStatus::Failed);
    assert_eq!(beta.stage("join").unwrap().status, StageStatus::Skipped);
    assert_eq!(beta.stage("right").unwrap().status, StageStatus::Succeeded);
    assert_eq!(beta.stage("tail").unwrap().status, StageStatus::Succeeded);
    assert_eq!(beta.errors[0].class, ErrorClass::Permanent);
    assert_eq!(report.summary().partial, 1);
}

#[tokio::test]
async fn retry_recomputes_only_failed_stages() {
    let derive = ScriptedProcessor::new("derive").script("ACME", [Step::Permanent]);
    let harness = Harness::new(vec![ScriptedProcessor::new("fetch"), derive]);
    let orchestrator = harness.orchestrator(test_config(&["ACME"]).with_stages(chain()));
    let first = orchestrator.run_batch(&[], RunOptions::new()).await.unwrap();
    assert_eq!(first.records[0].terminal, TerminalState::Partial);

    let second = orchestrator.retry_batch(&first, RunOptions::new()).await.unwrap();
    let record = &second.records[0];
    assert_eq!(record.terminal, TerminalState::Complete);
    assert_eq!(record.resumed_from, Some(first.records[0].run_id));
    assert!(record.stage("fetch").unwrap().cache_hit);
    assert_eq!(harness.processor("fetch").calls("ACME"), 1);
    assert_eq!(harness.processor("derive").calls("ACME"), 2);
}

#[tokio::test]
async fn retry_keeps_symbols_dropped_from_config() {
    let fetch = ScriptedProcessor::new("fetch")
        .script("ACME", [Step::Permanent])
        .script("BETA", [Step::Permanent]);
    let harness = Harness::new(vec![fetch, ScriptedProcessor::new("derive")]);
    let first = harness
        .orchestrator(test_config(&["ACME", "BETA"]).with_stages(chain()))
        .run_batch(&[], RunOptions::new())
        .await
        .unwrap();
    assert_eq!(first.summary().failed, 2);

    // BETA left the watchlist between the runs
    let orchestrator = harness.orchestrator(test_config(&["ACME"]).with_stages(chain()));
    let retried = orchestrator.retry_batch(&first, RunOptions::new()).await.unwrap();
    assert_eq!(retried.records.len(), 2);

    let acme = retried.record(&symbol("ACME")).unwrap();
    assert_eq!(acme.terminal, TerminalState::Complete);
    assert_eq!(acme.resumed_from, Some(first.record(&symbol("ACME")).unwrap().run_id));

    let before = first.record(&symbol("BETA")).unwrap();
    let beta = retried.record(&symbol("BETA")).unwrap();
    assert_eq!(beta.run_id, before.run_id);
    assert_eq!(beta.terminal, TerminalState::Failed);
    assert_eq!(beta.errors.len(), before.errors.len() + 1);
    let dropped = beta.errors.last().unwrap();
    assert!(dropped.stage.is_none());
    assert!(dropped.message.contains("BETA"), "{}", dropped.message);
    assert_eq!(harness.processor("fetch").calls("BETA"), 1);
}

#[tokio::test]
async fn failed_graph_write_retries_without_recomputing_stages() {
    let harness = Harness::new(vec![ScriptedProcessor::new("fetch"), ScriptedProcessor::new("derive")]);
    harness.graph.fail_next(10);
    let orchestrator = harness.orchestrator(test_config(&["ACME"]).with_stages(chain()));
    let first = orchestrator.run_batch(&[], RunOptions::new()).await.unwrap();
    let failed = &first.records[0];

    assert_eq!(failed.terminal, TerminalState::Partial);
    assert!(failed.all_stages_succeeded());
    assert_eq!(failed.graph_writer.status, WriterStatus::Failed);
    assert_eq!(failed.graph_writer.attempts, 3);
    assert_eq!(failed.vector_writer.status, WriterStatus::Succeeded);
    assert_eq!(failed.pending_writers(), [WriterKind::Graph]);

    harness.graph.fail_next(0);
    let retried = orchestrator.retry_record(failed, RunOptions::new()).await.unwrap();
    assert_eq!(retried.terminal, TerminalState::Complete);
    assert_eq!(retried.graph_writer.attempts, 4);
    assert_eq!(retried.graph_delta_hash, failed.graph_delta_hash);
    assert!(retried.warnings.is_empty());
    // stages were not re-run and the vector index was not touched again
    assert_eq!(harness.processor("fetch").total_calls(), 1);
    assert_eq!(harness.processor("derive").total_calls(), 1);
    assert_eq!(harness.vectors.calls(), 1);
    assert_eq!(harness.graph.calls(), 4);
}

#[tokio::test]
async fn non_idempotent_stage_reruns_unless_cache_reuse_requested() {
    let stages = vec![StageConfig::new("fetch", "fetch").idempotent(false)];
    let harness = Harness::new(vec![ScriptedProcessor::new("fetch")]);
    let orchestrator = harness.orchestrator(test_config(&["ACME"]).with_stages(stages));
    let fetch = harness.processor("fetch");

    orchestrator.run_batch(&[], RunOptions::new()).await.unwrap();
    orchestrator.run_batch(&[], RunOptions::new()).await.unwrap();
    assert_eq!(fetch.calls("ACME"), 2);

    let reused = orchestrator
        .run_batch(&[], RunOptions::new().reuse_cache(true))
        .await
        .unwrap();
    assert_eq!(fetch.calls("ACME"), 2);
    assert!(reused.records[0].stage("fetch").unwrap().cache_hit);
}

#[tokio::test]
async fn cancellation_leaves_partial_record_that_resumes() {
    let fetch = ScriptedProcessor::new("fetch").hold(Duration::from_millis(300));
    let harness = Harness::new(vec![fetch, ScriptedProcessor::new("derive")]);
    let orchestrator = harness.orchestrator(test_config(&["ACME"]).with_stages(chain()));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let first = orchestrator
        .run_batch(&[], RunOptions::new().with_cancel(cancel))
        .await
        .unwrap();
    let record = &first.records[0];
    assert!(record.cancelled);
    assert_eq!(record.terminal, TerminalState::Partial);
    // the in-flight attempt finished, nothing new started
    assert_eq!(record.stage("fetch").unwrap().status, StageStatus::Succeeded);
    assert_eq!(record.stage("derive").unwrap().status, StageStatus::Cancelled);
    assert_eq!(record.graph_writer.status, WriterStatus::NotAttempted);

    let resumed = orchestrator.retry_batch(&first, RunOptions::new()).await.unwrap();
    let record = &resumed.records[0];
    assert_eq!(record.terminal, TerminalState::Complete);
    assert!(!record.cancelled);
    assert_eq!(harness.processor("fetch").calls("ACME"), 1);
    assert_eq!(harness.processor("derive").calls("ACME"), 1);
}

#[tokio::test]
async fn worker_limit_bounds_concurrent_attempts() {
    let fetch = ScriptedProcessor::new("fetch").hold(Duration::from_millis(40));
    let harness = Harness::new(vec![fetch]);
    let symbols = ["AAAA", "BBBB", "CCCC", "DDDD", "EEEE", "FFFF"];
    let config = test_config(&symbols)
        .with_worker_limit(2)
        .with_stages(vec![StageConfig::new("fetch", "fetch")]);
    let report = harness
        .orchestrator(config)
        .run_batch(&[], RunOptions::new())
        .await
        .unwrap();

    assert!(report.is_complete());
    let fetch = harness.processor("fetch");
    assert_eq!(fetch.total_calls(), symbols.len());
    assert!(fetch.peak_concurrency() <= 2);
    assert!(fetch.peak_concurrency() >= 1);
}

#[tokio::test]
async fn backoff_sleeps_release_the_worker_slot() {
    let fetch = ScriptedProcessor::new("fetch")
        .script("ACME", [Step::Transient])
        .script("BETA", [Step::Transient]);
    let harness = Harness::new(vec![fetch]);
    let config = test_config(&["ACME", "BETA"])
        .with_worker_limit(1)
        .with_retry(RetryConfig {
            max_attempts: 2,
            base_delay_ms: 800,
            multiplier: 1.0,
            max_delay_ms: 800,
        })
        .with_stages(vec![StageConfig::new("fetch", "fetch")]);
    let orchestrator = harness.orchestrator(config);

    let started = Instant::now();
    let report = orchestrator.run_batch(&[], RunOptions::new()).await.unwrap();
    let elapsed = started.elapsed();

    assert!(report.is_complete());
    assert_eq!(harness.processor("fetch").total_calls(), 4);
    assert_eq!(harness.processor("fetch").peak_concurrency(), 1);
    // the two 800ms backoffs overlap; holding the single slot would chain them
    assert!(elapsed >= Duration::from_millis(800), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1400), "{elapsed:?}");
}

#[tokio::test]
async fn latest_report_reflects_persisted_runs() {
    let harness = Harness::new(vec![ScriptedProcessor::new("fetch"), ScriptedProcessor::new("derive")]);
    let orchestrator = harness.orchestrator(test_config(&["ACME", "BETA"]).with_stages(chain()));
    assert!(orchestrator.latest_report(&[]).await.unwrap().records.is_empty());

    orchestrator.run_batch(&[symbol("BETA")], RunOptions::new()).await.unwrap();
    let latest = orchestrator.latest_report(&[]).await.unwrap();
    assert_eq!(latest.records.len(), 1);
    assert_eq!(latest.records[0].symbol, symbol("BETA"));
}

#[tokio::test]
async fn latest_report_ignores_runs_of_removed_symbols() {
    let harness = Harness::new(vec![ScriptedProcessor::new("fetch"), ScriptedProcessor::new("derive")]);
    let store: Arc<dyn ArtifactStore> = Arc::new(MemoryArtifactStore::new());
    let both = harness
        .context(test_config(&["ACME", "BETA"]).with_stages(chain()))
        .store(store.clone())
        .build()
        .unwrap();
    Orchestrator::new(both).run_batch(&[], RunOptions::new()).await.unwrap();
    assert_eq!(store.run_symbols().await.unwrap().len(), 2);

    let acme_only = harness
        .context(test_config(&["ACME"]).with_stages(chain()))
        .store(store)
        .build()
        .unwrap();
    let latest = Orchestrator::new(acme_only).latest_report(&[]).await.unwrap();
    assert_eq!(latest.records.len(), 1);
    assert_eq!(latest.records[0].symbol, symbol("ACME"));
}

#[tokio::test]
async fn vector_delta_is_rebuilt_only_for_fully_succeeded_runs() {
    let derive = ScriptedProcessor::new("derive").script("BETA", [Step::Permanent]);
    let harness = Harness::new(vec![ScriptedProcessor::new("fetch"), derive]);
    let orchestrator = harness.orchestrator(test_config(&["ACME", "BETA"]).with_stages(chain()));
    let report = orchestrator.run_batch(&[], RunOptions::new()).await.unwrap();

    let acme = report.record(&symbol("ACME")).unwrap();
    let delta = orchestrator.recorded_vector_delta(acme).await.unwrap().unwrap();
    assert_eq!(delta.symbol, symbol("ACME"));
    assert_eq!(delta.content_hash().unwrap(), acme.vector_delta_hash.unwrap());

    let beta = report.record(&symbol("BETA")).unwrap();
    assert!(orchestrator.recorded_vector_delta(beta).await.unwrap().is_none());
}
