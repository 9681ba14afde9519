//! Batch orchestrator
//!
//! Drives every requested symbol through the stage graph concurrently:
//! - Ready stages of one symbol run in parallel
//! - Each attempt holds one permit of the shared worker limit
//! - Transient failures are retried with backoff, permanent ones fail the
//!   stage and skip its dependents
//! - Stage outputs go through the artifact store, so unchanged inputs are
//!   served from cache
//! - After a fully successful DAG both writers are invoked and recorded
//!   independently
//!
//! A failing symbol never affects another; only configuration problems make
//! a batch call return `Err`.

use crate::context::PipelineContext;
use crate::delta::StageArtifacts;
use crate::error::PipelineError;
use crate::report::BatchReport;
use crate::retry::{backoff, RetryPolicy};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use picker_artifact::{
    Artifact, ArtifactKey, AttemptRecord, ContentHash, ErrorClass, GraphDelta, InputHasher, Payload, RunId,
    RunRecord, StageStatus, TerminalState, VectorDelta, WriterKind, WriterStatus,
};
use picker_dag::{RunState, StageGraph, StageSpec};
use picker_sinks::{WriterError, WriterErrorKind};
use picker_stages::{StageError, StageInput, StageProcessor};
use picker_store::PutOutcome;
use picker_symbol::{Symbol, SymbolError, SymbolProfile};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Cooperative cancellation: no new attempt starts once cancelled
    pub cancel: CancellationToken,
    /// Reuse the latest succeeded output of non-idempotent stages too
    pub reuse_cache: bool,
}

impl RunOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn reuse_cache(mut self, reuse: bool) -> Self {
        self.reuse_cache = reuse;
        self
    }
}

/// What a symbol task does
enum Plan {
    /// Run the stage graph, then the writers if every stage succeeded
    Stages,
    /// Re-invoke writers against reloaded artifacts
    Writers {
        artifacts: StageArtifacts,
        kinds: Vec<WriterKind>,
    },
}

/// The pipeline orchestrator
#[derive(Debug, Clone)]
pub struct Orchestrator {
    ctx: Arc<PipelineContext>,
    limiter: Arc<Semaphore>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(ctx: PipelineContext) -> Self {
        let permits = ctx.config.orchestrator.worker_limit.max(1);
        Self {
            ctx: Arc::new(ctx),
            limiter: Arc::new(Semaphore::new(permits)),
        }
    }

    #[must_use]
    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Run the stage graph for `symbols` (all registered symbols if empty)
    ///
    /// # Errors
    /// Only for an unregistered symbol; per-symbol failures are recorded
    /// in the returned report
    pub async fn run_batch(
        &self,
        symbols: &[Symbol],
        options: RunOptions,
    ) -> Result<BatchReport, PipelineError> {
        let profiles: Vec<SymbolProfile> = if symbols.is_empty() {
            self.ctx.symbols.iter().cloned().collect()
        } else {
            self.ctx.symbols.select(symbols)?
        };

        let mut report = BatchReport::new();
        info!(batch_id = %report.batch_id, symbols = profiles.len(), "batch started");
        let order = self.ctx.pipeline.graph.order();
        let jobs = profiles
            .into_iter()
            .map(|profile| {
                let record = RunRecord::new(profile.symbol.clone(), order.iter().copied());
                (profile, record, Plan::Stages)
            })
            .collect();
        report.records = self.drive(jobs, &options).await;
        report.finish();
        log_summary(&report);
        Ok(report)
    }

    /// Retry every record of `previous` that is not complete
    ///
    /// Complete records are carried over unchanged. Records of symbols no
    /// longer registered are carried over with the symbol error attached;
    /// the rest of the batch is still retried.
    ///
    /// # Errors
    /// Propagates planning failures other than an unregistered symbol
    pub async fn retry_batch(
        &self,
        previous: &BatchReport,
        options: RunOptions,
    ) -> Result<BatchReport, PipelineError> {
        let mut report = BatchReport::new();
        info!(
            batch_id = %report.batch_id,
            previous = %previous.batch_id,
            retrying = previous.incomplete().len(),
            "retry started"
        );
        let mut jobs = Vec::new();
        // `None` marks a slot filled by the next retried record
        let mut kept: Vec<Option<RunRecord>> = Vec::with_capacity(previous.records.len());
        for record in &previous.records {
            if record.terminal == TerminalState::Complete {
                kept.push(Some(record.clone()));
                continue;
            }
            match self.plan_retry(record).await {
                Ok(job) => {
                    jobs.push(job);
                    kept.push(None);
                }
                Err(PipelineError::Symbol(e)) => {
                    warn!(symbol = %record.symbol, error = %e, "symbol no longer configured, not retried");
                    let mut carried = record.clone();
                    carried.record_error(None, None, ErrorClass::Permanent, e.to_string(), 0);
                    kept.push(Some(carried));
                }
                Err(e) => return Err(e),
            }
        }
        let mut retried = self.drive(jobs, &options.reuse_cache(true)).await.into_iter();
        report.records = previous
            .records
            .iter()
            .zip(kept)
            .map(|(record, kept)| kept.or_else(|| retried.next()).unwrap_or_else(|| record.clone()))
            .collect();
        report.finish();
        log_summary(&report);
        Ok(report)
    }

    /// Retry one record
    ///
    /// If every stage succeeded and only writers failed, the recorded
    /// artifacts are reloaded and only the failed writers run again.
    /// Otherwise the stage graph re-runs with cache reuse.
    ///
    /// # Errors
    /// Returns error if the record's symbol is no longer registered
    pub async fn retry_record(
        &self,
        previous: &RunRecord,
        options: RunOptions,
    ) -> Result<RunRecord, PipelineError> {
        let (profile, record, plan) = self.plan_retry(previous).await?;
        let run = Arc::new(SymbolRun::new(self, profile, options.reuse_cache(true)));
        let span = info_span!("symbol", symbol = %record.symbol, run_id = %record.run_id);
        Ok(run.execute(record, plan).instrument(span).await)
    }

    /// Latest persisted record of each symbol (all registered if empty)
    ///
    /// # Errors
    /// Returns error on an unregistered symbol or a store failure
    pub async fn latest_report(&self, symbols: &[Symbol]) -> Result<BatchReport, PipelineError> {
        let symbols: Vec<Symbol> = if symbols.is_empty() {
            let persisted = self.ctx.store.run_symbols().await?;
            let unregistered: Vec<&Symbol> = persisted
                .iter()
                .filter(|s| !self.ctx.symbols.contains(s))
                .collect();
            if !unregistered.is_empty() {
                debug!(symbols = ?unregistered, "ignoring runs of symbols no longer configured");
            }
            self.ctx
                .symbols
                .symbols()
                .into_iter()
                .filter(|s| persisted.contains(s))
                .collect()
        } else {
            self.ctx
                .symbols
                .select(symbols)?
                .into_iter()
                .map(|p| p.symbol)
                .collect()
        };
        let mut records = Vec::with_capacity(symbols.len());
        for symbol in &symbols {
            if let Some(record) = self.ctx.store.latest_run(symbol).await? {
                records.push(record);
            }
        }
        Ok(BatchReport::from_records(records))
    }

    /// Vector delta of a recorded run, rebuilt from its stored artifacts
    ///
    /// `None` when the run did not succeed in every stage or its artifacts
    /// are gone.
    ///
    /// # Errors
    /// Returns error if the delta builder rejects the artifacts
    pub async fn recorded_vector_delta(&self, record: &RunRecord) -> Result<Option<VectorDelta>, PipelineError> {
        if !record.all_stages_succeeded() {
            return Ok(None);
        }
        let Some(profile) = self.ctx.symbols.get(&record.symbol) else {
            return Ok(None);
        };
        match self.reload(record).await {
            Ok(artifacts) => Ok(Some(self.ctx.delta_builder.vector_delta(profile, &artifacts)?)),
            Err(reason) => {
                warn!(symbol = %record.symbol, %reason, "cannot rebuild vector delta");
                Ok(None)
            }
        }
    }

    async fn plan_retry(
        &self,
        previous: &RunRecord,
    ) -> Result<(SymbolProfile, RunRecord, Plan), PipelineError> {
        let profile = self
            .ctx
            .symbols
            .get(&previous.symbol)
            .cloned()
            .ok_or_else(|| SymbolError::Unknown(previous.symbol.clone()))?;

        let pending = previous.pending_writers();
        if !pending.is_empty() {
            match self.reload(previous).await {
                Ok(artifacts) => {
                    let mut record = previous.clone();
                    record.run_id = RunId::new();
                    record.started_at = Utc::now();
                    record.finished_at = None;
                    record.errors.clear();
                    record.warnings.clear();
                    record.cancelled = false;
                    record.resumed_from = Some(previous.run_id);
                    for stage in record.stages.values_mut() {
                        stage.cache_hit = true;
                        stage.attempts.clear();
                    }
                    let plan = Plan::Writers {
                        artifacts,
                        kinds: pending,
                    };
                    return Ok((profile, record, plan));
                }
                Err(reason) => {
                    warn!(symbol = %previous.symbol, %reason, "cannot reload artifacts, re-running stages");
                }
            }
        }

        let mut record = RunRecord::new(
            previous.symbol.clone(),
            self.ctx.pipeline.graph.order().iter().copied(),
        );
        record.resumed_from = Some(previous.run_id);
        Ok((profile, record, Plan::Stages))
    }

    /// Succeeded artifacts recorded by `previous`, keyed by stage
    async fn reload(&self, previous: &RunRecord) -> Result<StageArtifacts, String> {
        let graph = &self.ctx.pipeline.graph;
        if previous.stages.len() != graph.len() {
            return Err("stage set changed since the recorded run".to_string());
        }
        let mut artifacts = StageArtifacts::new();
        for (stage, outcome) in &previous.stages {
            if !graph.contains(stage) {
                return Err(format!("stage {stage} is no longer configured"));
            }
            let key = outcome
                .key
                .as_ref()
                .ok_or_else(|| format!("stage {stage} has no recorded artifact"))?;
            match self.ctx.store.get_key(key).await {
                Ok(Some(artifact)) if artifact.is_succeeded() => {
                    artifacts.insert(stage.clone(), artifact);
                }
                Ok(_) => return Err(format!("artifact {key} is missing")),
                Err(e) => return Err(e.to_string()),
            }
        }
        Ok(artifacts)
    }

    /// Run jobs concurrently, returning records in job order
    async fn drive(
        &self,
        jobs: Vec<(SymbolProfile, RunRecord, Plan)>,
        options: &RunOptions,
    ) -> Vec<RunRecord> {
        let mut fallback = Vec::with_capacity(jobs.len());
        let mut tasks = JoinSet::new();
        for (idx, (profile, record, plan)) in jobs.into_iter().enumerate() {
            fallback.push(record.clone());
            let run = Arc::new(SymbolRun::new(self, profile, options.clone()));
            let span = info_span!("symbol", symbol = %record.symbol, run_id = %record.run_id);
            tasks.spawn(async move { (idx, run.execute(record, plan).await) }.instrument(span));
        }

        let mut done: Vec<Option<RunRecord>> = vec![None; fallback.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, record)) => done[idx] = Some(record),
                Err(e) => error!(error = %e, "symbol task aborted"),
            }
        }

        done.into_iter()
            .zip(fallback)
            .map(|(record, mut fallback)| {
                record.unwrap_or_else(|| {
                    fallback.record_error(None, None, ErrorClass::Permanent, "symbol task aborted", 0);
                    fallback.finish();
                    fallback
                })
            })
            .collect()
    }
}

fn log_summary(report: &BatchReport) {
    let summary = report.summary();
    info!(
        batch_id = %report.batch_id,
        complete = summary.complete,
        partial = summary.partial,
        failed = summary.failed,
        "batch finished"
    );
}

/// How one stage execution ended
enum StageResult {
    Succeeded { artifact: Artifact, cache_hit: bool },
    Failed,
    Cancelled,
}

/// Everything one stage execution reports back to its symbol
struct StageRun {
    stage: String,
    key: Option<ArtifactKey>,
    attempts: Vec<AttemptRecord>,
    errors: Vec<(ErrorClass, String, u32)>,
    warnings: Vec<String>,
    result: StageResult,
}

impl StageRun {
    fn new(stage: String) -> Self {
        Self {
            stage,
            key: None,
            attempts: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            result: StageResult::Failed,
        }
    }

    fn fail(mut self, message: String) -> Self {
        error!(stage = %self.stage, error = %message, "stage failed");
        self.errors.push((ErrorClass::Permanent, message, 0));
        self.result = StageResult::Failed;
        self
    }

    fn warn(&mut self, message: String) {
        warn!(stage = %self.stage, "{message}");
        self.warnings.push(message);
    }
}

/// Writer invocations of one run
#[derive(Default)]
struct WriterRun {
    attempts: u32,
    succeeded: bool,
    errors: Vec<(ErrorClass, String)>,
}

/// One symbol's execution
struct SymbolRun {
    ctx: Arc<PipelineContext>,
    limiter: Arc<Semaphore>,
    profile: SymbolProfile,
    options: RunOptions,
}

impl SymbolRun {
    fn new(orchestrator: &Orchestrator, profile: SymbolProfile, options: RunOptions) -> Self {
        Self {
            ctx: Arc::clone(&orchestrator.ctx),
            limiter: Arc::clone(&orchestrator.limiter),
            profile,
            options,
        }
    }

    fn cancelled(&self) -> bool {
        self.options.cancel.is_cancelled()
    }

    /// One worker permit, or `None` once cancelled
    async fn permit(&self) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            () = self.options.cancel.cancelled() => None,
            permit = Arc::clone(&self.limiter).acquire_owned() => permit.ok(),
        }
    }

    async fn execute(self: Arc<Self>, mut record: RunRecord, plan: Plan) -> RunRecord {
        match plan {
            Plan::Stages => {
                let artifacts = Arc::clone(&self).run_stages(&mut record).await;
                if record.all_stages_succeeded() {
                    let kinds = [WriterKind::Graph, WriterKind::Vector];
                    self.write(&mut record, &artifacts, &kinds).await;
                }
            }
            Plan::Writers { artifacts, kinds } => {
                info!(writers = ?kinds, "retrying writers only");
                self.write(&mut record, &artifacts, &kinds).await;
            }
        }
        if self.cancelled() && record.resolve_terminal() != TerminalState::Complete {
            record.cancelled = true;
        }
        record.finish();
        info!(terminal = %record.terminal, errors = record.errors.len(), "run finished");
        if let Err(e) = self.ctx.store.put_run(&record).await {
            error!(error = %e, "failed to persist run record");
        }
        record
    }

    /// Drive the stage graph to a settled state
    async fn run_stages(self: Arc<Self>, record: &mut RunRecord) -> StageArtifacts {
        let graph = Arc::clone(&self.ctx.pipeline.graph);
        let run_id = record.run_id;
        let mut state = RunState::new();
        let mut outputs = StageArtifacts::new();
        let mut running = FuturesUnordered::new();

        loop {
            if !self.cancelled() {
                let ready: Vec<String> = graph
                    .ready_stages(&state)
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                for stage in ready {
                    state.set(stage.clone(), StageStatus::Running);
                    record.stage_mut(&stage).status = StageStatus::Running;
                    let upstream: Vec<(String, Artifact)> = graph
                        .upstreams(&stage)
                        .iter()
                        .filter_map(|u| outputs.get(u).map(|a| (u.clone(), a.clone())))
                        .collect();
                    let span = info_span!("stage", stage = %stage);
                    running.push(Arc::clone(&self).run_stage(stage, upstream, run_id).instrument(span));
                }
            }
            let Some(done) = running.next().await else {
                break;
            };
            settle(&graph, &mut state, record, &mut outputs, done);
        }

        for stage in graph.cancel_unstarted(&mut state) {
            debug!(stage = %stage, "stage cancelled before start");
            record.stage_mut(&stage).status = StageStatus::Cancelled;
        }
        debug_assert!(graph.is_settled(&state), "stage left unsettled");
        if record
            .stages
            .values()
            .any(|s| s.status == StageStatus::Cancelled)
        {
            record.cancelled = true;
        }
        outputs
    }

    /// Input hashes of a stage: `(base, key)`; they differ only for
    /// non-idempotent stages, whose key also covers the run id
    fn input_hashes(
        &self,
        spec: &StageSpec,
        processor: &dyn StageProcessor,
        upstream: &[(String, Artifact)],
        run_id: RunId,
    ) -> Result<(ContentHash, ContentHash), String> {
        let mut hasher = InputHasher::new("stage-input/v1")
            .str("stage", &spec.name)
            .str("processor", &processor.fingerprint())
            .str("symbol", self.profile.symbol.as_str());
        for (name, artifact) in upstream {
            let hash = artifact
                .payload_hash
                .as_ref()
                .ok_or_else(|| format!("upstream {name} has no payload"))?;
            hasher = hasher.hash(name, hash);
        }
        let base = hasher.finish();
        let key = if spec.idempotent {
            base
        } else {
            InputHasher::new("stage-run/v1")
                .hash("base", &base)
                .str("run", &run_id.to_string())
                .finish()
        };
        Ok((base, key))
    }

    async fn run_stage(
        self: Arc<Self>,
        stage: String,
        upstream: Vec<(String, Artifact)>,
        run_id: RunId,
    ) -> StageRun {
        let mut out = StageRun::new(stage.clone());
        let pipeline = &self.ctx.pipeline;
        let (Some(spec), Some(processor)) = (pipeline.spec(&stage), pipeline.processor(&stage)) else {
            return out.fail(format!("stage {stage} is not part of the pipeline"));
        };
        let (base_hash, input_hash) =
            match self.input_hashes(spec, processor.as_ref(), &upstream, run_id) {
                Ok(hashes) => hashes,
                Err(message) => return out.fail(message),
            };
        let key = ArtifactKey::new(self.profile.symbol.clone(), &stage, input_hash);
        out.key = Some(key.clone());

        if let Some(artifact) = self.cached(spec, &key, &base_hash, &mut out).await {
            debug!(stage = %stage, artifact = %artifact.id, "cache hit");
            out.result = StageResult::Succeeded {
                artifact,
                cache_hit: true,
            };
            return out;
        }

        let policy = spec
            .max_attempts
            .map_or(self.ctx.retry, |n| self.ctx.retry.with_max_attempts(n));
        let timeout = spec.timeout.unwrap_or_else(|| self.ctx.config.default_timeout());
        let mut input = StageInput::new(self.profile.clone(), &stage);
        for (name, artifact) in upstream {
            if let Some(payload) = artifact.payload {
                input = input.with_upstream(name, payload);
            }
        }

        for attempt in 1..=policy.max_attempts {
            let started_at = Utc::now();
            let clock = Instant::now();
            let outcome = {
                if self.cancelled() {
                    out.result = StageResult::Cancelled;
                    return out;
                }
                let Some(_permit) = self.permit().await else {
                    out.result = StageResult::Cancelled;
                    return out;
                };
                attempt_once(processor.as_ref(), spec, input.clone().with_attempt(attempt), timeout)
                    .await
            };

            let stored = match outcome {
                Ok(payload) => {
                    self.persist(key.clone(), base_hash, run_id, attempt, payload, &mut out)
                        .await
                }
                Err(e) => Err((e.class(), e.to_string())),
            };
            let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);

            match stored {
                Ok(artifact) => {
                    out.attempts.push(AttemptRecord {
                        attempt,
                        started_at,
                        duration_ms,
                        error: None,
                        class: None,
                    });
                    out.result = StageResult::Succeeded {
                        artifact,
                        cache_hit: false,
                    };
                    return out;
                }
                Err((class, message)) => {
                    out.attempts.push(AttemptRecord {
                        attempt,
                        started_at,
                        duration_ms,
                        error: Some(message.clone()),
                        class: Some(class),
                    });
                    out.errors.push((class, message.clone(), attempt));
                    self.record_failure(&key, base_hash, run_id, attempt, &message).await;

                    if !(class.is_transient() && policy.allows_retry(attempt)) {
                        error!(stage = %stage, attempt, %class, error = %message, "stage failed");
                        out.result = StageResult::Failed;
                        return out;
                    }
                    let delay = policy.delay_for(attempt);
                    warn!(
                        stage = %stage,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %message,
                        "transient failure, retrying"
                    );
                    if !backoff(delay, &self.options.cancel).await {
                        out.result = StageResult::Cancelled;
                        return out;
                    }
                }
            }
        }
        out
    }

    /// Cached succeeded artifact for the stage, if reuse applies
    async fn cached(
        &self,
        spec: &StageSpec,
        key: &ArtifactKey,
        base_hash: &ContentHash,
        out: &mut StageRun,
    ) -> Option<Artifact> {
        let lookup = if spec.idempotent {
            self.ctx.store.get_key(key).await
        } else if self.options.reuse_cache {
            self.ctx.store.latest(&key.symbol, &key.stage, base_hash).await
        } else {
            return None;
        };
        match lookup {
            Ok(Some(artifact)) if artifact.is_succeeded() => Some(artifact),
            Ok(_) => None,
            Err(e) => {
                out.warn(format!("cache lookup for {} failed: {e}", spec.name));
                None
            }
        }
    }

    /// Store a successful attempt; the store's existing succeeded artifact
    /// wins a race
    async fn persist(
        &self,
        key: ArtifactKey,
        base_hash: ContentHash,
        run_id: RunId,
        attempt: u32,
        payload: Payload,
        out: &mut StageRun,
    ) -> Result<Artifact, (ErrorClass, String)> {
        let artifact = Artifact::succeeded(key.clone(), base_hash, run_id, attempt, payload)
            .map_err(|e| (ErrorClass::Permanent, PipelineError::from(e).to_string()))?;
        match self.ctx.store.put(artifact).await {
            Ok(PutOutcome::Stored(artifact)) => Ok(artifact),
            Ok(PutOutcome::Existing { artifact, conflict }) => {
                if conflict {
                    let conflict = PipelineError::CacheConflict {
                        key: key.to_string(),
                    };
                    out.warn(format!("{conflict}; kept artifact {}", artifact.id));
                }
                Ok(artifact)
            }
            Err(e) => Err((e.class(), format!("storing artifact: {e}"))),
        }
    }

    async fn record_failure(
        &self,
        key: &ArtifactKey,
        base_hash: ContentHash,
        run_id: RunId,
        attempt: u32,
        message: &str,
    ) {
        let failed = Artifact::failed(key.clone(), base_hash, run_id, attempt, message);
        if let Err(e) = self.ctx.store.put(failed).await {
            debug!(key = %key, error = %e, "could not store failed attempt");
        }
    }

    fn deltas(&self, artifacts: &StageArtifacts) -> Result<(GraphDelta, VectorDelta), PipelineError> {
        let builder = &self.ctx.delta_builder;
        Ok((
            builder.graph_delta(&self.profile, artifacts)?,
            builder.vector_delta(&self.profile, artifacts)?,
        ))
    }

    /// Build deltas and run the requested writers concurrently
    async fn write(&self, record: &mut RunRecord, artifacts: &StageArtifacts, kinds: &[WriterKind]) {
        if self.cancelled() {
            debug!("cancelled before writing");
            return;
        }
        let hashed = self.deltas(artifacts).and_then(|(graph, vector)| {
            let hashes = (graph.content_hash()?, vector.content_hash()?);
            Ok((graph, vector, hashes))
        });
        let (graph_delta, vector_delta, (graph_hash, vector_hash)) = match hashed {
            Ok(built) => built,
            Err(e) => {
                error!(error = %e, "cannot build deltas");
                record.record_error(None, None, e.class(), e.to_string(), 0);
                return;
            }
        };
        for (previous, current, kind) in [
            (record.graph_delta_hash, graph_hash, WriterKind::Graph),
            (record.vector_delta_hash, vector_hash, WriterKind::Vector),
        ] {
            if previous.is_some_and(|p| p != current) {
                let message = format!("{kind} delta differs from the recorded run");
                warn!("{message}");
                record.warnings.push(message);
            }
        }
        record.graph_delta_hash = Some(graph_hash);
        record.vector_delta_hash = Some(vector_hash);

        let graph_job = async {
            if kinds.contains(&WriterKind::Graph) {
                let writer = &self.ctx.graph_writer;
                Some(self.write_with_retry(WriterKind::Graph, || writer.apply(&graph_delta)).await)
            } else {
                None
            }
        };
        let vector_job = async {
            if kinds.contains(&WriterKind::Vector) {
                let writer = &self.ctx.vector_writer;
                Some(self.write_with_retry(WriterKind::Vector, || writer.apply(&vector_delta)).await)
            } else {
                None
            }
        };
        let (graph_run, vector_run) = tokio::join!(graph_job, vector_job);

        for (kind, run) in [(WriterKind::Graph, graph_run), (WriterKind::Vector, vector_run)] {
            let Some(run) = run else { continue };
            let prior = record.writer(kind).attempts;
            for (offset, (class, message)) in (1..).zip(&run.errors) {
                record.record_error(None, Some(kind), *class, message.clone(), prior + offset);
            }
            let outcome = record.writer_mut(kind);
            outcome.attempts = prior + run.attempts;
            if run.succeeded {
                outcome.status = WriterStatus::Succeeded;
                outcome.last_error = None;
            } else if run.attempts > 0 {
                outcome.status = WriterStatus::Failed;
                outcome.last_error = run.errors.last().map(|(_, m)| m.clone());
            }
        }
    }

    async fn write_with_retry<F, Fut>(&self, kind: WriterKind, call: F) -> WriterRun
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), WriterError>>,
    {
        let policy: RetryPolicy = self.ctx.retry;
        let timeout = self.ctx.config.default_timeout();
        let mut run = WriterRun::default();
        for attempt in 1..=policy.max_attempts {
            let result = {
                let Some(_permit) = self.permit().await else {
                    break;
                };
                match tokio::time::timeout(timeout, call()).await {
                    Ok(result) => result,
                    Err(_) => Err(WriterError::new(
                        WriterErrorKind::Timeout,
                        kind.to_string(),
                        format!("no response within {}ms", timeout.as_millis()),
                    )),
                }
            };
            run.attempts = attempt;
            match result {
                Ok(()) => {
                    info!(writer = %kind, attempt, "delta written");
                    run.succeeded = true;
                    break;
                }
                Err(e) => {
                    run.errors.push((e.class(), e.to_string()));
                    if !(e.is_retryable() && policy.allows_retry(attempt)) {
                        error!(writer = %kind, attempt, error = %e, "write failed");
                        break;
                    }
                    let delay = policy.delay_for(attempt);
                    warn!(writer = %kind, attempt, error = %e, "transient write failure, retrying");
                    if !backoff(delay, &self.options.cancel).await {
                        break;
                    }
                }
            }
        }
        run
    }
}

/// One processor call bounded by `timeout`; also checks the output kind
async fn attempt_once(
    processor: &dyn StageProcessor,
    spec: &StageSpec,
    input: StageInput,
    timeout: Duration,
) -> Result<Payload, StageError> {
    match tokio::time::timeout(timeout, processor.run(input)).await {
        Ok(Ok(payload)) if payload.kind() == spec.output => Ok(payload),
        Ok(Ok(payload)) => Err(StageError::contract(format!(
            "{} produced {} but declares {}",
            spec.name,
            payload.kind(),
            spec.output
        ))),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(StageError::timeout(format!(
            "{} exceeded {}ms",
            spec.name,
            timeout.as_millis()
        ))),
    }
}

/// Fold a finished stage into the run state and record
fn settle(
    graph: &StageGraph,
    state: &mut RunState,
    record: &mut RunRecord,
    outputs: &mut StageArtifacts,
    done: StageRun,
) {
    let StageRun {
        stage,
        key,
        attempts,
        errors,
        warnings,
        result,
    } = done;
    for (class, message, attempt) in errors {
        record.record_error(Some(&stage), None, class, message, attempt);
    }
    record.warnings.extend(warnings);

    let outcome = record.stage_mut(&stage);
    outcome.attempts.extend(attempts);
    outcome.key = key;
    match result {
        StageResult::Succeeded {
            artifact,
            cache_hit,
        } => {
            info!(stage = %stage, cache_hit, attempts = outcome.attempts.len(), "stage succeeded");
            state.set(stage.clone(), StageStatus::Succeeded);
            outcome.status = StageStatus::Succeeded;
            outcome.key = Some(artifact.key.clone());
            outcome.artifact_id = Some(artifact.id);
            outcome.cache_hit = cache_hit;
            outputs.insert(stage, artifact);
        }
        StageResult::Failed => {
            outcome.status = StageStatus::Failed;
            for skipped in graph.fail_stage(state, &stage) {
                warn!(stage = %skipped, failed = %stage, "skipped after upstream failure");
                record.stage_mut(&skipped).status = StageStatus::Skipped;
            }
        }
        StageResult::Cancelled => {
            state.set(stage.clone(), StageStatus::Cancelled);
            outcome.status = StageStatus::Cancelled;
        }
    }
}
