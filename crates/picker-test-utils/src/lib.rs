//! Testing utilities for the Picker workspace
//!
//! Scripted processors, in-memory adapters, flaky writers and fixture
//! builders shared by integration tests.

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]

use async_trait::async_trait;
use parking_lot::Mutex;
use picker_artifact::{GraphDelta, Payload, PayloadKind, RawDocument, VectorDelta};
use picker_core::config::RetryConfig;
use picker_core::config::{GraphSinkKind, StoreKind, VectorSinkKind};
use picker_core::PipelineConfig;
use picker_sinks::{GraphWriter, MemoryGraphStore, MemoryVectorIndex, VectorWriter, WriterError, WriterErrorKind};
use picker_stages::{
    AdapterStage, ErrorKind, FetchError, FetchParams, ProcessorRegistry, SourceAdapter, StageError,
    StageInput, StageProcessor,
};
use picker_symbol::{Symbol, SymbolProfile};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn symbol(raw: &str) -> Symbol {
    Symbol::parse(raw).unwrap()
}

pub fn profile(raw: &str) -> SymbolProfile {
    SymbolProfile::new(symbol(raw))
}

/// Retry policy with millisecond backoff
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        base_delay_ms: 1,
        multiplier: 2.0,
        max_delay_ms: 5,
    }
}

/// In-memory config for the given symbols with fast retries
pub fn test_config(symbols: &[&str]) -> PipelineConfig {
    let mut config = PipelineConfig::new()
        .with_retry(fast_retry())
        .with_default_timeout_secs(5)
        .with_sinks(GraphSinkKind::Memory, VectorSinkKind::Memory);
    config.store.kind = StoreKind::Memory;
    for raw in symbols {
        config = config.with_symbol(profile(raw));
    }
    config
}

/// Discourse-shaped body with two months of discussion
pub fn forum_body(company: &str) -> Value {
    json!({
        "threads": [{
            "id": 11,
            "title": format!("{company} - specialty play"),
            "posts": [
                { "id": 1, "created_at": "2024-01-10T08:00:00Z",
                  "cooked": "<p>Strong <b>growth</b> and rising profit this year.</p>" },
                { "id": 2, "created_at": "2024-02-03T08:00:00Z",
                  "cooked": "<p>Debt is a risk, margins may decline.</p>" }
            ]
        }]
    })
}

/// Fundamentals that pass the default screening rules
pub fn fundamentals_body(company: &str) -> Value {
    json!({
        "name": company,
        "sector": "Chemicals",
        "metrics": { "ROCE": 24, "ROE": 19, "CAGR": 17, "DE": 0.1, "PE": 18, "FCF": 40 }
    })
}

/// Source adapter serving fixed bodies per symbol
///
/// Symbols without a body are rejected (permanent failure).
#[derive(Debug, Default)]
pub struct FixedAdapter {
    name: String,
    bodies: HashMap<Symbol, Value>,
    calls: AtomicUsize,
}

impl FixedAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with(mut self, raw: &str, body: Value) -> Self {
        self.bodies.insert(symbol(raw), body);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for FixedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, profile: &SymbolProfile, _params: &FetchParams) -> Result<RawDocument, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let body = self.bodies.get(&profile.symbol).cloned().ok_or_else(|| {
            FetchError::new(ErrorKind::Rejected, format!("no {} data for {}", self.name, profile.symbol))
        })?;
        Ok(RawDocument {
            source: "fixed".into(),
            uri: format!("fixed://{}/{}", self.name, profile.symbol),
            content_type: "application/json".into(),
            body,
        })
    }
}

/// Built-in processors plus fixed forum and financial adapters under the
/// names the default pipeline expects
pub fn signal_registry(forum: Arc<FixedAdapter>, financials: Arc<FixedAdapter>) -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::with_builtins();
    registry.register_as("forum_adapter", Arc::new(AdapterStage::new("forum_adapter", forum)));
    registry.register_as(
        "financial_adapter",
        Arc::new(AdapterStage::new("financial_adapter", financials)),
    );
    registry
}

/// One scripted processor call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Ok,
    Transient,
    Permanent,
    /// Sleep, then succeed
    Slow(Duration),
}

/// Processor whose per-symbol behaviour is scripted call by call
///
/// Once a symbol's script runs out every call succeeds. Output is a JSON
/// payload derived only from the stage, symbol and upstream names.
#[derive(Debug)]
pub struct ScriptedProcessor {
    name: String,
    scripts: Mutex<HashMap<Symbol, VecDeque<Step>>>,
    calls: Mutex<HashMap<Symbol, usize>>,
    hold: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedProcessor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            hold: Duration::ZERO,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn script(self, raw: &str, steps: impl IntoIterator<Item = Step>) -> Self {
        self.scripts
            .lock()
            .entry(symbol(raw))
            .or_default()
            .extend(steps);
        self
    }

    /// Every call sleeps this long before answering
    #[must_use]
    pub fn hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    /// Append steps to a symbol's script after construction
    pub fn push(&self, raw: &str, steps: impl IntoIterator<Item = Step>) {
        self.scripts
            .lock()
            .entry(symbol(raw))
            .or_default()
            .extend(steps);
    }

    pub fn calls(&self, raw: &str) -> usize {
        self.calls.lock().get(&symbol(raw)).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    /// Highest number of calls observed in flight at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageProcessor for ScriptedProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn output(&self) -> PayloadKind {
        PayloadKind::Json
    }

    async fn run(&self, input: StageInput) -> Result<Payload, StageError> {
        let symbol = input.profile.symbol.clone();
        *self.calls.lock().entry(symbol.clone()).or_default() += 1;
        let step = self
            .scripts
            .lock()
            .get_mut(&symbol)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Ok);

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);
        if !self.hold.is_zero() {
            tokio::time::sleep(self.hold).await;
        }

        match step {
            Step::Ok => {}
            Step::Transient => return Err(StageError::network(format!("{} flaked", self.name))),
            Step::Permanent => return Err(StageError::malformed(format!("{} rejected input", self.name))),
            Step::Slow(delay) => tokio::time::sleep(delay).await,
        }
        let upstream: Vec<&str> = input.upstream.iter().map(|(name, _)| name.as_str()).collect();
        Ok(Payload::Json {
            value: json!({
                "stage": input.stage,
                "symbol": symbol.as_str(),
                "upstream": upstream,
            }),
        })
    }
}

/// Fails a configurable number of upcoming calls
#[derive(Debug)]
struct Trip {
    remaining: AtomicU32,
    kind: WriterErrorKind,
    calls: AtomicU32,
}

impl Trip {
    fn new() -> Self {
        Self {
            remaining: AtomicU32::new(0),
            kind: WriterErrorKind::Unavailable,
            calls: AtomicU32::new(0),
        }
    }

    fn check(&self, writer: &str) -> Result<(), WriterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tripped = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(WriterError::new(self.kind, writer, "store unavailable"))
        } else {
            Ok(())
        }
    }
}

/// Graph writer that fails its next `n` calls before delegating
#[derive(Debug)]
pub struct FlakyGraphWriter {
    inner: Arc<MemoryGraphStore>,
    trip: Trip,
}

impl FlakyGraphWriter {
    pub fn new(inner: Arc<MemoryGraphStore>) -> Self {
        Self { inner, trip: Trip::new() }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: WriterErrorKind) -> Self {
        self.trip.kind = kind;
        self
    }

    pub fn fail_next(&self, n: u32) {
        self.trip.remaining.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.trip.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GraphWriter for FlakyGraphWriter {
    async fn apply(&self, delta: &GraphDelta) -> Result<(), WriterError> {
        self.trip.check("graph_writer")?;
        self.inner.apply(delta).await
    }
}

/// Vector writer that fails its next `n` calls before delegating
pub struct FlakyVectorWriter {
    inner: Arc<MemoryVectorIndex>,
    trip: Trip,
}

impl FlakyVectorWriter {
    pub fn new(inner: Arc<MemoryVectorIndex>) -> Self {
        Self { inner, trip: Trip::new() }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: WriterErrorKind) -> Self {
        self.trip.kind = kind;
        self
    }

    pub fn fail_next(&self, n: u32) {
        self.trip.remaining.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.trip.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorWriter for FlakyVectorWriter {
    async fn apply(&self, delta: &VectorDelta) -> Result<(), WriterError> {
        self.trip.check("vector_writer")?;
        self.inner.apply(delta).await
    }
}
