//! Stage processor and source adapter contracts

use crate::error::{FetchError, StageError};
use async_trait::async_trait;
use picker_artifact::{
    CleanText, Fundamentals, Payload, PayloadKind, RawDocument, SentimentReport, Summary,
};
use picker_symbol::SymbolProfile;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything a processor sees for one execution
#[derive(Debug, Clone)]
pub struct StageInput {
    pub profile: SymbolProfile,
    pub stage: String,
    /// 1-based attempt number within the run
    pub attempt: u32,
    /// Upstream payloads in declared dependency order
    pub upstream: Vec<(String, Payload)>,
}

impl StageInput {
    #[must_use]
    pub fn new(profile: SymbolProfile, stage: impl Into<String>) -> Self {
        Self {
            profile,
            stage: stage.into(),
            attempt: 1,
            upstream: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_upstream(mut self, stage: impl Into<String>, payload: Payload) -> Self {
        self.upstream.push((stage.into(), payload));
        self
    }

    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// First upstream payload of the given kind
    #[must_use]
    pub fn find(&self, kind: PayloadKind) -> Option<&Payload> {
        self.upstream
            .iter()
            .map(|(_, p)| p)
            .find(|p| p.kind() == kind)
    }

    fn require(&self, kind: PayloadKind) -> Result<&Payload, StageError> {
        self.find(kind).ok_or_else(|| {
            StageError::contract(format!("stage {} expects a {kind} input", self.stage))
        })
    }

    /// # Errors
    /// `ContractViolation` when no upstream produced a raw document
    pub fn raw_document(&self) -> Result<&RawDocument, StageError> {
        self.require(PayloadKind::RawDocument)?
            .as_raw_document()
            .ok_or_else(|| StageError::internal("payload kind mismatch"))
    }

    /// # Errors
    /// `ContractViolation` when no upstream produced clean text
    pub fn clean_text(&self) -> Result<&CleanText, StageError> {
        self.require(PayloadKind::CleanText)?
            .as_clean_text()
            .ok_or_else(|| StageError::internal("payload kind mismatch"))
    }

    /// # Errors
    /// `ContractViolation` when no upstream produced fundamentals
    pub fn fundamentals(&self) -> Result<&Fundamentals, StageError> {
        self.require(PayloadKind::Fundamentals)?
            .as_fundamentals()
            .ok_or_else(|| StageError::internal("payload kind mismatch"))
    }

    #[must_use]
    pub fn sentiment(&self) -> Option<&SentimentReport> {
        self.find(PayloadKind::Sentiment).and_then(Payload::as_sentiment)
    }

    #[must_use]
    pub fn summary(&self) -> Option<&Summary> {
        self.find(PayloadKind::Summary).and_then(Payload::as_summary)
    }
}

/// Transforms upstream payloads into one output payload
///
/// Implementations are stateless given their input. Concrete variants are
/// selected by name from configuration through the processor registry.
#[async_trait]
pub trait StageProcessor: Send + Sync {
    /// Variant name (`text_cleaner`, `rule_screener`, ...)
    fn name(&self) -> &str;

    /// Payload kind every successful run produces
    fn output(&self) -> PayloadKind;

    /// Parameters that change the output for identical inputs; folded into
    /// the stage input hash so a reconfigured processor misses the cache
    fn fingerprint(&self) -> String {
        self.name().to_string()
    }

    async fn run(&self, input: StageInput) -> Result<Payload, StageError>;
}

/// Adapter call parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchParams {
    pub attempt: u32,
    pub options: BTreeMap<String, String>,
}

/// Pulls raw documents for a company from an external source
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn fingerprint(&self) -> String {
        self.name().to_string()
    }

    async fn fetch(
        &self,
        profile: &SymbolProfile,
        params: &FetchParams,
    ) -> Result<RawDocument, FetchError>;
}

/// Runs a [`SourceAdapter`] as a root stage
#[derive(Clone)]
pub struct AdapterStage {
    name: String,
    adapter: Arc<dyn SourceAdapter>,
    options: BTreeMap<String, String>,
}

impl AdapterStage {
    #[must_use]
    pub fn new(name: impl Into<String>, adapter: Arc<dyn SourceAdapter>) -> Self {
        Self {
            name: name.into(),
            adapter,
            options: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

impl std::fmt::Debug for AdapterStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterStage")
            .field("name", &self.name)
            .field("adapter", &self.adapter.name())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StageProcessor for AdapterStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn output(&self) -> PayloadKind {
        PayloadKind::RawDocument
    }

    fn fingerprint(&self) -> String {
        self.adapter.fingerprint()
    }

    async fn run(&self, input: StageInput) -> Result<Payload, StageError> {
        let params = FetchParams {
            attempt: input.attempt,
            options: self.options.clone(),
        };
        let document = self.adapter.fetch(&input.profile, &params).await?;
        Ok(Payload::RawDocument(document))
    }
}
