//! Pipeline configuration
//!
//! Loaded from TOML or YAML (chosen by file extension). Every section has
//! defaults, so an empty file plus a `symbols` list is a valid config.

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use picker_artifact::PayloadKind;
use picker_stages::processors::default_rules;
use picker_stages::{LogisticScorer, ScreenRule};
use picker_symbol::{SymbolProfile, SymbolRegistry};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Processor names a config file may reference
pub const KNOWN_PROCESSORS: &[&str] = &[
    "forum_adapter",
    "financial_adapter",
    "text_cleaner",
    "extractive_summarizer",
    "llm_summarizer",
    "lexicon_sentiment",
    "fundamentals_parser",
    "rule_screener",
];

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub project: ProjectConfig,
    pub symbols: Vec<SymbolProfile>,
    pub orchestrator: OrchestratorConfig,
    pub retry: RetryConfig,
    /// Empty means the built-in signal pipeline
    pub stages: Vec<StageConfig>,
    pub forum: ForumConfig,
    pub financial_api: FinancialApiConfig,
    pub llm: LlmConfig,
    pub store: StoreConfig,
    pub graph: GraphSinkConfig,
    pub vector_index: VectorSinkConfig,
    pub embedding: EmbeddingConfig,
    pub screening: ScreeningConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
    pub data_dir: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "picker".to_string(),
            data_dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Concurrent stage attempts and writer calls across all symbols
    pub worker_limit: usize,
    pub default_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_limit: 4,
            default_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

/// One configured stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,
    #[serde(default)]
    pub after: Vec<String>,
    pub processor: String,
    /// Payload kinds consumed; checked against upstream outputs
    #[serde(default)]
    pub inputs: Vec<PayloadKind>,
    /// Defaults to true, except for adapter and model-backed processors
    #[serde(default)]
    pub idempotent: Option<bool>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl StageConfig {
    #[must_use]
    pub fn new(name: impl Into<String>, processor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            after: Vec::new(),
            processor: processor.into(),
            inputs: Vec::new(),
            idempotent: None,
            timeout_secs: None,
            max_attempts: None,
        }
    }

    #[must_use]
    pub fn after<I, S>(mut self, upstreams: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after = upstreams.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn inputs(mut self, kinds: impl IntoIterator<Item = PayloadKind>) -> Self {
        self.inputs = kinds.into_iter().collect();
        self
    }

    #[must_use]
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = Some(idempotent);
        self
    }

    #[must_use]
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Idempotency after applying the per-processor default
    #[must_use]
    pub fn is_idempotent(&self) -> bool {
        self.idempotent.unwrap_or(!matches!(
            self.processor.as_str(),
            "forum_adapter" | "financial_adapter" | "llm_summarizer"
        ))
    }
}

/// Where an adapter reads from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Live HTTP source
    #[default]
    Http,
    /// JSON fixtures under `fixtures_dir/<SYMBOL>/`
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForumConfig {
    pub source: SourceKind,
    /// Discourse category URL
    pub base_url: String,
    pub max_pages: u32,
    /// Company suffixes kept when deriving names from thread titles
    pub company_suffixes: Vec<String>,
    pub fixtures_dir: Option<PathBuf>,
    pub update_frequency: String,
}

impl Default for ForumConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Http,
            base_url: "https://forum.valuepickr.com/c/stock-opportunities".to_string(),
            max_pages: 5,
            company_suffixes: vec!["Ltd".to_string(), "Limited".to_string()],
            fixtures_dir: None,
            update_frequency: "weekly".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinancialApiConfig {
    pub source: SourceKind,
    pub provider: String,
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub fixtures_dir: Option<PathBuf>,
    pub update_frequency: String,
}

impl Default for FinancialApiConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Http,
            provider: "eodhd".to_string(),
            base_url: picker_stages::adapters::eodhd::DEFAULT_BASE_URL.to_string(),
            api_key_env: "EODHD_API_KEY".to_string(),
            fixtures_dir: None,
            update_frequency: "weekly".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    /// Discussion text sent to the model is cut to this many characters
    pub max_input_chars: usize,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "LLM_API_KEY".to_string(),
            max_input_chars: 3500,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Fs,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    /// Defaults to `<data_dir>/store`
    pub root: Option<PathBuf>,
    pub cache_capacity: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Fs,
            root: None,
            cache_capacity: 10_000,
        }
    }
}

/// Knowledge graph backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphSinkKind {
    /// Append-only delta log replayed on open
    #[default]
    Fs,
    Memory,
    Neo4j,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSinkConfig {
    pub kind: GraphSinkKind,
    /// Defaults to `<data_dir>/graph.jsonl`
    pub path: Option<PathBuf>,
    pub uri: String,
    pub user: String,
    pub password_env: String,
    pub max_connections: usize,
}

impl Default for GraphSinkConfig {
    fn default() -> Self {
        Self {
            kind: GraphSinkKind::Fs,
            path: None,
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password_env: "NEO4J_PASSWORD".to_string(),
            max_connections: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorSinkKind {
    #[default]
    Fs,
    Memory,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorSinkConfig {
    pub kind: VectorSinkKind,
    /// Defaults to `<data_dir>/vectors.jsonl`
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { dimension: 256 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreeningConfig {
    pub rules: Vec<ScreenRule>,
    pub scorer: Option<LogisticScorer>,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            scorer: None,
        }
    }
}

impl PipelineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a TOML or YAML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed, or fails
    /// [`validate`](Self::validate)
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let config = match extension.as_deref() {
            Some("toml") => Self::from_toml_str(&text)?,
            Some("yaml" | "yml") => Self::from_yaml_str(&text)?,
            _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        };
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns error on invalid TOML or an invalid symbol
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// # Errors
    /// Returns error on invalid YAML or an invalid symbol
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Check ranges, cross-field consistency and processor names
    ///
    /// # Errors
    /// Returns the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_settings()?;
        for stage in &self.stages {
            if !KNOWN_PROCESSORS.contains(&stage.processor.as_str()) {
                return Err(ConfigError::invalid(
                    format!("stages.{}.processor", stage.name),
                    format!(
                        "unknown processor {:?}, expected one of {}",
                        stage.processor,
                        KNOWN_PROCESSORS.join(", ")
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Like [`validate`](Self::validate) but leaves processor names to the
    /// registry the pipeline is built with
    ///
    /// # Errors
    /// Returns the first problem found
    pub fn validate_settings(&self) -> Result<(), ConfigError> {
        if self.orchestrator.worker_limit == 0 {
            return Err(ConfigError::invalid("orchestrator.worker_limit", "must be at least 1"));
        }
        if self.orchestrator.default_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "orchestrator.default_timeout_secs",
                "must be at least 1",
            ));
        }
        self.validate_retry()?;
        SymbolRegistry::from_profiles(self.symbols.iter().cloned())
            .map_err(|e| ConfigError::invalid("symbols", e.to_string()))?;
        for stage in &self.stages {
            Self::validate_stage(stage)?;
        }
        if self.embedding.dimension == 0 {
            return Err(ConfigError::invalid("embedding.dimension", "must be at least 1"));
        }
        if self.graph.kind == GraphSinkKind::Neo4j {
            if self.graph.uri.trim().is_empty() {
                return Err(ConfigError::invalid("graph.uri", "required for neo4j"));
            }
            if self.graph.max_connections == 0 {
                return Err(ConfigError::invalid("graph.max_connections", "must be at least 1"));
            }
        }
        if self.forum.source == SourceKind::File && self.forum.fixtures_dir.is_none() {
            return Err(ConfigError::invalid("forum.fixtures_dir", "required for file source"));
        }
        if self.financial_api.source == SourceKind::File && self.financial_api.fixtures_dir.is_none()
        {
            return Err(ConfigError::invalid(
                "financial_api.fixtures_dir",
                "required for file source",
            ));
        }
        Ok(())
    }

    fn validate_retry(&self) -> Result<(), ConfigError> {
        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            return Err(ConfigError::invalid("retry.multiplier", "must be a number >= 1.0"));
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            return Err(ConfigError::invalid(
                "retry.base_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }
        Ok(())
    }

    fn validate_stage(stage: &StageConfig) -> Result<(), ConfigError> {
        let field = |f: &str| format!("stages.{}.{f}", stage.name);
        if stage.name.trim().is_empty() {
            return Err(ConfigError::invalid("stages.name", "must not be empty"));
        }
        if stage.timeout_secs == Some(0) {
            return Err(ConfigError::invalid(field("timeout_secs"), "must be at least 1"));
        }
        if stage.max_attempts == Some(0) {
            return Err(ConfigError::invalid(field("max_attempts"), "must be at least 1"));
        }
        Ok(())
    }

    /// Configured stages, or the built-in pipeline when none are given
    #[must_use]
    pub fn effective_stages(&self) -> Vec<StageConfig> {
        if self.stages.is_empty() {
            crate::pipeline::default_stages()
        } else {
            self.stages.clone()
        }
    }

    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.orchestrator.default_timeout_secs)
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }

    #[must_use]
    pub fn store_root(&self) -> PathBuf {
        self.store
            .root
            .clone()
            .unwrap_or_else(|| self.project.data_dir.join("store"))
    }

    #[must_use]
    pub fn graph_path(&self) -> PathBuf {
        self.graph
            .path
            .clone()
            .unwrap_or_else(|| self.project.data_dir.join("graph.jsonl"))
    }

    #[must_use]
    pub fn vector_path(&self) -> PathBuf {
        self.vector_index
            .path
            .clone()
            .unwrap_or_else(|| self.project.data_dir.join("vectors.jsonl"))
    }

    #[must_use]
    pub fn reports_dir(&self) -> PathBuf {
        self.project.data_dir.join("reports")
    }

    /// Set worker limit
    #[inline]
    #[must_use]
    pub fn with_worker_limit(mut self, limit: usize) -> Self {
        self.orchestrator.worker_limit = limit;
        self
    }

    /// Set global stage timeout
    #[inline]
    #[must_use]
    pub fn with_default_timeout_secs(mut self, secs: u64) -> Self {
        self.orchestrator.default_timeout_secs = secs;
        self
    }

    /// Set retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Add a symbol
    #[inline]
    #[must_use]
    pub fn with_symbol(mut self, profile: SymbolProfile) -> Self {
        self.symbols.push(profile);
        self
    }

    /// Replace the stage list
    #[inline]
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<StageConfig>) -> Self {
        self.stages = stages;
        self
    }

    /// Set artifact store
    #[inline]
    #[must_use]
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Set graph and vector backends
    #[inline]
    #[must_use]
    pub fn with_sinks(mut self, graph: GraphSinkKind, vector: VectorSinkKind) -> Self {
        self.graph.kind = graph;
        self.vector_index.kind = vector;
        self
    }

    /// Set data directory
    #[inline]
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project.data_dir = dir.into();
        self
    }
}
