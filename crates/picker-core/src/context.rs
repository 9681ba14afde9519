//! Explicit pipeline context
//!
//! Everything the orchestrator touches (config, stage graph, processors,
//! store, writers, delta builder) is assembled here once and passed in at
//! construction.

use crate::config::{GraphSinkKind, PipelineConfig, SourceKind, StoreKind, VectorSinkKind};
use crate::delta::{DeltaBuilder, SignalDeltaBuilder};
use crate::error::{ConfigError, PipelineError};
use crate::pipeline::Pipeline;
use crate::retry::RetryPolicy;
use picker_sinks::{
    FsGraphStore, FsVectorIndex, GraphWriter, HashingEmbedder, MemoryGraphStore, MemoryVectorIndex,
    Neo4jGraphWriter, Neo4jSettings, VectorWriter,
};
use picker_stages::http::default_client;
use picker_stages::{
    AdapterStage, DiscourseForumAdapter, EodhdAdapter, FileAdapter, HttpCompletionClient,
    LlmSummarizer, ProcessorRegistry, RuleScreener,
};
use picker_store::{ArtifactStore, FsArtifactStore, MemoryArtifactStore};
use picker_symbol::SymbolRegistry;
use std::sync::Arc;
use std::time::Duration;

/// Shared, immutable state of one orchestrator
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<PipelineConfig>,
    pub symbols: SymbolRegistry,
    pub pipeline: Pipeline,
    pub store: Arc<dyn ArtifactStore>,
    pub graph_writer: Arc<dyn GraphWriter>,
    pub vector_writer: Arc<dyn VectorWriter>,
    pub delta_builder: Arc<dyn DeltaBuilder>,
    pub retry: RetryPolicy,
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("symbols", &self.symbols.symbols())
            .field("pipeline", &self.pipeline)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl PipelineContext {
    #[must_use]
    pub fn builder(config: PipelineConfig) -> ContextBuilder {
        ContextBuilder::new(config)
    }

    /// Context with the processors, store and writers named by `config`
    ///
    /// # Errors
    /// Returns error if the config is invalid, a client cannot be built, or
    /// the store or a sink cannot be opened
    pub async fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let registry = registry_from_config(&config)?;
        let store: Arc<dyn ArtifactStore> = match config.store.kind {
            StoreKind::Fs => {
                Arc::new(FsArtifactStore::open(config.store_root(), config.store.cache_capacity).await?)
            }
            StoreKind::Memory => Arc::new(MemoryArtifactStore::new()),
        };
        let graph_writer = graph_writer_from_config(&config).await?;
        let vector_writer = vector_writer_from_config(&config).await?;
        tracing::info!(
            store = ?config.store.kind,
            graph = graph_writer.name(),
            vector = vector_writer.name(),
            "pipeline sinks ready"
        );
        ContextBuilder::new(config)
            .registry(registry)
            .store(store)
            .graph_writer(graph_writer)
            .vector_writer(vector_writer)
            .build()
    }
}

/// Builder for [`PipelineContext`]; unset parts fall back to in-memory
/// implementations
pub struct ContextBuilder {
    config: PipelineConfig,
    registry: Option<ProcessorRegistry>,
    store: Option<Arc<dyn ArtifactStore>>,
    graph_writer: Option<Arc<dyn GraphWriter>>,
    vector_writer: Option<Arc<dyn VectorWriter>>,
    delta_builder: Option<Arc<dyn DeltaBuilder>>,
}

impl ContextBuilder {
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            registry: None,
            store: None,
            graph_writer: None,
            vector_writer: None,
            delta_builder: None,
        }
    }

    #[must_use]
    pub fn registry(mut self, registry: ProcessorRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn graph_writer(mut self, writer: Arc<dyn GraphWriter>) -> Self {
        self.graph_writer = Some(writer);
        self
    }

    #[must_use]
    pub fn vector_writer(mut self, writer: Arc<dyn VectorWriter>) -> Self {
        self.vector_writer = Some(writer);
        self
    }

    #[must_use]
    pub fn delta_builder(mut self, builder: Arc<dyn DeltaBuilder>) -> Self {
        self.delta_builder = Some(builder);
        self
    }

    /// # Errors
    /// Invalid settings, duplicate symbols, unknown processors and DAG
    /// errors are all reported here, before any work starts
    pub fn build(self) -> Result<PipelineContext, PipelineError> {
        self.config.validate_settings()?;
        let symbols = SymbolRegistry::from_profiles(self.config.symbols.iter().cloned())?;
        let registry = self.registry.unwrap_or_else(ProcessorRegistry::with_builtins);
        let pipeline = Pipeline::build(&self.config.effective_stages(), &registry)?;

        let vector_writer = match self.vector_writer {
            Some(writer) => writer,
            None => {
                let embedder = HashingEmbedder::new(self.config.embedding.dimension)?;
                Arc::new(MemoryVectorIndex::new(Arc::new(embedder)))
            }
        };

        Ok(PipelineContext {
            retry: self.config.retry_policy(),
            symbols,
            pipeline,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryArtifactStore::new())),
            graph_writer: self
                .graph_writer
                .unwrap_or_else(|| Arc::new(MemoryGraphStore::new())),
            vector_writer,
            delta_builder: self
                .delta_builder
                .unwrap_or_else(|| Arc::new(SignalDeltaBuilder)),
            config: Arc::new(self.config),
        })
    }
}

/// Graph backend selected by `config.graph`
///
/// # Errors
/// Returns error if the log cannot be opened, the Neo4j password variable
/// is unset or the server is unreachable
pub async fn graph_writer_from_config(config: &PipelineConfig) -> Result<Arc<dyn GraphWriter>, PipelineError> {
    let graph = &config.graph;
    Ok(match graph.kind {
        GraphSinkKind::Memory => Arc::new(MemoryGraphStore::new()),
        GraphSinkKind::Fs => Arc::new(FsGraphStore::open(config.graph_path()).await?),
        GraphSinkKind::Neo4j => {
            let password = env_key(&graph.password_env).ok_or_else(|| {
                ConfigError::invalid(
                    "graph.password_env",
                    format!("environment variable {} is not set", graph.password_env),
                )
            })?;
            let settings = Neo4jSettings {
                uri: graph.uri.clone(),
                user: graph.user.clone(),
                password,
                max_connections: graph.max_connections,
            };
            Arc::new(Neo4jGraphWriter::connect(&settings).await?)
        }
    })
}

/// Vector backend selected by `config.vector_index`
///
/// # Errors
/// Returns error if the dimension is invalid or the log cannot be opened
pub async fn vector_writer_from_config(config: &PipelineConfig) -> Result<Arc<dyn VectorWriter>, PipelineError> {
    let embedder = Arc::new(HashingEmbedder::new(config.embedding.dimension)?);
    Ok(match config.vector_index.kind {
        VectorSinkKind::Memory => Arc::new(MemoryVectorIndex::new(embedder)),
        VectorSinkKind::Fs => Arc::new(FsVectorIndex::open(config.vector_path(), embedder).await?),
    })
}

/// Non-empty value of an environment variable
fn env_key(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Built-in processors plus the adapters, model client and screener
/// configured in `config`
///
/// # Errors
/// Returns error if an HTTP client or adapter cannot be constructed
pub fn registry_from_config(config: &PipelineConfig) -> Result<ProcessorRegistry, PipelineError> {
    let mut registry = ProcessorRegistry::with_builtins();
    let timeout = config.default_timeout();

    let forum = match config.forum.source {
        SourceKind::Http => {
            let client = default_client(timeout)
                .map_err(|e| ConfigError::invalid("forum", e.to_string()))?;
            let adapter = DiscourseForumAdapter::new(
                client,
                &config.forum.base_url,
                config.forum.max_pages,
                &config.forum.company_suffixes,
            )
            .map_err(|e| ConfigError::invalid("forum.base_url", e.to_string()))?;
            AdapterStage::new("forum_adapter", Arc::new(adapter))
        }
        SourceKind::File => {
            let dir = config.forum.fixtures_dir.clone().unwrap_or_default();
            AdapterStage::new("forum_adapter", Arc::new(FileAdapter::new(dir, "forum")))
        }
    };
    registry.register_as("forum_adapter", Arc::new(forum));

    let api = &config.financial_api;
    let financials = match api.source {
        SourceKind::Http => {
            if !api.provider.eq_ignore_ascii_case("eodhd") {
                return Err(ConfigError::invalid(
                    "financial_api.provider",
                    format!("unsupported provider {:?}", api.provider),
                )
                .into());
            }
            let client = default_client(timeout)
                .map_err(|e| ConfigError::invalid("financial_api", e.to_string()))?;
            let adapter = EodhdAdapter::new(client, &api.base_url, env_key(&api.api_key_env));
            AdapterStage::new("financial_adapter", Arc::new(adapter))
        }
        SourceKind::File => {
            let dir = api.fixtures_dir.clone().unwrap_or_default();
            AdapterStage::new("financial_adapter", Arc::new(FileAdapter::new(dir, "financials")))
        }
    };
    registry.register_as("financial_adapter", Arc::new(financials));

    let llm = &config.llm;
    let client = default_client(Duration::from_secs(llm.timeout_secs.max(1)))
        .map_err(|e| ConfigError::invalid("llm", e.to_string()))?;
    let completion = HttpCompletionClient::new(client, &llm.base_url, &llm.model, env_key(&llm.api_key_env));
    registry.register(Arc::new(
        LlmSummarizer::new(Arc::new(completion)).with_max_chars(llm.max_input_chars),
    ));

    let mut screener = RuleScreener::new(config.screening.rules.clone());
    if let Some(scorer) = &config.screening.scorer {
        screener = screener.with_scorer(Arc::new(scorer.clone()));
    }
    registry.register(Arc::new(screener));

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageConfig;
    use picker_artifact::{VectorDelta, VectorDocument};
    use picker_symbol::Symbol;

    fn offline_config() -> PipelineConfig {
        let mut config = PipelineConfig::new();
        config.forum.source = SourceKind::File;
        config.forum.fixtures_dir = Some("fixtures".into());
        config.financial_api.source = SourceKind::File;
        config.financial_api.fixtures_dir = Some("fixtures".into());
        config.store.kind = StoreKind::Memory;
        config.with_sinks(GraphSinkKind::Memory, VectorSinkKind::Memory)
    }

    #[test]
    fn configured_registry_covers_default_pipeline() {
        let registry = registry_from_config(&offline_config()).unwrap();
        for stage in crate::pipeline::default_stages() {
            assert!(registry.contains(&stage.processor), "{}", stage.processor);
        }
        assert!(registry.contains("llm_summarizer"));
    }

    #[tokio::test]
    async fn from_config_builds_memory_context() {
        let ctx = PipelineContext::from_config(offline_config()).await.unwrap();
        assert_eq!(ctx.pipeline.graph.len(), 7);
        assert_eq!(ctx.retry.max_attempts, 3);
    }

    #[tokio::test]
    async fn fs_sinks_survive_a_new_context() {
        let dir = tempfile::tempdir().unwrap();
        let config = offline_config()
            .with_data_dir(dir.path())
            .with_sinks(GraphSinkKind::Fs, VectorSinkKind::Fs);

        let writer = vector_writer_from_config(&config).await.unwrap();
        let acme = Symbol::parse("ACME").unwrap();
        let mut delta = VectorDelta::new(acme.clone());
        delta.push(VectorDocument::new(&acme, "rising debt", Default::default()));
        writer.apply(&delta).await.unwrap();
        drop(writer);

        let reopened = FsVectorIndex::open(config.vector_path(), Arc::new(HashingEmbedder::default()))
            .await
            .unwrap();
        assert_eq!(reopened.index().len(), 1);
        assert!(config.graph_path().starts_with(dir.path()));
        PipelineContext::from_config(config).await.unwrap();
    }

    #[tokio::test]
    async fn neo4j_without_password_is_config_error() {
        let mut config = offline_config().with_sinks(GraphSinkKind::Neo4j, VectorSinkKind::Memory);
        config.graph.password_env = "PICKER_TEST_UNSET_NEO4J_PASSWORD".into();
        let err = graph_writer_from_config(&config).await.err().unwrap();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("PICKER_TEST_UNSET_NEO4J_PASSWORD"));
    }

    #[test]
    fn builder_reports_unknown_processor() {
        let config = PipelineConfig::new().with_stages(vec![StageConfig::new("x", "nowhere")]);
        let err = ContextBuilder::new(config).build().unwrap_err();
        assert!(matches!(err, PipelineError::UnknownProcessor { .. }));
    }

    #[test]
    fn unsupported_provider_is_config_error() {
        let mut config = PipelineConfig::new();
        config.financial_api.provider = "bloomberg".into();
        let err = registry_from_config(&config).unwrap_err();
        assert!(err.is_fatal());
    }
}
