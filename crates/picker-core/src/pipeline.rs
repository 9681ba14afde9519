//! Stage graph assembly
//!
//! Turns configured stages into [`StageSpec`]s bound to registered
//! processors. The processor decides the stage's output kind.

use crate::config::StageConfig;
use crate::error::PipelineError;
use picker_artifact::PayloadKind;
use picker_dag::{StageGraph, StageSpec};
use picker_stages::{ProcessorRegistry, StageProcessor};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const FORUM_POSTS: &str = "forum_posts";
pub const FINANCIALS: &str = "financials";
pub const CLEAN_TEXT: &str = "clean_text";
pub const SUMMARIZE: &str = "summarize";
pub const PARSE_FUNDAMENTALS: &str = "parse_fundamentals";
pub const SENTIMENT: &str = "sentiment";
pub const SCREEN: &str = "screen";

/// The built-in signal pipeline
#[must_use]
pub fn default_stages() -> Vec<StageConfig> {
    vec![
        StageConfig::new(FORUM_POSTS, "forum_adapter"),
        StageConfig::new(FINANCIALS, "financial_adapter"),
        StageConfig::new(CLEAN_TEXT, "text_cleaner")
            .after([FORUM_POSTS])
            .inputs([PayloadKind::RawDocument]),
        StageConfig::new(SUMMARIZE, "extractive_summarizer")
            .after([CLEAN_TEXT])
            .inputs([PayloadKind::CleanText]),
        StageConfig::new(PARSE_FUNDAMENTALS, "fundamentals_parser")
            .after([FINANCIALS])
            .inputs([PayloadKind::RawDocument]),
        StageConfig::new(SENTIMENT, "lexicon_sentiment")
            .after([CLEAN_TEXT])
            .inputs([PayloadKind::CleanText]),
        StageConfig::new(SCREEN, "rule_screener")
            .after([PARSE_FUNDAMENTALS, SENTIMENT])
            .inputs([PayloadKind::Fundamentals, PayloadKind::Sentiment]),
    ]
}

/// Validated stage graph plus the processor bound to each stage
#[derive(Clone)]
pub struct Pipeline {
    pub graph: Arc<StageGraph>,
    processors: HashMap<String, Arc<dyn StageProcessor>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("order", &self.graph.order())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Resolve processors and validate the graph
    ///
    /// # Errors
    /// `UnknownProcessor` for an unregistered processor name; DAG errors
    /// (cycles, unknown upstreams, unsatisfied inputs) from graph
    /// construction
    pub fn build(stages: &[StageConfig], registry: &ProcessorRegistry) -> Result<Self, PipelineError> {
        let mut processors = HashMap::with_capacity(stages.len());
        let mut specs = Vec::with_capacity(stages.len());
        for stage in stages {
            let processor =
                registry
                    .get(&stage.processor)
                    .ok_or_else(|| PipelineError::UnknownProcessor {
                        stage: stage.name.clone(),
                        processor: stage.processor.clone(),
                    })?;
            specs.push(to_spec(stage, processor.output()));
            processors.insert(stage.name.clone(), processor);
        }
        let graph = StageGraph::new(specs)?;
        Ok(Self {
            graph: Arc::new(graph),
            processors,
        })
    }

    #[must_use]
    pub fn processor(&self, stage: &str) -> Option<&Arc<dyn StageProcessor>> {
        self.processors.get(stage)
    }

    #[must_use]
    pub fn spec(&self, stage: &str) -> Option<&StageSpec> {
        self.graph.spec(stage)
    }
}

fn to_spec(stage: &StageConfig, output: PayloadKind) -> StageSpec {
    let mut spec = StageSpec::new(&stage.name, &stage.processor, output)
        .after(stage.after.iter().cloned())
        .inputs(stage.inputs.iter().copied())
        .idempotent(stage.is_idempotent());
    if let Some(secs) = stage.timeout_secs {
        spec = spec.timeout(Duration::from_secs(secs));
    }
    if let Some(attempts) = stage.max_attempts {
        spec = spec.max_attempts(attempts);
    }
    spec
}
