//! Processor lookup by configured name

use crate::processor::StageProcessor;
use crate::processors::{
    ExtractiveSummarizer, FundamentalsParser, LexiconSentiment, RuleScreener, TextCleaner,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Maps processor names used in pipeline configuration to implementations
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn StageProcessor>>,
}

impl ProcessorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the processors that need no external service
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TextCleaner));
        registry.register(Arc::new(ExtractiveSummarizer::default()));
        registry.register(Arc::new(LexiconSentiment::default()));
        registry.register(Arc::new(FundamentalsParser::default()));
        registry.register(Arc::new(RuleScreener::default()));
        registry
    }

    /// Register under the processor's own name, replacing any previous entry
    pub fn register(&mut self, processor: Arc<dyn StageProcessor>) -> Option<Arc<dyn StageProcessor>> {
        let name = processor.name().to_string();
        self.register_as(name, processor)
    }

    pub fn register_as(
        &mut self,
        name: impl Into<String>,
        processor: Arc<dyn StageProcessor>,
    ) -> Option<Arc<dyn StageProcessor>> {
        self.processors.insert(name.into(), processor)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn StageProcessor>> {
        self.processors.get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.processors.contains_key(name)
    }

    /// Registered names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.processors.keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("processors", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::screen::{Comparison, ScreenRule};
    use picker_artifact::PayloadKind;

    #[test]
    fn builtins_are_registered_by_name() {
        let registry = ProcessorRegistry::with_builtins();
        assert_eq!(
            registry.names(),
            vec![
                "extractive_summarizer",
                "fundamentals_parser",
                "lexicon_sentiment",
                "rule_screener",
                "text_cleaner"
            ]
        );
        assert_eq!(registry.get("text_cleaner").unwrap().output(), PayloadKind::CleanText);
        assert!(registry.get("llm_summarizer").is_none());
    }

    #[test]
    fn register_replaces_previous_entry() {
        let mut registry = ProcessorRegistry::with_builtins();
        let strict = RuleScreener::new(vec![ScreenRule::new("ROE", Comparison::AtLeast, 30.0, 0.0)]);
        let before = registry.get("rule_screener").unwrap().fingerprint();
        assert!(registry.register(Arc::new(strict)).is_some());
        assert_ne!(registry.get("rule_screener").unwrap().fingerprint(), before);
        assert_eq!(registry.len(), 5);
    }
}
