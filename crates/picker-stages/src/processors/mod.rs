//! Built-in stage processors

pub mod clean;
pub mod fundamentals;
pub mod llm;
pub mod screen;
pub mod sentiment;
pub mod summarize;

pub use clean::{clean_html, month_of, TextCleaner};
pub use fundamentals::FundamentalsParser;
pub use llm::{CompletionClient, HttpCompletionClient, LlmSummarizer};
pub use screen::{default_rules, Comparison, LogisticScorer, MlScorer, RuleScreener, ScreenRule};
pub use sentiment::{LexiconSentiment, NEGATIVE_WORDS, POSITIVE_WORDS};
pub use summarize::ExtractiveSummarizer;
