//! Extractive summarization

use crate::error::StageError;
use crate::processor::{StageInput, StageProcessor};
use async_trait::async_trait;
use picker_artifact::{MonthlySummary, Payload, PayloadKind, Summary};
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

static SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^.!?]+[.!?]*").expect("sentence pattern"));
static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("word pattern"));

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "am", "an", "and", "any", "are", "as", "at", "be",
    "been", "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has", "have",
    "he", "her", "his", "how", "i", "if", "in", "into", "is", "it", "its", "just", "me", "more",
    "my", "no", "not", "of", "on", "or", "our", "out", "she", "so", "some", "than", "that", "the",
    "their", "them", "then", "there", "these", "they", "this", "to", "up", "was", "we", "were",
    "what", "when", "which", "who", "will", "with", "would", "you", "your",
];

/// Picks the highest-scoring sentences by word frequency
///
/// Texts shorter than `min_chars` are returned as they are. Longer texts
/// are truncated to `max_chars` before splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractiveSummarizer {
    pub max_sentences: usize,
    pub min_chars: usize,
    pub max_chars: usize,
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self {
            max_sentences: 3,
            min_chars: 100,
            max_chars: 3500,
        }
    }
}

impl ExtractiveSummarizer {
    #[must_use]
    pub fn summarize(&self, text: &str) -> String {
        let text = text.trim();
        if text.chars().count() < self.min_chars {
            return text.to_string();
        }
        let text: String = text.chars().take(self.max_chars).collect();

        let stop: HashSet<&str> = STOPWORDS.iter().copied().collect();
        let sentences: Vec<&str> = SENTENCE
            .find_iter(&text)
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
            .collect();

        let mut freq: HashMap<String, usize> = HashMap::new();
        for word in WORD.find_iter(&text) {
            let word = word.as_str().to_lowercase();
            if !stop.contains(word.as_str()) {
                *freq.entry(word).or_default() += 1;
            }
        }

        let mut scored: Vec<(usize, usize)> = sentences
            .iter()
            .enumerate()
            .map(|(i, sentence)| {
                let score = WORD
                    .find_iter(sentence)
                    .filter_map(|w| freq.get(&w.as_str().to_lowercase()))
                    .sum();
                (i, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(self.max_sentences);
        scored.sort_by_key(|(i, _)| *i);

        scored
            .iter()
            .map(|(i, _)| sentences[*i])
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl StageProcessor for ExtractiveSummarizer {
    fn name(&self) -> &str {
        "extractive_summarizer"
    }

    fn output(&self) -> PayloadKind {
        PayloadKind::Summary
    }

    fn fingerprint(&self) -> String {
        format!(
            "extractive_summarizer/v2:{}:{}:{}",
            self.max_sentences, self.min_chars, self.max_chars
        )
    }

    async fn run(&self, input: StageInput) -> Result<Payload, StageError> {
        let text = input.clean_text()?;
        let joined = text
            .posts
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let monthly: BTreeMap<String, MonthlySummary> = text
            .by_month()
            .into_iter()
            .map(|(month, posts)| {
                let bundle = posts.iter().map(|p| p.text.as_str()).collect::<Vec<_>>().join(" ");
                let summary = MonthlySummary {
                    text: self.summarize(&bundle),
                    posts: posts.len(),
                };
                (month, summary)
            })
            .filter(|(_, summary)| !summary.text.is_empty())
            .collect();
        Ok(Payload::Summary(Summary {
            text: self.summarize(&joined),
            method: "extractive".into(),
            source_posts: text.posts.len(),
            monthly,
        }))
    }
}
