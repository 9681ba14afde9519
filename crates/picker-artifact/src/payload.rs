//! Stage payloads
//!
//! Every stage produces exactly one [`Payload`]. The variant is the stage's
//! output contract ([`PayloadKind`]); downstream stages declare which kinds
//! they consume. All map fields are `BTreeMap` so the JSON encoding, and
//! therefore [`Payload::content_hash`], is deterministic.

use crate::hash::{ContentHash, HashError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// Output contract of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    RawDocument,
    CleanText,
    Summary,
    Fundamentals,
    Sentiment,
    Screening,
    Json,
}

impl PayloadKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PayloadKind::RawDocument => "raw_document",
            PayloadKind::CleanText => "clean_text",
            PayloadKind::Summary => "summary",
            PayloadKind::Fundamentals => "fundamentals",
            PayloadKind::Sentiment => "sentiment",
            PayloadKind::Screening => "screening",
            PayloadKind::Json => "json",
        }
    }
}

impl Display for PayloadKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw document pulled by a source adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    /// Adapter name (`discourse`, `eodhd`, `file`)
    pub source: String,
    /// Where the document came from
    pub uri: String,
    pub content_type: String,
    pub body: serde_json::Value,
}

/// One cleaned forum post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanPost {
    pub post_id: u64,
    pub thread_id: u64,
    pub thread_title: String,
    /// `YYYY-MM` bucket derived from the post timestamp
    pub month: String,
    pub text: String,
}

/// Cleaned discussion text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanText {
    pub posts: Vec<CleanPost>,
}

impl CleanText {
    /// Post texts joined by a blank line
    #[must_use]
    pub fn joined(&self) -> String {
        self.posts
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Post texts grouped by month, months ascending
    #[must_use]
    pub fn by_month(&self) -> BTreeMap<String, Vec<&CleanPost>> {
        let mut months: BTreeMap<String, Vec<&CleanPost>> = BTreeMap::new();
        for post in &self.posts {
            months.entry(post.month.clone()).or_default().push(post);
        }
        months
    }
}

/// Summary of one month of discussion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlySummary {
    pub text: String,
    pub posts: usize,
}

/// Summary of the discussion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub text: String,
    /// Processor variant that produced it
    pub method: String,
    pub source_posts: usize,
    /// Per `YYYY-MM` summaries, aligned with the monthly sentiment buckets
    #[serde(default)]
    pub monthly: BTreeMap<String, MonthlySummary>,
}

/// Parsed company fundamentals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fundamentals {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    /// Named metrics (`ROCE`, `ROE`, `CAGR`, `DE`, `PE`, `FCF`); missing
    /// values are absent rather than zero
    pub metrics: BTreeMap<String, f64>,
}

impl Fundamentals {
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// Sentiment label of a single post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

/// Sentiment of one post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostSentiment {
    pub post_id: u64,
    pub month: String,
    pub label: SentimentLabel,
    pub confidence: f64,
    /// 1..=100, 50 is neutral
    pub score: u8,
    pub justification: String,
}

/// Aggregated sentiment for one month
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlySentiment {
    pub score: u8,
    pub posts: usize,
}

/// Sentiment across all posts of a company
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentReport {
    pub overall: u8,
    pub monthly: BTreeMap<String, MonthlySentiment>,
    pub posts: Vec<PostSentiment>,
}

/// Outcome of one screening rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    pub metric: String,
    /// Comparison operator (`>=`, `<`, `>`)
    pub op: String,
    pub threshold: f64,
    /// Observed value; `None` when the metric was missing
    pub value: Option<f64>,
    pub passed: bool,
}

/// Rule and model screening verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningResult {
    pub passed: bool,
    pub rules: Vec<RuleResult>,
    /// Multibagger probability; 0 when no model scorer is configured
    pub probability: f64,
    /// Model scorer that produced the probability
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scorer: Option<String>,
    pub sentiment_score: Option<u8>,
}

/// Output of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    RawDocument(RawDocument),
    CleanText(CleanText),
    Summary(Summary),
    Fundamentals(Fundamentals),
    Sentiment(SentimentReport),
    Screening(ScreeningResult),
    Json { value: serde_json::Value },
}

impl Payload {
    #[must_use]
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::RawDocument(_) => PayloadKind::RawDocument,
            Payload::CleanText(_) => PayloadKind::CleanText,
            Payload::Summary(_) => PayloadKind::Summary,
            Payload::Fundamentals(_) => PayloadKind::Fundamentals,
            Payload::Sentiment(_) => PayloadKind::Sentiment,
            Payload::Screening(_) => PayloadKind::Screening,
            Payload::Json { .. } => PayloadKind::Json,
        }
    }

    /// Hash of the canonical JSON encoding
    ///
    /// # Errors
    /// Returns error if the payload cannot be serialized
    pub fn content_hash(&self) -> Result<ContentHash, HashError> {
        ContentHash::compute_serializable(self)
    }

    #[must_use]
    pub fn as_raw_document(&self) -> Option<&RawDocument> {
        match self {
            Payload::RawDocument(doc) => Some(doc),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_clean_text(&self) -> Option<&CleanText> {
        match self {
            Payload::CleanText(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_summary(&self) -> Option<&Summary> {
        match self {
            Payload::Summary(summary) => Some(summary),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_fundamentals(&self) -> Option<&Fundamentals> {
        match self {
            Payload::Fundamentals(f) => Some(f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_sentiment(&self) -> Option<&SentimentReport> {
        match self {
            Payload::Sentiment(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_screening(&self) -> Option<&ScreeningResult> {
        match self {
            Payload::Screening(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: u64, month: &str, text: &str) -> CleanPost {
        CleanPost {
            post_id: id,
            thread_id: 1,
            thread_title: "Acme Ltd".into(),
            month: month.into(),
            text: text.into(),
        }
    }

    #[test]
    fn payload_kind_matches_variant() {
        let payload = Payload::Summary(Summary {
            text: "ok".into(),
            method: "extractive".into(),
            source_posts: 1,
            monthly: Default::default(),
        });
        assert_eq!(payload.kind(), PayloadKind::Summary);
        assert!(payload.as_summary().is_some());
        assert!(payload.as_clean_text().is_none());
    }

    #[test]
    fn payload_json_is_tagged() {
        let payload = Payload::CleanText(CleanText {
            posts: vec![post(1, "2024-01", "hello")],
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "clean_text");
        let back: Payload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn content_hash_is_stable_across_map_insertion_order() {
        let mut a = Fundamentals::default();
        a.metrics.insert("ROE".into(), 18.0);
        a.metrics.insert("PE".into(), 12.0);
        let mut b = Fundamentals::default();
        b.metrics.insert("PE".into(), 12.0);
        b.metrics.insert("ROE".into(), 18.0);
        assert_eq!(
            Payload::Fundamentals(a).content_hash().unwrap(),
            Payload::Fundamentals(b).content_hash().unwrap()
        );
    }

    #[test]
    fn clean_text_groups_by_month() {
        let text = CleanText {
            posts: vec![
                post(1, "2024-02", "b"),
                post(2, "2024-01", "a"),
                post(3, "2024-02", "c"),
            ],
        };
        let months = text.by_month();
        let keys: Vec<_> = months.keys().cloned().collect();
        assert_eq!(keys, vec!["2024-01", "2024-02"]);
        assert_eq!(months["2024-02"].len(), 2);
        assert_eq!(text.joined(), "b\n\na\n\nc");
    }
}
