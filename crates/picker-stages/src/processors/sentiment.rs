//! Lexicon sentiment scoring

use crate::error::StageError;
use crate::processor::{StageInput, StageProcessor};
use async_trait::async_trait;
use picker_artifact::{
    CleanText, MonthlySentiment, Payload, PayloadKind, PostSentiment, SentimentLabel,
    SentimentReport,
};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("word pattern"));

pub const POSITIVE_WORDS: &[&str] = &["growth", "profit", "strong", "improve", "positive", "gain"];
pub const NEGATIVE_WORDS: &[&str] = &["loss", "decline", "risk", "weak", "negative", "drop"];

const NEUTRAL_SCORE: u8 = 50;
const MAX_KEY_WORDS: usize = 3;

/// Scores each post by distinct positive and negative word hits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexiconSentiment {
    positive: BTreeSet<String>,
    negative: BTreeSet<String>,
}

impl Default for LexiconSentiment {
    fn default() -> Self {
        Self::new(POSITIVE_WORDS, NEGATIVE_WORDS)
    }
}

/// Rounded mean, half up
fn mean_score(scores: impl IntoIterator<Item = u8>) -> u8 {
    let (sum, n) = scores
        .into_iter()
        .fold((0u32, 0u32), |(s, n), x| (s + u32::from(x), n + 1));
    if n == 0 {
        return NEUTRAL_SCORE;
    }
    u8::try_from((2 * sum + n) / (2 * n)).unwrap_or(NEUTRAL_SCORE)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn score_for(label: SentimentLabel, confidence: f64) -> u8 {
    let raw = match label {
        SentimentLabel::Positive => 50.0 + 50.0 * confidence,
        SentimentLabel::Negative => 50.0 - 50.0 * confidence,
        SentimentLabel::Neutral => return NEUTRAL_SCORE,
    };
    raw.floor().clamp(1.0, 100.0) as u8
}

impl LexiconSentiment {
    #[must_use]
    pub fn new<S: AsRef<str>>(positive: &[S], negative: &[S]) -> Self {
        let set = |words: &[S]| {
            words
                .iter()
                .map(|w| w.as_ref().trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect()
        };
        Self {
            positive: set(positive),
            negative: set(negative),
        }
    }

    /// Label, confidence, score and justification for one text
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn score_text(&self, text: &str) -> (SentimentLabel, f64, u8, String) {
        let words: BTreeSet<String> = WORD
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect();
        let pos: Vec<&String> = words.iter().filter(|w| self.positive.contains(*w)).collect();
        let neg: Vec<&String> = words.iter().filter(|w| self.negative.contains(*w)).collect();

        let (p, n) = (pos.len() as f64, neg.len() as f64);
        let confidence = (p - n).abs() / (p + n + 1.0);
        let (label, hits, tone) = match pos.len().cmp(&neg.len()) {
            std::cmp::Ordering::Greater => (SentimentLabel::Positive, pos, "Positive"),
            std::cmp::Ordering::Less => (SentimentLabel::Negative, neg, "Negative"),
            std::cmp::Ordering::Equal => {
                let mut all: Vec<&String> = pos.into_iter().chain(neg).collect();
                all.sort();
                (SentimentLabel::Neutral, all, "Neutral")
            }
        };

        let mut justification = format!("{tone} tone (confidence: {confidence:.2})");
        if !hits.is_empty() {
            let keys: Vec<&str> = hits.iter().take(MAX_KEY_WORDS).map(|s| s.as_str()).collect();
            justification.push_str("; key words: ");
            justification.push_str(&keys.join(", "));
        }
        (label, confidence, score_for(label, confidence), justification)
    }

    #[must_use]
    pub fn analyze(&self, text: &CleanText) -> SentimentReport {
        let posts: Vec<PostSentiment> = text
            .posts
            .iter()
            .map(|post| {
                let (label, confidence, score, justification) = self.score_text(&post.text);
                PostSentiment {
                    post_id: post.post_id,
                    month: post.month.clone(),
                    label,
                    confidence,
                    score,
                    justification,
                }
            })
            .collect();

        let mut by_month: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for post in &posts {
            by_month.entry(post.month.clone()).or_default().push(post.score);
        }
        let monthly = by_month
            .into_iter()
            .map(|(month, scores)| {
                let posts = scores.len();
                (
                    month,
                    MonthlySentiment {
                        score: mean_score(scores),
                        posts,
                    },
                )
            })
            .collect();

        SentimentReport {
            overall: mean_score(posts.iter().map(|p| p.score)),
            monthly,
            posts,
        }
    }
}

#[async_trait]
impl StageProcessor for LexiconSentiment {
    fn name(&self) -> &str {
        "lexicon_sentiment"
    }

    fn output(&self) -> PayloadKind {
        PayloadKind::Sentiment
    }

    fn fingerprint(&self) -> String {
        let join = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>().join(",");
        format!(
            "lexicon_sentiment/v1:+{}:-{}",
            join(&self.positive),
            join(&self.negative)
        )
    }

    async fn run(&self, input: StageInput) -> Result<Payload, StageError> {
        Ok(Payload::Sentiment(self.analyze(input.clean_text()?)))
    }
}
