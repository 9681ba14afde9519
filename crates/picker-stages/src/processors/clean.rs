//! Forum text cleaning

use crate::adapters::ForumBody;
use crate::error::StageError;
use crate::processor::{StageInput, StageProcessor};
use async_trait::async_trait;
use chrono::DateTime;
use picker_artifact::{CleanPost, CleanText, Payload, PayloadKind};
use regex::{Captures, Regex};
use std::sync::LazyLock;

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern"));
static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").expect("entity pattern")
});
static URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"http\S+").expect("url pattern"));
static SYMBOLS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s.,!?]").expect("symbol pattern"));
static SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("space pattern"));

fn decode_entity(caps: &Captures<'_>) -> String {
    let name = &caps[1];
    let decoded = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
    } else if let Some(dec) = name.strip_prefix('#') {
        dec.parse::<u32>().ok().and_then(char::from_u32)
    } else {
        match name {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some(' '),
            _ => None,
        }
    };
    decoded.map_or_else(|| caps[0].to_string(), String::from)
}

/// Normalise one rendered post into plain lowercase text
///
/// Tags are stripped before entities are decoded, so an escaped `&lt;b&gt;`
/// survives as text (and is then removed with the other symbols).
#[must_use]
pub fn clean_html(html: &str) -> String {
    let text = TAG.replace_all(html, " ");
    let text = ENTITY.replace_all(&text, decode_entity);
    let text = text.replace('\u{a0}', " ").to_lowercase();
    let text = URL.replace_all(&text, " ");
    let text = SYMBOLS.replace_all(&text, "");
    SPACE.replace_all(&text, " ").trim().to_string()
}

/// `YYYY-MM` of an RFC 3339 timestamp
#[must_use]
pub fn month_of(timestamp: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(|t| t.format("%Y-%m").to_string())
}

/// Turns a forum raw document into [`CleanText`]
///
/// Posts without a parseable timestamp or with no text left after cleaning
/// are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCleaner;

impl TextCleaner {
    /// # Errors
    /// `MalformedInput` if the body is not a forum document
    pub fn clean(body: &serde_json::Value) -> Result<CleanText, StageError> {
        let forum: ForumBody = serde_json::from_value(body.clone())
            .map_err(|e| StageError::malformed(format!("forum document: {e}")))?;

        let mut posts = Vec::new();
        for thread in &forum.threads {
            for post in &thread.posts {
                let Some(month) = post.created_at.as_deref().and_then(month_of) else {
                    tracing::debug!(post = post.id, "skipping post without timestamp");
                    continue;
                };
                let text = clean_html(&post.cooked);
                if text.is_empty() {
                    continue;
                }
                posts.push(CleanPost {
                    post_id: post.id,
                    thread_id: thread.id,
                    thread_title: thread.title.clone(),
                    month,
                    text,
                });
            }
        }
        Ok(CleanText { posts })
    }
}

#[async_trait]
impl StageProcessor for TextCleaner {
    fn name(&self) -> &str {
        "text_cleaner"
    }

    fn output(&self) -> PayloadKind {
        PayloadKind::CleanText
    }

    fn fingerprint(&self) -> String {
        "text_cleaner/v1".into()
    }

    async fn run(&self, input: StageInput) -> Result<Payload, StageError> {
        let doc = input.raw_document()?;
        Ok(Payload::CleanText(Self::clean(&doc.body)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn html_is_reduced_to_words_and_punctuation() {
        let html = "<p>Strong <b>growth</b>&nbsp;in Q3!</p><p>See https://x.io/a?b=1 &amp; more &#8212; ok</p>";
        assert_eq!(clean_html(html), "strong growth in q3! see more ok");
    }

    #[test]
    fn numeric_entities_decode() {
        assert_eq!(clean_html("caf&#233; &#x41;BC"), "café abc");
        assert_eq!(clean_html("&unknown; word"), "unknown word");
    }

    #[test]
    fn month_parses_rfc3339() {
        assert_eq!(month_of("2024-03-02T10:00:00.000Z").as_deref(), Some("2024-03"));
        assert_eq!(month_of("2024-03-02"), None);
    }

    #[test]
    fn clean_drops_empty_and_undated_posts() {
        let body = json!({
            "threads": [{
                "id": 9,
                "title": "Acme Ltd",
                "posts": [
                    { "id": 1, "created_at": "2024-01-05T00:00:00Z", "cooked": "<p>Profit up</p>" },
                    { "id": 2, "cooked": "<p>no date</p>" },
                    { "id": 3, "created_at": "2024-02-01T00:00:00Z", "cooked": "<img src='x'>" }
                ]
            }]
        });
        let text = TextCleaner::clean(&body).unwrap();
        assert_eq!(text.posts.len(), 1);
        assert_eq!(text.posts[0].text, "profit up");
        assert_eq!(text.posts[0].month, "2024-01");
        assert_eq!(text.posts[0].thread_id, 9);
    }

    #[test]
    fn non_forum_body_is_malformed() {
        let err = TextCleaner::clean(&json!([1, 2, 3])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedInput);
    }
}
