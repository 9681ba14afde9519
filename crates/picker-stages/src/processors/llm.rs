//! Model-backed summarization through an OpenAI-compatible endpoint

use crate::error::{ErrorKind, FetchError, StageError};
use crate::http::send_json;
use crate::processor::{StageInput, StageProcessor};
use async_trait::async_trait;
use picker_artifact::{MonthlySummary, Payload, PayloadKind, Summary};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Text completion backend
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Model identifier, folded into the stage fingerprint
    fn model(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, StageError>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

/// `POST {base}/chat/completions`
#[derive(Clone)]
pub struct HttpCompletionClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpCompletionClient {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }
}

impl std::fmt::Debug for HttpCompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCompletionClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// First choice's message content
fn completion_text(body: &serde_json::Value) -> Result<String, FetchError> {
    body.pointer("/choices/0/message/content")
        .and_then(serde_json::Value::as_str)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| FetchError::malformed("completion response has no message content"))
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, StageError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.2,
        };
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let body = send_json(builder, "chat completion").await?;
        Ok(completion_text(&body)?)
    }
}

/// Summarizes each month of discussion with a completion model
///
/// Months are summarized concurrently, one completion each. The overall
/// text is the most recent month's summary. Output differs between calls,
/// so stages using it are configured as non-idempotent.
#[derive(Clone)]
pub struct LlmSummarizer {
    client: Arc<dyn CompletionClient>,
    max_chars: usize,
}

impl LlmSummarizer {
    #[must_use]
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self {
            client,
            max_chars: 3500,
        }
    }

    /// Characters of discussion sent per month
    #[must_use]
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    fn prompt(company: &str, month: &str, text: &str) -> String {
        format!(
            "Summarize the following investor forum discussion about {company} from {month} \
             in at most three sentences. Focus on business performance and risks.\n\n{text}"
        )
    }
}

impl std::fmt::Debug for LlmSummarizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSummarizer")
            .field("model", &self.client.model())
            .field("max_chars", &self.max_chars)
            .finish()
    }
}

#[async_trait]
impl StageProcessor for LlmSummarizer {
    fn name(&self) -> &str {
        "llm_summarizer"
    }

    fn output(&self) -> PayloadKind {
        PayloadKind::Summary
    }

    fn fingerprint(&self) -> String {
        format!("llm_summarizer/v2:{}:{}", self.client.model(), self.max_chars)
    }

    async fn run(&self, input: StageInput) -> Result<Payload, StageError> {
        let text = input.clean_text()?;
        let company = input
            .profile
            .name
            .clone()
            .unwrap_or_else(|| input.profile.symbol.to_string());

        let mut tasks = JoinSet::new();
        for (month, posts) in text.by_month() {
            let joined: String = posts
                .iter()
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
                .chars()
                .take(self.max_chars)
                .collect();
            if joined.trim().is_empty() {
                continue;
            }
            let prompt = Self::prompt(&company, &month, &joined);
            let client = Arc::clone(&self.client);
            let count = posts.len();
            tasks.spawn(async move {
                let reply = client.complete(&prompt).await;
                (month, count, reply)
            });
        }

        let mut monthly = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (month, posts, reply) = joined
                .map_err(|e| StageError::new(ErrorKind::Internal, format!("summary task failed: {e}")))?;
            let text = reply?;
            if text.is_empty() {
                return Err(StageError::new(
                    ErrorKind::MalformedInput,
                    format!("empty completion for {month}"),
                ));
            }
            monthly.insert(month, MonthlySummary { text, posts });
        }

        Ok(Payload::Summary(Summary {
            text: monthly
                .values()
                .next_back()
                .map(|m| m.text.clone())
                .unwrap_or_default(),
            method: "llm".into(),
            source_posts: text.posts.len(),
            monthly,
        }))
    }
}
