//! Discourse forum adapter
//!
//! Pages through a Discourse category (`<category>.json?page=N`), keeps the
//! topics whose title names the company and pulls every post of those
//! topics (`<host>/t/<id>.json`).

use crate::error::{ErrorKind, FetchError};
use crate::http::send_json;
use crate::processor::{FetchParams, SourceAdapter};
use async_trait::async_trait;
use picker_artifact::RawDocument;
use picker_symbol::SymbolProfile;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One forum post as carried in the raw document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForumPost {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Rendered HTML body
    #[serde(default)]
    pub cooked: String,
}

/// One forum thread with its posts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForumThread {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub posts: Vec<ForumPost>,
}

/// Body of a forum raw document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForumBody {
    pub threads: Vec<ForumThread>,
}

#[derive(Debug, Deserialize)]
struct TopicPage {
    topic_list: TopicList,
}

#[derive(Debug, Deserialize)]
struct TopicList {
    #[serde(default)]
    topics: Vec<Topic>,
}

#[derive(Debug, Clone, Deserialize)]
struct Topic {
    id: u64,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct TopicPosts {
    post_stream: PostStream,
}

#[derive(Debug, Deserialize)]
struct PostStream {
    #[serde(default)]
    posts: Vec<ForumPost>,
}

/// Extracts company names from thread titles
#[derive(Debug, Clone)]
pub struct TitleMatcher {
    suffixes: Vec<Regex>,
}

impl TitleMatcher {
    /// Matcher keeping the given company suffixes (`Ltd`, `Industries`)
    #[must_use]
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let suffixes = suffixes
            .into_iter()
            .filter(|s| !s.as_ref().trim().is_empty())
            .filter_map(|s| Regex::new(&format!(r"(?i)^(.+?\s*{})", regex::escape(s.as_ref()))).ok())
            .collect();
        Self { suffixes }
    }

    /// Company part of a thread title
    ///
    /// Cuts at the first `-`, `~` or `:`, drops a parenthesised tail, then
    /// keeps text up to a known suffix or title-cases what remains.
    #[must_use]
    pub fn company(&self, title: &str) -> String {
        let base = title.split(['-', '~', ':']).next().unwrap_or_default();
        let base = base.split('(').next().unwrap_or_default();
        let base = base.trim().replace("  ", " ");

        for suffix in &self.suffixes {
            if let Some(found) = suffix.captures(&base).and_then(|c| c.get(1)) {
                return found.as_str().trim().to_string();
            }
        }
        title_case(&base)
    }

    /// Whether the title refers to the profile's company
    #[must_use]
    pub fn matches(&self, title: &str, profile: &SymbolProfile) -> bool {
        let company = self.company(title).to_lowercase();
        if company.is_empty() {
            return false;
        }
        profile.match_names().iter().any(|name| {
            company == *name
                || company.starts_with(&format!("{name} "))
                || name.starts_with(&format!("{company} "))
        })
    }
}

/// Upper-case letters that follow a non-letter, lower-case the rest
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_alpha = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

/// Adapter for a Discourse category such as ValuePickr's stock opportunities
#[derive(Debug, Clone)]
pub struct DiscourseForumAdapter {
    client: reqwest::Client,
    category_url: String,
    host: String,
    max_pages: u32,
    matcher: TitleMatcher,
}

impl DiscourseForumAdapter {
    /// # Errors
    /// Returns error if `category_url` is not an absolute URL
    pub fn new(
        client: reqwest::Client,
        category_url: &str,
        max_pages: u32,
        company_suffixes: &[String],
    ) -> Result<Self, FetchError> {
        let category_url = category_url.trim_end_matches('/').to_string();
        let parsed = reqwest::Url::parse(&category_url).map_err(|e| {
            FetchError::new(ErrorKind::Internal, format!("forum url {category_url:?}: {e}"))
        })?;
        Ok(Self {
            client,
            host: parsed.origin().ascii_serialization(),
            category_url,
            max_pages: max_pages.max(1),
            matcher: TitleMatcher::new(company_suffixes),
        })
    }

    async fn topics(&self) -> Result<Vec<Topic>, FetchError> {
        let mut topics = Vec::new();
        for page in 1..=self.max_pages {
            let url = format!("{}.json?page={page}", self.category_url);
            let body = send_json(self.client.get(&url), &format!("topic page {page}")).await?;
            let page_topics = parse_topics(body)?;
            tracing::debug!(page, topics = page_topics.len(), "fetched topic page");
            if page_topics.is_empty() {
                break;
            }
            topics.extend(page_topics);
        }
        Ok(topics)
    }

    async fn posts(&self, topic: u64) -> Result<Vec<ForumPost>, FetchError> {
        let url = format!("{}/t/{topic}.json", self.host);
        let body = send_json(self.client.get(&url), &format!("topic {topic}")).await?;
        parse_posts(body)
    }
}

fn parse_topics(body: serde_json::Value) -> Result<Vec<Topic>, FetchError> {
    serde_json::from_value::<TopicPage>(body)
        .map(|p| p.topic_list.topics)
        .map_err(|e| FetchError::malformed(format!("topic list: {e}")))
}

fn parse_posts(body: serde_json::Value) -> Result<Vec<ForumPost>, FetchError> {
    serde_json::from_value::<TopicPosts>(body)
        .map(|p| p.post_stream.posts)
        .map_err(|e| FetchError::malformed(format!("post stream: {e}")))
}

#[async_trait]
impl SourceAdapter for DiscourseForumAdapter {
    fn name(&self) -> &str {
        "discourse"
    }

    fn fingerprint(&self) -> String {
        format!("discourse:{}:{}", self.category_url, self.max_pages)
    }

    async fn fetch(
        &self,
        profile: &SymbolProfile,
        _params: &FetchParams,
    ) -> Result<RawDocument, FetchError> {
        let topics = self.topics().await?;
        let mut threads = Vec::new();
        for topic in topics
            .into_iter()
            .filter(|t| self.matcher.matches(&t.title, profile))
        {
            let posts = self.posts(topic.id).await?;
            threads.push(ForumThread {
                id: topic.id,
                title: topic.title,
                posts,
            });
        }
        tracing::info!(
            symbol = %profile.symbol,
            threads = threads.len(),
            posts = threads.iter().map(|t| t.posts.len()).sum::<usize>(),
            "fetched forum threads"
        );
        let body = serde_json::to_value(ForumBody { threads })
            .map_err(|e| FetchError::new(ErrorKind::Internal, e.to_string()))?;
        Ok(RawDocument {
            source: "discourse".into(),
            uri: self.category_url.clone(),
            content_type: "application/json".into(),
            body,
        })
    }
}
