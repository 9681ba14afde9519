//! EODHD fundamentals adapter

use crate::error::{ErrorKind, FetchError};
use crate::http::send_json;
use crate::processor::{FetchParams, SourceAdapter};
use async_trait::async_trait;
use picker_artifact::RawDocument;
use picker_symbol::SymbolProfile;

pub const DEFAULT_BASE_URL: &str = "https://eodhd.com/api";

/// Pulls `<base>/fundamentals/<SYMBOL>.<EXCHANGE>` as JSON
#[derive(Clone)]
pub struct EodhdAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl EodhdAdapter {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    /// Request URL without credentials
    #[must_use]
    pub fn url_for(&self, profile: &SymbolProfile) -> String {
        format!(
            "{}/fundamentals/{}.{}",
            self.base_url,
            profile.symbol,
            profile.exchange.code()
        )
    }
}

impl std::fmt::Debug for EodhdAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EodhdAdapter")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SourceAdapter for EodhdAdapter {
    fn name(&self) -> &str {
        "eodhd"
    }

    fn fingerprint(&self) -> String {
        format!("eodhd:{}", self.base_url)
    }

    async fn fetch(
        &self,
        profile: &SymbolProfile,
        _params: &FetchParams,
    ) -> Result<RawDocument, FetchError> {
        let Some(key) = self.api_key.as_deref() else {
            return Err(FetchError::new(
                ErrorKind::Rejected,
                "no EODHD API key configured",
            ));
        };
        let url = self.url_for(profile);
        let request = self
            .client
            .get(&url)
            .query(&[("api_token", key), ("fmt", "json")]);
        let body = send_json(request, &format!("fundamentals {}", profile.symbol)).await?;
        if !body.is_object() {
            return Err(FetchError::malformed(format!(
                "fundamentals {}: expected a JSON object",
                profile.symbol
            )));
        }
        tracing::info!(symbol = %profile.symbol, "fetched fundamentals");
        Ok(RawDocument {
            source: "eodhd".into(),
            uri: url,
            content_type: "application/json".into(),
            body,
        })
    }
}
