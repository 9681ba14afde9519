//! HTTP helpers shared by the network adapters

use crate::error::{ErrorKind, FetchError};
use reqwest::StatusCode;
use std::time::Duration;

/// Default client for adapters constructed without one
///
/// # Errors
/// Returns error if the TLS backend cannot be initialised
pub fn default_client(timeout: Duration) -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("picker/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| FetchError::new(ErrorKind::Internal, format!("http client: {e}")))
}

/// Map an HTTP status to an error kind
#[must_use]
pub fn status_kind(status: StatusCode) -> ErrorKind {
    if status == StatusCode::TOO_MANY_REQUESTS {
        ErrorKind::RateLimited
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ErrorKind::Network
    } else {
        ErrorKind::Rejected
    }
}

/// Classify a transport-level failure
#[must_use]
pub fn classify(err: &reqwest::Error, label: &str) -> FetchError {
    let kind = if err.is_timeout() {
        ErrorKind::Timeout
    } else if err.is_decode() {
        ErrorKind::MalformedInput
    } else if let Some(status) = err.status() {
        status_kind(status)
    } else {
        ErrorKind::Network
    };
    // URLs may carry API tokens in the query string
    FetchError::new(kind, format!("{label}: {}", strip_url(err)))
}

fn strip_url(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    if let Some(url) = err.url() {
        message = message.replace(url.as_str(), "<url>");
    }
    message
}

/// Send a request and decode a JSON body
///
/// `label` names the request in error messages instead of the URL.
///
/// # Errors
/// Transport failures and non-2xx statuses are classified per
/// [`status_kind`]; an undecodable body is `MalformedInput`
pub async fn send_json(
    request: reqwest::RequestBuilder,
    label: &str,
) -> Result<serde_json::Value, FetchError> {
    let response = request.send().await.map_err(|e| classify(&e, label))?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::new(
            status_kind(status),
            format!("{label}: HTTP {status}"),
        ));
    }
    let bytes = response.bytes().await.map_err(|e| classify(&e, label))?;
    serde_json::from_slice(&bytes).map_err(|e| FetchError::malformed(format!("{label}: {e}")))
}
