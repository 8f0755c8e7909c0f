//! Shared plumbing for OpenAI-compatible HTTP providers.
//!
//! Builds timeout-bounded `reqwest` clients and folds transport failures and
//! non-success responses into a [`ProviderFailure`] with a normalised
//! [`ProviderErrorKind`]. Each request owns its response body; dropping the
//! future releases the connection back to the pool.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{ProviderErrorKind, RagError, Result};

/// A normalised provider failure, turned into an embedding or generation error by the caller.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProviderFailure {
    pub kind: ProviderErrorKind,
    pub message: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Build an HTTP client whose every request is bounded by `timeout`.
pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .map_err(|e| RagError::ConfigError(format!("failed to build HTTP client: {e}")))
}

/// Join a base URL and an endpoint path without doubling slashes.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Classify a transport-level failure.
pub(crate) fn transport_failure(err: &reqwest::Error) -> ProviderFailure {
    ProviderFailure {
        kind: ProviderErrorKind::from_reqwest(err),
        message: format!("request failed: {err}"),
    }
}

/// Pass successful responses through; turn anything else into a [`ProviderFailure`].
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> std::result::Result<reqwest::Response, ProviderFailure> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(status_failure(status.as_u16(), &body))
}

/// Build the failure for a non-success status, preferring the provider's own message.
pub(crate) fn status_failure(status: u16, body: &str) -> ProviderFailure {
    let detail = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());
    ProviderFailure {
        kind: ProviderErrorKind::from_status(status),
        message: format!("API returned {status}: {detail}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_normalised() {
        assert_eq!(status_failure(401, "").kind, ProviderErrorKind::Auth);
        assert_eq!(status_failure(403, "").kind, ProviderErrorKind::Auth);
        assert_eq!(status_failure(429, "").kind, ProviderErrorKind::RateLimit);
        assert_eq!(status_failure(504, "").kind, ProviderErrorKind::Timeout);
        assert_eq!(status_failure(500, "").kind, ProviderErrorKind::Provider);
    }

    #[test]
    fn provider_message_is_extracted() {
        let failure = status_failure(429, r#"{"error":{"message":"slow down"}}"#);
        assert_eq!(failure.message, "API returned 429: slow down");
    }

    #[test]
    fn endpoints_join_cleanly() {
        assert_eq!(
            endpoint("https://api.openai.com/v1/", "/embeddings"),
            "https://api.openai.com/v1/embeddings"
        );
        assert_eq!(
            endpoint("http://localhost:8080/v1", "chat/completions"),
            "http://localhost:8080/v1/chat/completions"
        );
    }
}
