//! Generation backends.
//!
//! A backend turns a rendered prompt into raw model text. Model ids are
//! opaque strings; [`RoutedBackend`] picks the provider from the id.
//!
//! | Provider  | Selected when the model id | Endpoint                    |
//! |-----------|----------------------------|-----------------------------|
//! | OpenAI    | contains `gpt`             | `/chat/completions`         |
//! | Anthropic | contains `claude`          | `/v1/messages`              |
//! | Gemini    | anything else              | `/models/{id}:generateContent` |

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod router;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use anthropic::AnthropicBackend;
pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;
pub use router::{Provider, RoutedBackend};

/// Errors from a single generation call.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Transport failure (connect, timeout, TLS).
    #[error("request to {provider} failed: {message}")]
    Request { provider: String, message: String },

    /// Non-success HTTP status other than rate limiting.
    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("rate limited by {0}")]
    RateLimited(String),

    /// The response envelope did not contain generated text.
    #[error("malformed {provider} response: {message}")]
    MalformedResponse { provider: String, message: String },

    #[error("API key not configured for {0}")]
    MissingApiKey(String),

    /// The HTTP client could not be built.
    #[error("client setup failed: {0}")]
    Client(String),
}

impl BackendError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Request { .. } | Self::RateLimited(_) | Self::MalformedResponse { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::MissingApiKey(_) | Self::Client(_) => false,
        }
    }
}

/// The generation capability consumed by the decision gateway.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate raw text for `prompt`. `schema` describes the structured
    /// answer the prompt asks for.
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        schema: &Value,
        temperature: f64,
    ) -> Result<String, BackendError>;
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BackendError::Client(e.to_string()))
}

/// Send a JSON POST and return the decoded body, mapping failures.
pub(crate) async fn post_json(
    provider: &str,
    request: reqwest::RequestBuilder,
    body: &Value,
) -> Result<Value, BackendError> {
    let response = request
        .json(body)
        .send()
        .await
        .map_err(|e| BackendError::Request {
            provider: provider.to_string(),
            message: e.to_string(),
        })?;

    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(BackendError::RateLimited(provider.to_string()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Status {
            provider: provider.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    response
        .json()
        .await
        .map_err(|e| BackendError::MalformedResponse {
            provider: provider.to_string(),
            message: e.to_string(),
        })
}

/// Pull a string out of a response envelope by JSON pointer.
pub(crate) fn text_at(provider: &str, body: &Value, pointer: &str) -> Result<String, BackendError> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BackendError::MalformedResponse {
            provider: provider.to_string(),
            message: format!("no text at {}", pointer),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_key_is_not_retriable() {
        assert!(!BackendError::MissingApiKey("openai".into()).is_retriable());
        assert!(BackendError::RateLimited("gemini".into()).is_retriable());
    }

    #[test]
    fn server_errors_retry_client_errors_do_not() {
        let status = |code| BackendError::Status {
            provider: "openai".into(),
            status: code,
            body: String::new(),
        };
        assert!(status(503).is_retriable());
        assert!(!status(400).is_retriable());
    }

    #[test]
    fn text_at_reads_nested_text() {
        let body = json!({"choices": [{"message": {"content": "{\"vote\": \"Ada\"}"}}]});
        assert_eq!(
            text_at("openai", &body, "/choices/0/message/content").unwrap(),
            "{\"vote\": \"Ada\"}"
        );
        assert!(matches!(
            text_at("openai", &json!({}), "/choices/0/message/content"),
            Err(BackendError::MalformedResponse { .. })
        ));
    }
}
