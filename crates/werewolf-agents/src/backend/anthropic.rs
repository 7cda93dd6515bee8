//! Anthropic Messages API.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{http_client, post_json, text_at, BackendError, GenerationBackend};

pub const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicBackend {
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl AnthropicBackend {
    pub fn new(
        api_key: Option<String>,
        base_url: impl Into<String>,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_tokens,
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl GenerationBackend for AnthropicBackend {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        _schema: &Value,
        temperature: f64,
    ) -> Result<String, BackendError> {
        let Some(key) = &self.api_key else {
            return Err(BackendError::MissingApiKey("anthropic".into()));
        };

        let body = json!({
            "model": model,
            "max_tokens": self.max_tokens,
            "temperature": temperature,
            "messages": [{"role": "user", "content": prompt}],
        });

        let request = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION);

        let resp = post_json("anthropic", request, &body).await?;
        text_at("anthropic", &resp, "/content/0/text")
    }
}
