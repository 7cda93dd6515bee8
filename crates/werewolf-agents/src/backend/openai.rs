//! OpenAI-compatible chat completions.
//!
//! Also serves local OpenAI-compatible servers: point `base_url` at them
//! and leave the key unset.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{http_client, post_json, text_at, BackendError, GenerationBackend};

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiBackend {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(
        api_key: Option<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: http_client(timeout)?,
        })
    }

    fn is_hosted(&self) -> bool {
        self.base_url == DEFAULT_OPENAI_URL
    }
}

pub(crate) fn request_body(model: &str, prompt: &str, temperature: f64) -> Value {
    json!({
        "model": model,
        "messages": [{"role": "user", "content": prompt}],
        "temperature": temperature,
        "response_format": {"type": "json_object"},
    })
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        _schema: &Value,
        temperature: f64,
    ) -> Result<String, BackendError> {
        if self.api_key.is_none() && self.is_hosted() {
            return Err(BackendError::MissingApiKey("openai".into()));
        }

        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.client.post(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let body = post_json("openai", request, &request_body(model, prompt, temperature)).await?;
        text_at("openai", &body, "/choices/0/message/content")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_requests_json_object_mode() {
        let body = request_body("gpt-4o", "pick one", 0.5);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["content"], "pick one");
        assert_eq!(body["temperature"], 0.5);
    }

    #[tokio::test]
    async fn hosted_endpoint_requires_key() {
        let backend =
            OpenAiBackend::new(None, DEFAULT_OPENAI_URL, Duration::from_secs(5)).unwrap();
        let err = backend
            .generate("gpt-4o", "hi", &Value::Null, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::MissingApiKey(_)));
    }
}
