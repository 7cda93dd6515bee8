//! Gemini `generateContent`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{http_client, post_json, text_at, BackendError, GenerationBackend};

pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiBackend {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiBackend {
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
}

/// JSON mime type plus the response schema, with safety blocking off so
/// that game talk about "removing" players is not filtered.
pub(crate) fn request_body(prompt: &str, schema: &Value, temperature: f64) -> Value {
    let mut generation_config = json!({
        "temperature": temperature,
        "responseMimeType": "application/json",
    });
    if schema.is_object() {
        generation_config["responseSchema"] = schema.clone();
    }

    let safety: Vec<Value> = [
        "HARM_CATEGORY_DANGEROUS_CONTENT",
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    ]
    .iter()
    .map(|category| json!({"category": category, "threshold": "BLOCK_NONE"}))
    .collect();

    json!({
        "contents": [{"role": "user", "parts": [{"text": prompt}]}],
        "generationConfig": generation_config,
        "safetySettings": safety,
    })
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        schema: &Value,
        temperature: f64,
    ) -> Result<String, BackendError> {
        let Some(key) = &self.api_key else {
            return Err(BackendError::MissingApiKey("gemini".into()));
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let request = self.client.post(&url).header("x-goog-api-key", key);
        let body = post_json("gemini", request, &request_body(prompt, schema, temperature)).await?;
        text_at("gemini", &body, "/candidates/0/content/parts/0/text")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_carries_schema_when_given() {
        let schema = json!({"type": "object", "properties": {"vote": {"type": "string"}}});
        let body = request_body("vote", &schema, 0.7);
        assert_eq!(body["generationConfig"]["responseSchema"], schema);
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["safetySettings"].as_array().map(Vec::len), Some(4));
    }

    #[test]
    fn body_omits_non_object_schema() {
        let body = request_body("vote", &Value::Null, 0.7);
        assert!(body["generationConfig"].get("responseSchema").is_none());
    }
}
