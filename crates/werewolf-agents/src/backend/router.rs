use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{AnthropicBackend, BackendError, GeminiBackend, GenerationBackend, OpenAiBackend};
use crate::config::ProviderConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
    Gemini,
}

impl Provider {
    /// Pick a provider from an opaque model id.
    pub fn for_model(model: &str) -> Self {
        if model.contains("gpt") {
            Self::OpenAi
        } else if model.contains("claude") {
            Self::Anthropic
        } else {
            Self::Gemini
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
            Self::Gemini => write!(f, "gemini"),
        }
    }
}

/// Dispatches each call to the provider serving the model id.
pub struct RoutedBackend {
    openai: OpenAiBackend,
    anthropic: AnthropicBackend,
    gemini: GeminiBackend,
}

impl RoutedBackend {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, BackendError> {
        let timeout = config.request_timeout();
        Ok(Self {
            openai: OpenAiBackend::new(
                config.openai_api_key.clone(),
                &config.openai_base_url,
                timeout,
            )?,
            anthropic: AnthropicBackend::new(
                config.anthropic_api_key.clone(),
                &config.anthropic_base_url,
                config.anthropic_max_tokens,
                timeout,
            )?,
            gemini: GeminiBackend::new(
                config.gemini_api_key.clone(),
                &config.gemini_base_url,
                timeout,
            )?,
        })
    }
}

#[async_trait]
impl GenerationBackend for RoutedBackend {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        schema: &Value,
        temperature: f64,
    ) -> Result<String, BackendError> {
        let provider = Provider::for_model(model);
        debug!(%provider, model, temperature, "Generating");
        match provider {
            Provider::OpenAi => self.openai.generate(model, prompt, schema, temperature).await,
            Provider::Anthropic => {
                self.anthropic
                    .generate(model, prompt, schema, temperature)
                    .await
            }
            Provider::Gemini => self.gemini.generate(model, prompt, schema, temperature).await,
        }
    }
}
