//! Language-model generation boundary.
//!
//! [`GenerationProvider`] is the single capability the answerer needs: turn
//! one prompt into one completion. [`OpenAIChatProvider`] implements it over
//! an OpenAI-compatible `/chat/completions` endpoint (feature `openai`).
//! No component in this crate retries; a provider that wants retries wraps
//! its own calls.

use async_trait::async_trait;

use crate::error::Result;

/// A provider that generates text for a prompt.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Generate a completion for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::GenerationError`](crate::RagError::GenerationError)
    /// with a normalised kind (auth, rate limit, timeout, provider).
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Return the name of the underlying model.
    fn model_name(&self) -> &str;
}

#[cfg(feature = "openai")]
pub use self::openai_chat::{OpenAIChatConfig, OpenAIChatProvider};

#[cfg(feature = "openai")]
mod openai_chat {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use tracing::{debug, error};

    use super::GenerationProvider;
    use crate::config::{DEFAULT_API_URL, DEFAULT_CHAT_MODEL, Settings};
    use crate::error::{ProviderErrorKind, RagError, Result};
    use crate::provider::{self, ProviderFailure};

    const PROVIDER: &str = "OpenAI";

    /// Connection and sampling settings for [`OpenAIChatProvider`].
    #[derive(Clone)]
    pub struct OpenAIChatConfig {
        /// Bearer token sent with every request.
        pub api_key: String,
        /// API base URL, e.g. `https://api.openai.com/v1`.
        pub base_url: String,
        /// Chat model name.
        pub model: String,
        /// Sampling temperature.
        pub temperature: f32,
        /// Per-request timeout.
        pub timeout: Duration,
    }

    impl std::fmt::Debug for OpenAIChatConfig {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("OpenAIChatConfig")
                .field("base_url", &self.base_url)
                .field("model", &self.model)
                .field("temperature", &self.temperature)
                .field("timeout", &self.timeout)
                .finish_non_exhaustive()
        }
    }

    impl OpenAIChatConfig {
        /// Create a configuration with the default endpoint, model and temperature.
        pub fn new(api_key: impl Into<String>) -> Self {
            Self {
                api_key: api_key.into(),
                base_url: DEFAULT_API_URL.to_string(),
                model: DEFAULT_CHAT_MODEL.to_string(),
                temperature: 0.3,
                timeout: Duration::from_secs(30),
            }
        }

        /// Build the configuration described by deployment [`Settings`].
        pub fn from_settings(settings: &Settings) -> Self {
            Self {
                api_key: settings.api_key.clone(),
                base_url: settings.api_url.clone(),
                model: settings.chat_model.clone(),
                temperature: settings.temperature,
                timeout: settings.timeout,
            }
        }

        /// Set the API base URL.
        pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
            self.base_url = base_url.into();
            self
        }

        /// Set the chat model.
        pub fn with_model(mut self, model: impl Into<String>) -> Self {
            self.model = model.into();
            self
        }

        /// Set the sampling temperature.
        pub fn with_temperature(mut self, temperature: f32) -> Self {
            self.temperature = temperature;
            self
        }

        /// Set the per-request timeout.
        pub fn with_timeout(mut self, timeout: Duration) -> Self {
            self.timeout = timeout;
            self
        }
    }

    /// A [`GenerationProvider`] backed by an OpenAI-compatible chat completions API.
    ///
    /// The prompt is sent as a single user message.
    pub struct OpenAIChatProvider {
        client: reqwest::Client,
        config: OpenAIChatConfig,
    }

    impl OpenAIChatProvider {
        /// Create a provider from the given configuration.
        ///
        /// # Errors
        ///
        /// Returns [`RagError::ConfigError`] if the API key is empty.
        pub fn new(config: OpenAIChatConfig) -> Result<Self> {
            if config.api_key.trim().is_empty() {
                return Err(RagError::ConfigError("chat API key must not be empty".to_string()));
            }
            let client = provider::build_client(config.timeout)?;
            Ok(Self { client, config })
        }

        async fn request(&self, prompt: &str) -> std::result::Result<String, ProviderFailure> {
            let body = ChatRequest {
                model: &self.config.model,
                messages: vec![ChatMessage { role: "user", content: prompt }],
                temperature: self.config.temperature,
            };

            let response = self
                .client
                .post(provider::endpoint(&self.config.base_url, "chat/completions"))
                .bearer_auth(&self.config.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| provider::transport_failure(&e))?;
            let response = provider::check_status(response).await?;

            let parsed: ChatResponse = response.json().await.map_err(|e| ProviderFailure {
                kind: if e.is_timeout() {
                    ProviderErrorKind::Timeout
                } else {
                    ProviderErrorKind::Provider
                },
                message: format!("failed to parse response: {e}"),
            })?;

            parsed
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .ok_or_else(|| ProviderFailure {
                    kind: ProviderErrorKind::Provider,
                    message: "response contained no message content".to_string(),
                })
        }
    }

    #[derive(Serialize)]
    struct ChatRequest<'a> {
        model: &'a str,
        messages: Vec<ChatMessage<'a>>,
        temperature: f32,
    }

    #[derive(Serialize)]
    struct ChatMessage<'a> {
        role: &'a str,
        content: &'a str,
    }

    #[derive(Deserialize)]
    struct ChatResponse {
        choices: Vec<ChatChoice>,
    }

    #[derive(Deserialize)]
    struct ChatChoice {
        message: ChatResponseMessage,
    }

    #[derive(Deserialize)]
    struct ChatResponseMessage {
        content: Option<String>,
    }

    #[async_trait]
    impl GenerationProvider for OpenAIChatProvider {
        async fn generate(&self, prompt: &str) -> Result<String> {
            debug!(
                provider = PROVIDER,
                model = %self.config.model,
                prompt_len = prompt.len(),
                "generating"
            );

            self.request(prompt).await.map_err(|failure| {
                error!(
                    provider = PROVIDER,
                    kind = %failure.kind,
                    error = %failure.message,
                    "generation failed"
                );
                RagError::GenerationError {
                    provider: PROVIDER.to_string(),
                    kind: failure.kind,
                    message: failure.message,
                }
            })
        }

        fn model_name(&self) -> &str {
            &self.config.model
        }
    }
}
