//! OpenAI-compatible chat provider.
//!
//! Requires `OPENAI_API_KEY` (or explicit config with a custom base URL, for
//! OpenAI-compatible local servers). Model identifiers pass through opaquely;
//! cost is estimated from token usage at a configurable per-1k rate.

use std::time::Instant;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::debug;

use super::{Generation, LlmParams, LlmProvider, ProviderError};

/// Chat Completions client implementing [`LlmProvider`].
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    default_model: String,
    /// USD per 1k tokens used for cost estimation in run reports.
    cost_per_1k_tokens: f64,
}

impl OpenAiProvider {
    /// API key from `OPENAI_API_KEY`.
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            default_model: default_model.into(),
            cost_per_1k_tokens: 0.0,
        }
    }

    /// Custom config (key, base URL) for OpenAI-compatible endpoints.
    pub fn with_config(config: OpenAIConfig, default_model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            default_model: default_model.into(),
            cost_per_1k_tokens: 0.0,
        }
    }

    pub fn with_cost_per_1k_tokens(mut self, cost: f64) -> Self {
        self.cost_per_1k_tokens = cost;
        self
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn generate(
        &self,
        prompt: &str,
        params: &LlmParams,
    ) -> Result<Generation, ProviderError> {
        let model = params
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(model.clone());
        args.messages(vec![ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage::from(prompt),
        )]);
        if let Some(t) = params.temperature {
            args.temperature(t);
        }
        if let Some(m) = params.max_tokens {
            args.max_completion_tokens(m);
        }
        let request = args
            .build()
            .map_err(|e| ProviderError::Api(format!("request build failed: {}", e)))?;

        debug!(model = %model, prompt_len = prompt.len(), "chat completion request");
        let started = Instant::now();
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| ProviderError::Api(e.to_string()))?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let text = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| ProviderError::InvalidResponse("no choices in response".into()))?;
        let tokens = response
            .usage
            .map(|u| (u.prompt_tokens + u.completion_tokens) as u64)
            .unwrap_or(0);

        Ok(Generation {
            text,
            tokens,
            latency_ms,
            cost: tokens as f64 / 1000.0 * self.cost_per_1k_tokens,
            model,
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}
