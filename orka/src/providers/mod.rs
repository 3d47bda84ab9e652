//! Provider interfaces for leaf agents.
//!
//! The engine treats providers as opaque: an [`LlmProvider`] turns a rendered
//! prompt into text with usage accounting, a [`SearchProvider`] turns a query
//! into snippets. Concrete clients (OpenAI-compatible chat, HTTP search) live
//! here behind the traits; tests use the deterministic mocks.

mod http_search;
mod mock;
mod openai;

pub use http_search::HttpSearchProvider;
pub use mock::{MockLlm, MockSearch};
pub use openai::OpenAiProvider;

use async_trait::async_trait;
use thiserror::Error;

/// Provider-level failure; leaf agents wrap it into `AgentFailed`.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("api: {0}")]
    Api(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Generation parameters passed through from the agent's config. Provider and
/// model identifiers are opaque to the engine.
#[derive(Debug, Clone, Default)]
pub struct LlmParams {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// One completed generation with usage accounting.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub tokens: u64,
    pub latency_ms: u64,
    pub cost: f64,
    /// Model that actually served the request.
    pub model: String,
}

/// Text-in, text-out language model.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, prompt: &str, params: &LlmParams)
        -> Result<Generation, ProviderError>;

    /// Display name, used in traces.
    fn name(&self) -> &str;
}

/// One search result snippet.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Snippet {
    pub title: String,
    pub url: String,
    pub content: String,
}

/// Web/document search service.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Snippet>, ProviderError>;

    fn name(&self) -> &str;
}
