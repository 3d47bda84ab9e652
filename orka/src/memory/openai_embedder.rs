//! OpenAI Embeddings implementation of [`Embedder`].
//!
//! Requires `OPENAI_API_KEY` (or explicit config for OpenAI-compatible
//! providers). Wrap in [`CachedEmbedder`](super::CachedEmbedder) so repeated
//! content never re-hits the API and backend failures degrade to the zero
//! marker instead of failing search.
//!
//! [`Embedder`]: super::Embedder

use async_openai::{
    config::OpenAIConfig,
    types::embeddings::{CreateEmbeddingRequest, EmbeddingInput},
    Client,
};
use async_trait::async_trait;

use super::backend::MemoryError;
use super::embedder::Embedder;

/// OpenAI Embeddings client. Default model `text-embedding-3-small`
/// (1536 dimensions); `text-embedding-3-large` resolves to 3072.
pub struct OpenAiEmbedder {
    config: OpenAIConfig,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    /// API key from `OPENAI_API_KEY`.
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_config(OpenAIConfig::new(), model)
    }

    /// Custom configuration (key, base URL) for compatible providers.
    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        let model = model.into();
        let dimensions = Self::model_dimensions(&model);
        Self {
            config,
            model,
            dimensions,
        }
    }

    fn model_dimensions(model: &str) -> usize {
        match model {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, MemoryError> {
        let inputs: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();
        let input = if inputs.len() == 1 {
            EmbeddingInput::String(inputs[0].clone())
        } else {
            EmbeddingInput::StringArray(inputs)
        };

        let client = Client::with_config(self.config.clone());
        let request = CreateEmbeddingRequest {
            input,
            model: self.model.clone(),
            ..Default::default()
        };
        let response = client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| MemoryError::Embedding(format!("embeddings api: {}", e)))?;
        if response.data.len() != texts.len() {
            return Err(MemoryError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.data.len()
            )));
        }
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimensions
    }
}
