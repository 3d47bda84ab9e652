//! Environment-driven runtime configuration.
//!
//! Recognized variables (unknown ones are ignored):
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `ORKA_MEMORY_URL` | memory backend URL (`memory://`, `sqlite://<path>`) | `memory://` |
//! | `ORKA_MEMORY_DECAY_ENABLED` | TTL decay toggle | `true` |
//! | `ORKA_MEMORY_SHORT_TERM_HOURS` | short-term base TTL | preset/policy |
//! | `ORKA_MEMORY_LONG_TERM_HOURS` | long-term base TTL | preset/policy |
//! | `ORKA_MEMORY_CHECK_INTERVAL_MINUTES` | decay sweep cadence | policy |
//! | `ORKA_LLM_PROVIDER` | `openai` or `mock` | `openai` |
//! | `ORKA_LLM_MODEL` | default model identifier | `gpt-4o-mini` |
//! | `OPENAI_API_KEY` | provider key (required for `openai`) | — |
//! | `ORKA_SEARCH_URL` | search endpoint | DuckDuckGo |
//! | `ORKA_EMBEDDER` | `hash` or `openai` | `hash` |
//! | `ORKA_EMBEDDING_MODEL` | OpenAI embedding model | `text-embedding-3-small` |
//! | `ORKA_EMBEDDING_DIM` | hash embedder dimension | `256` |
//! | `ORKA_EMBEDDER_CACHE` | embedder LRU capacity | `1024` |
//!
//! Missing required variables produce a [`OrkaError::Configuration`] at
//! startup, not mid-run.

use std::sync::Arc;
use std::time::Duration;

use crate::error::OrkaError;
use crate::memory::{
    backend_from_url, CachedEmbedder, Embedder, HashEmbedder, MemoryStore, OpenAiEmbedder,
    RetentionPolicy,
};
use crate::providers::{
    HttpSearchProvider, LlmProvider, MockLlm, MockSearch, OpenAiProvider, SearchProvider,
};

/// Which LLM provider the runtime constructs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProviderKind {
    OpenAi,
    /// Deterministic mock, for offline runs and tests.
    Mock,
}

/// Which embedder backs the memory store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    /// Deterministic token-hash vectors; no network, stable across runs.
    Hash,
    /// OpenAI Embeddings API (`ORKA_EMBEDDING_MODEL`).
    OpenAi,
}

/// Typed snapshot of the runtime environment.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub memory_url: String,
    pub decay_enabled: bool,
    pub short_term_hours: Option<f64>,
    pub long_term_hours: Option<f64>,
    pub check_interval_minutes: Option<u64>,
    pub llm_provider: LlmProviderKind,
    pub llm_model: String,
    pub openai_api_key: Option<String>,
    pub search_url: Option<String>,
    pub embedder: EmbedderKind,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub embedder_cache: usize,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            memory_url: "memory://".into(),
            decay_enabled: true,
            short_term_hours: None,
            long_term_hours: None,
            check_interval_minutes: None,
            llm_provider: LlmProviderKind::OpenAi,
            llm_model: "gpt-4o-mini".into(),
            openai_api_key: None,
            search_url: None,
            embedder: EmbedderKind::Hash,
            embedding_model: "text-embedding-3-small".into(),
            embedding_dimension: 256,
            embedder_cache: 1024,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, OrkaError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| OrkaError::Configuration(format!("{}: cannot parse {:?}", name, raw))),
        Err(_) => Ok(None),
    }
}

impl EnvConfig {
    /// Reads the environment. Unknown variables are ignored; malformed or
    /// missing required ones fail here.
    pub fn from_env() -> Result<Self, OrkaError> {
        let config = Self::from_env_lenient()?;
        if config.llm_provider == LlmProviderKind::OpenAi && config.openai_api_key.is_none() {
            return Err(OrkaError::Configuration(
                "OPENAI_API_KEY is required when ORKA_LLM_PROVIDER=openai \
                 (set ORKA_LLM_PROVIDER=mock for offline runs)"
                    .into(),
            ));
        }
        Ok(config)
    }

    /// Same read without the provider-key requirement. Memory and status
    /// commands use this: they never call a provider.
    pub fn from_env_lenient() -> Result<Self, OrkaError> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("ORKA_MEMORY_URL") {
            config.memory_url = url;
        }
        if let Some(enabled) = parse_var::<bool>("ORKA_MEMORY_DECAY_ENABLED")? {
            config.decay_enabled = enabled;
        }
        config.short_term_hours = parse_var("ORKA_MEMORY_SHORT_TERM_HOURS")?;
        config.long_term_hours = parse_var("ORKA_MEMORY_LONG_TERM_HOURS")?;
        config.check_interval_minutes = parse_var("ORKA_MEMORY_CHECK_INTERVAL_MINUTES")?;
        if let Ok(provider) = std::env::var("ORKA_LLM_PROVIDER") {
            config.llm_provider = match provider.as_str() {
                "openai" => LlmProviderKind::OpenAi,
                "mock" => LlmProviderKind::Mock,
                other => {
                    return Err(OrkaError::Configuration(format!(
                        "ORKA_LLM_PROVIDER: unknown provider {:?} (openai, mock)",
                        other
                    )))
                }
            };
        }
        if let Ok(model) = std::env::var("ORKA_LLM_MODEL") {
            config.llm_model = model;
        }
        config.openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        config.search_url = std::env::var("ORKA_SEARCH_URL").ok();
        if let Ok(embedder) = std::env::var("ORKA_EMBEDDER") {
            config.embedder = match embedder.as_str() {
                "hash" => EmbedderKind::Hash,
                "openai" => EmbedderKind::OpenAi,
                other => {
                    return Err(OrkaError::Configuration(format!(
                        "ORKA_EMBEDDER: unknown embedder {:?} (hash, openai)",
                        other
                    )))
                }
            };
        }
        if let Ok(model) = std::env::var("ORKA_EMBEDDING_MODEL") {
            config.embedding_model = model;
        }
        if let Some(dim) = parse_var::<usize>("ORKA_EMBEDDING_DIM")? {
            config.embedding_dimension = dim;
        }
        if let Some(cache) = parse_var::<usize>("ORKA_EMBEDDER_CACHE")? {
            config.embedder_cache = cache;
        }
        Ok(config)
    }

    /// Applies the env TTL/decay overrides to a base policy.
    pub fn apply_to_policy(&self, policy: &mut RetentionPolicy) {
        policy.decay_enabled = self.decay_enabled;
        if let Some(hours) = self.short_term_hours {
            policy.short_term_hours = hours;
        }
        if let Some(hours) = self.long_term_hours {
            policy.long_term_hours = hours;
        }
        if let Some(minutes) = self.check_interval_minutes {
            policy.check_interval = Duration::from_secs(minutes * 60);
        }
    }

    /// Builds the memory store over the configured backend and embedder.
    /// The embedder is always wrapped in the LRU cache, which also provides
    /// zero-marker degradation when a remote embedder fails.
    pub fn build_store(&self, mut policy: RetentionPolicy) -> Result<Arc<MemoryStore>, OrkaError> {
        self.apply_to_policy(&mut policy);
        let backend = backend_from_url(&self.memory_url).map_err(OrkaError::from)?;
        let inner: Arc<dyn Embedder> = match self.embedder {
            EmbedderKind::Hash => Arc::new(HashEmbedder::new(self.embedding_dimension)),
            EmbedderKind::OpenAi => Arc::new(OpenAiEmbedder::new(self.embedding_model.clone())),
        };
        let embedder = Arc::new(CachedEmbedder::new(inner, self.embedder_cache));
        Ok(Arc::new(MemoryStore::new(backend, embedder, policy)))
    }

    pub fn build_llm(&self) -> Arc<dyn LlmProvider> {
        match self.llm_provider {
            LlmProviderKind::OpenAi => Arc::new(OpenAiProvider::new(self.llm_model.clone())),
            LlmProviderKind::Mock => Arc::new(MockLlm::always("mock response")),
        }
    }

    pub fn build_search(&self) -> Arc<dyn SearchProvider> {
        match (&self.llm_provider, &self.search_url) {
            (LlmProviderKind::Mock, _) => Arc::new(MockSearch::empty()),
            (_, Some(url)) => Arc::new(HttpSearchProvider::new(url.clone())),
            (_, None) => Arc::new(HttpSearchProvider::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; each uses distinct variables or
    // restores them to stay order-independent.

    /// **Scenario**: defaults apply when nothing is set.
    #[test]
    fn defaults_apply() {
        let config = EnvConfig::default();
        assert_eq!(config.memory_url, "memory://");
        assert!(config.decay_enabled);
        assert_eq!(config.llm_provider, LlmProviderKind::OpenAi);
        assert_eq!(config.embedding_dimension, 256);
    }

    /// **Scenario**: malformed numeric variables fail with Configuration.
    #[test]
    fn malformed_value_fails() {
        std::env::set_var("ORKA_MEMORY_SHORT_TERM_HOURS", "not-a-number");
        let err = EnvConfig::from_env().unwrap_err();
        std::env::remove_var("ORKA_MEMORY_SHORT_TERM_HOURS");
        assert!(matches!(err, OrkaError::Configuration(_)));
    }

    /// **Scenario**: policy overrides patch only the set fields.
    #[test]
    fn policy_overrides_patch() {
        let config = EnvConfig {
            decay_enabled: false,
            short_term_hours: Some(9.0),
            ..EnvConfig::default()
        };
        let mut policy = RetentionPolicy::default();
        config.apply_to_policy(&mut policy);
        assert!(!policy.decay_enabled);
        assert!((policy.short_term_hours - 9.0).abs() < 1e-9);
        assert!((policy.long_term_hours - 168.0).abs() < 1e-9);
    }

    /// **Scenario**: the mock provider kind builds offline deps.
    #[test]
    fn mock_kind_builds_offline() {
        let config = EnvConfig {
            llm_provider: LlmProviderKind::Mock,
            ..EnvConfig::default()
        };
        assert_eq!(config.build_llm().name(), "mock-llm");
        assert_eq!(config.build_search().name(), "mock-search");
        assert!(config.build_store(RetentionPolicy::default()).is_ok());
    }
}
