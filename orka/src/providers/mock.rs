//! Deterministic mock providers for tests and examples.
//!
//! [`MockLlm`] replays a scripted sequence of responses (then repeats the last
//! one), or always returns a fixed response. Running a graph twice against the
//! same mock yields identical outputs, which the determinism law relies on.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Generation, LlmParams, LlmProvider, ProviderError, Snippet, SearchProvider};

/// Scripted LLM: fixed response, a response sequence, or a forced failure.
pub struct MockLlm {
    responses: Vec<String>,
    calls: AtomicUsize,
    fail_with: Option<String>,
}

impl MockLlm {
    /// Always returns `text`.
    pub fn always(text: impl Into<String>) -> Self {
        Self {
            responses: vec![text.into()],
            calls: AtomicUsize::new(0),
            fail_with: None,
        }
    }

    /// Returns `responses` in order, repeating the last one when exhausted.
    pub fn sequence<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let responses: Vec<String> = responses.into_iter().map(Into::into).collect();
        assert!(!responses.is_empty(), "sequence requires at least one response");
        Self {
            responses,
            calls: AtomicUsize::new(0),
            fail_with: None,
        }
    }

    /// Every call fails with `message` (failover tests).
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            responses: vec![],
            calls: AtomicUsize::new(0),
            fail_with: Some(message.into()),
        }
    }

    /// Number of generate calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    async fn generate(
        &self,
        _prompt: &str,
        params: &LlmParams,
    ) -> Result<Generation, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(ProviderError::Api(message.clone()));
        }
        let text = self.responses[n.min(self.responses.len() - 1)].clone();
        Ok(Generation {
            tokens: text.split_whitespace().count() as u64,
            latency_ms: 0,
            cost: 0.0,
            model: params.model.clone().unwrap_or_else(|| "mock".into()),
            text,
        })
    }

    fn name(&self) -> &str {
        "mock-llm"
    }
}

/// Scripted search provider: fixed snippet list per call, optional failure.
pub struct MockSearch {
    snippets: Mutex<Vec<Snippet>>,
    fail_with: Option<String>,
}

impl MockSearch {
    pub fn with_snippets(snippets: Vec<Snippet>) -> Self {
        Self {
            snippets: Mutex::new(snippets),
            fail_with: None,
        }
    }

    pub fn empty() -> Self {
        Self::with_snippets(vec![])
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            snippets: Mutex::new(vec![]),
            fail_with: Some(message.into()),
        }
    }
}

#[async_trait]
impl SearchProvider for MockSearch {
    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<Snippet>, ProviderError> {
        if let Some(message) = &self.fail_with {
            return Err(ProviderError::Api(message.clone()));
        }
        let snippets = self.snippets.lock().expect("mock lock");
        Ok(snippets.iter().take(limit).cloned().collect())
    }

    fn name(&self) -> &str {
        "mock-search"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: a sequence replays in order and repeats its last element.
    #[tokio::test]
    async fn sequence_replays_then_repeats() {
        let llm = MockLlm::sequence(["SCORE: 0.4", "SCORE: 0.9"]);
        let params = LlmParams::default();
        assert_eq!(llm.generate("p", &params).await.unwrap().text, "SCORE: 0.4");
        assert_eq!(llm.generate("p", &params).await.unwrap().text, "SCORE: 0.9");
        assert_eq!(llm.generate("p", &params).await.unwrap().text, "SCORE: 0.9");
        assert_eq!(llm.calls(), 3);
    }

    /// **Scenario**: failing mock surfaces an Api error on every call.
    #[tokio::test]
    async fn failing_mock_errors() {
        let llm = MockLlm::failing("provider down");
        let err = llm.generate("p", &LlmParams::default()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Api(m) if m == "provider down"));
    }

    /// **Scenario**: mock search honors the limit.
    #[tokio::test]
    async fn search_honors_limit() {
        let search = MockSearch::with_snippets(vec![
            Snippet {
                title: "a".into(),
                url: "https://a".into(),
                content: "one".into(),
            },
            Snippet {
                title: "b".into(),
                url: "https://b".into(),
                content: "two".into(),
            },
        ]);
        let hits = search.search("q", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "a");
    }
}
