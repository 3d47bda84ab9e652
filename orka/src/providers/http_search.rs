//! HTTP search provider (DuckDuckGo-style instant-answer JSON endpoint).

use async_trait::async_trait;
use serde::Deserialize;

use super::{ProviderError, SearchProvider, Snippet};

const DEFAULT_ENDPOINT: &str = "https://api.duckduckgo.com/";

/// Queries a JSON search endpoint and maps related topics to snippets.
pub struct HttpSearchProvider {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct InstantAnswer {
    #[serde(default, rename = "AbstractText")]
    abstract_text: String,
    #[serde(default, rename = "AbstractURL")]
    abstract_url: String,
    #[serde(default, rename = "Heading")]
    heading: String,
    #[serde(default, rename = "RelatedTopics")]
    related_topics: Vec<RelatedTopic>,
}

#[derive(Debug, Deserialize)]
struct RelatedTopic {
    #[serde(default, rename = "Text")]
    text: String,
    #[serde(default, rename = "FirstURL")]
    first_url: String,
}

impl Default for HttpSearchProvider {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

impl HttpSearchProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Snippet>, ProviderError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("format", "json"), ("no_html", "1")])
            .send()
            .await
            .map_err(|e| ProviderError::Api(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProviderError::Api(format!(
                "search endpoint returned {}",
                response.status()
            )));
        }
        let answer: InstantAnswer = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let mut snippets = Vec::new();
        if !answer.abstract_text.is_empty() {
            snippets.push(Snippet {
                title: answer.heading.clone(),
                url: answer.abstract_url.clone(),
                content: answer.abstract_text.clone(),
            });
        }
        for topic in answer.related_topics {
            if snippets.len() >= limit {
                break;
            }
            if topic.text.is_empty() {
                continue;
            }
            snippets.push(Snippet {
                title: topic.text.chars().take(80).collect(),
                url: topic.first_url,
                content: topic.text,
            });
        }
        snippets.truncate(limit);
        Ok(snippets)
    }

    fn name(&self) -> &str {
        "http-search"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: instant-answer JSON maps into snippets (abstract first).
    #[test]
    fn instant_answer_parses() {
        let raw = r#"{
            "AbstractText": "Paris is the capital of France.",
            "AbstractURL": "https://en.wikipedia.org/wiki/Paris",
            "Heading": "Paris",
            "RelatedTopics": [
                {"Text": "France - country in Europe", "FirstURL": "https://x/france"},
                {"Text": "", "FirstURL": "https://x/empty"}
            ]
        }"#;
        let answer: InstantAnswer = serde_json::from_str(raw).unwrap();
        assert_eq!(answer.abstract_text, "Paris is the capital of France.");
        assert_eq!(answer.related_topics.len(), 2);
        assert_eq!(answer.related_topics[0].first_url, "https://x/france");
    }
}
