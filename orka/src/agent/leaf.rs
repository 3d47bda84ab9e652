//! Builtin leaf agents: prompted completion, label classification, web search.
//!
//! Leaf agents are opaque to the engine: rendered prompt in, [`AgentOutput`]
//! out. Provider calls go through the engine's attempt-timeout wrapper so
//! timeout enforcement stays out of agent code.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::{AgentOutput, Context, Metrics, TraceInfo};
use crate::engine::Engine;
use crate::error::OrkaError;
use crate::graph::NodeSpec;
use crate::providers::{LlmParams, LlmProvider, SearchProvider};

use super::{Node, NodeDescriptor, NodeOutcome, SharedDeps};

#[derive(Debug, Clone, Default, Deserialize)]
struct LlmAgentParams {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    estimated_cost: Option<f64>,
    #[serde(default)]
    estimated_latency_ms: Option<u64>,
}

/// Prompted completion against the configured [`LlmProvider`].
pub struct LlmAgent {
    descriptor: NodeDescriptor,
    provider: Arc<dyn LlmProvider>,
    params: LlmParams,
}

impl LlmAgent {
    pub fn build(spec: &NodeSpec, deps: &SharedDeps) -> Result<Arc<dyn Node>, OrkaError> {
        let p: LlmAgentParams = spec
            .parse_params()
            .map_err(|e| OrkaError::GraphInvalid { reasons: vec![e] })?;
        let mut descriptor = NodeDescriptor::leaf(&spec.id, "llm");
        descriptor.side_effects = spec.side_effects;
        descriptor.estimated_cost = p.estimated_cost;
        descriptor.estimated_latency_ms = p.estimated_latency_ms;
        Ok(Arc::new(Self {
            descriptor,
            provider: deps.llm.clone(),
            params: LlmParams {
                model: p.model,
                temperature: p.temperature,
                max_tokens: p.max_tokens,
            },
        }))
    }
}

#[async_trait]
impl Node for LlmAgent {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        rt: &Engine,
        ctx: &Context,
        prompt: Option<&str>,
    ) -> Result<NodeOutcome, OrkaError> {
        let prompt = prompt
            .map(str::to_string)
            .unwrap_or_else(|| input_text(ctx));
        let generation = rt
            .provider_attempt(
                &self.descriptor.id,
                self.provider.generate(&prompt, &self.params),
            )
            .await?;
        Ok(NodeOutcome::of(
            AgentOutput::success(Value::String(generation.text))
                .with_metrics(Metrics {
                    tokens: generation.tokens,
                    latency_ms: generation.latency_ms,
                    retries: 0,
                    cost: generation.cost,
                })
                .with_trace(TraceInfo {
                    prompt: Some(prompt),
                    model: Some(generation.model),
                    sub_outputs: Default::default(),
                }),
        ))
    }
}

fn default_labels() -> Vec<String> {
    vec!["true".into(), "false".into()]
}

#[derive(Debug, Clone, Deserialize)]
struct ClassifierParams {
    #[serde(default = "default_labels")]
    labels: Vec<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
}

/// LLM constrained to a label set: the response's first line is normalized and
/// matched against `labels` (exact, then substring). No match is a failure —
/// the router downstream needs a decision it can trust.
pub struct ClassifierAgent {
    descriptor: NodeDescriptor,
    provider: Arc<dyn LlmProvider>,
    labels: Vec<String>,
    params: LlmParams,
}

impl ClassifierAgent {
    pub fn build(spec: &NodeSpec, deps: &SharedDeps) -> Result<Arc<dyn Node>, OrkaError> {
        let p: ClassifierParams = spec
            .parse_params()
            .map_err(|e| OrkaError::GraphInvalid { reasons: vec![e] })?;
        if p.labels.is_empty() {
            return Err(OrkaError::GraphInvalid {
                reasons: vec![format!("classifier '{}': labels must not be empty", spec.id)],
            });
        }
        Ok(Arc::new(Self {
            descriptor: NodeDescriptor::leaf(&spec.id, "classifier"),
            provider: deps.llm.clone(),
            labels: p.labels.iter().map(|l| l.to_lowercase()).collect(),
            params: LlmParams {
                model: p.model,
                temperature: p.temperature,
                max_tokens: None,
            },
        }))
    }

    fn match_label(&self, text: &str) -> Option<String> {
        let normalized = text
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if let Some(label) = self.labels.iter().find(|l| **l == normalized) {
            return Some(label.clone());
        }
        self.labels
            .iter()
            .find(|l| normalized.contains(l.as_str()))
            .cloned()
    }
}

#[async_trait]
impl Node for ClassifierAgent {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        rt: &Engine,
        ctx: &Context,
        prompt: Option<&str>,
    ) -> Result<NodeOutcome, OrkaError> {
        let prompt = prompt
            .map(str::to_string)
            .unwrap_or_else(|| input_text(ctx));
        let generation = rt
            .provider_attempt(
                &self.descriptor.id,
                self.provider.generate(&prompt, &self.params),
            )
            .await?;
        let metrics = Metrics {
            tokens: generation.tokens,
            latency_ms: generation.latency_ms,
            retries: 0,
            cost: generation.cost,
        };
        let trace = TraceInfo {
            prompt: Some(prompt),
            model: Some(generation.model),
            sub_outputs: Default::default(),
        };
        match self.match_label(&generation.text) {
            Some(label) => Ok(NodeOutcome::of(
                AgentOutput::success(Value::String(label))
                    .with_metrics(metrics)
                    .with_trace(trace),
            )),
            None => Err(OrkaError::AgentFailed(format!(
                "classifier '{}': response {:?} matched none of {:?}",
                self.descriptor.id, generation.text, self.labels
            ))),
        }
    }
}

fn default_search_limit() -> usize {
    5
}

#[derive(Debug, Clone, Deserialize)]
struct SearchAgentParams {
    #[serde(default = "default_search_limit")]
    limit: usize,
}

/// Web search via the configured [`SearchProvider`]; returns snippet objects.
pub struct SearchAgent {
    descriptor: NodeDescriptor,
    provider: Arc<dyn SearchProvider>,
    limit: usize,
}

impl SearchAgent {
    pub fn build(spec: &NodeSpec, deps: &SharedDeps) -> Result<Arc<dyn Node>, OrkaError> {
        let p: SearchAgentParams = spec
            .parse_params()
            .map_err(|e| OrkaError::GraphInvalid { reasons: vec![e] })?;
        Ok(Arc::new(Self {
            descriptor: NodeDescriptor::leaf(&spec.id, "search"),
            provider: deps.search.clone(),
            limit: p.limit,
        }))
    }
}

#[async_trait]
impl Node for SearchAgent {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        rt: &Engine,
        ctx: &Context,
        prompt: Option<&str>,
    ) -> Result<NodeOutcome, OrkaError> {
        let query = prompt
            .map(str::to_string)
            .unwrap_or_else(|| input_text(ctx));
        let snippets = rt
            .provider_attempt(&self.descriptor.id, self.provider.search(&query, self.limit))
            .await?;
        let results: Vec<Value> = snippets
            .iter()
            .map(|s| json!({"title": s.title, "url": s.url, "content": s.content}))
            .collect();
        Ok(NodeOutcome::of(
            AgentOutput::success(Value::Array(results)).with_trace(TraceInfo {
                prompt: Some(query),
                model: Some(self.provider.name().to_string()),
                sub_outputs: Default::default(),
            }),
        ))
    }
}

fn input_text(ctx: &Context) -> String {
    match &ctx.input {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: label matching normalizes case, punctuation and prefixes.
    #[test]
    fn classifier_label_matching() {
        let agent = ClassifierAgent {
            descriptor: NodeDescriptor::leaf("c", "classifier"),
            provider: Arc::new(crate::providers::MockLlm::always("unused")),
            labels: vec!["yes".into(), "no".into()],
            params: LlmParams::default(),
        };
        assert_eq!(agent.match_label("Yes"), Some("yes".into()));
        assert_eq!(agent.match_label("  \"no\"  "), Some("no".into()));
        assert_eq!(agent.match_label("yes, because ..."), Some("yes".into()));
        assert_eq!(agent.match_label("maybe"), None);
        // Only the first line decides.
        assert_eq!(agent.match_label("no\nyes"), Some("no".into()));
    }

    /// **Scenario**: empty label set is rejected at build time.
    #[test]
    fn classifier_rejects_empty_labels() {
        let spec: NodeSpec =
            serde_yaml::from_str("id: c\ntype: classifier\nlabels: []\n").unwrap();
        let err = ClassifierAgent::build(&spec, &crate::agent::test_support::test_deps())
            .unwrap_err();
        assert!(matches!(err, OrkaError::GraphInvalid { .. }));
    }
}
