//! Graph-scout (beta): look ahead over downstream agents and pick a path.
//!
//! Enumerates contiguous subsequences of the static sequence after this node,
//! up to `max_depth` long, gates them on safety and budget, scores the
//! survivors and decides: commit to one path, shortlist several, or raise
//! `NoViablePath` when nothing passes the gates.
//!
//! Safety criteria (consolidated): every candidate node must (1) have its
//! prompt resolvable from the current context (input readiness), (2) fit the
//! cost and latency budgets, and (3) keep a safety score at or above
//! `safety_threshold` — nodes marked `side_effects: true` score 0.5, all
//! others 1.0. Historical priors default to a neutral 0.5 and can be steered
//! per node through `metadata["prior:<node_id>"]` on the run context.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::agent::{Flow, Node, NodeDescriptor, NodeOutcome, SharedDeps};
use crate::context::{AgentOutput, Context};
use crate::engine::Engine;
use crate::error::OrkaError;
use crate::graph::NodeSpec;
use crate::memory::tokenize;
use crate::providers::{LlmParams, LlmProvider};
use crate::template::TemplateRenderer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ScoringMode {
    #[default]
    Numeric,
    Boolean,
}

fn default_k_beam() -> usize {
    3
}
fn default_max_depth() -> usize {
    2
}
fn default_commit_margin() -> f64 {
    0.1
}
fn default_safety_threshold() -> f64 {
    0.7
}
fn default_important_threshold() -> f64 {
    0.6
}

/// Weights for the numeric scoring mode; normalized by their sum.
#[derive(Debug, Clone, Deserialize)]
struct ScoutWeights {
    #[serde(default = "w_llm")]
    llm: f64,
    #[serde(default = "w_capability")]
    capability: f64,
    #[serde(default = "w_priors")]
    priors: f64,
    #[serde(default = "w_cost")]
    cost: f64,
    #[serde(default = "w_latency")]
    latency: f64,
}

fn w_llm() -> f64 {
    0.4
}
fn w_capability() -> f64 {
    0.3
}
fn w_priors() -> f64 {
    0.1
}
fn w_cost() -> f64 {
    0.1
}
fn w_latency() -> f64 {
    0.1
}

impl Default for ScoutWeights {
    fn default() -> Self {
        Self {
            llm: w_llm(),
            capability: w_capability(),
            priors: w_priors(),
            cost: w_cost(),
            latency: w_latency(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ScoutParams {
    #[serde(default = "default_k_beam")]
    k_beam: usize,
    #[serde(default = "default_max_depth")]
    max_depth: usize,
    #[serde(default = "default_commit_margin")]
    commit_margin: f64,
    #[serde(default)]
    cost_budget: Option<f64>,
    #[serde(default)]
    latency_budget_ms: Option<u64>,
    #[serde(default = "default_safety_threshold")]
    safety_threshold: f64,
    #[serde(default)]
    scoring_mode: ScoringMode,
    #[serde(default = "default_important_threshold")]
    important_threshold: f64,
    #[serde(default)]
    weights: Option<ScoutWeights>,
    /// Skip the LLM evaluation component (heuristics only).
    #[serde(default)]
    disable_llm_evaluation: bool,
}

pub struct GraphScoutNode {
    descriptor: NodeDescriptor,
    params: ScoutParams,
    weights: ScoutWeights,
    provider: Arc<dyn LlmProvider>,
}

struct Candidate {
    ids: Vec<String>,
    score: f64,
    capability: f64,
    safety: f64,
    cost: f64,
    latency_ms: f64,
}

impl GraphScoutNode {
    pub fn build(spec: &NodeSpec, deps: &SharedDeps) -> Result<Arc<dyn Node>, OrkaError> {
        let params: ScoutParams = spec
            .parse_params()
            .map_err(|e| OrkaError::GraphInvalid { reasons: vec![e] })?;
        if params.k_beam == 0 || params.max_depth == 0 {
            return Err(OrkaError::GraphInvalid {
                reasons: vec![format!(
                    "graph_scout '{}': k_beam and max_depth must be at least 1",
                    spec.id
                )],
            });
        }
        let weights = params.weights.clone().unwrap_or_default();
        Ok(Arc::new(Self {
            descriptor: NodeDescriptor::control(&spec.id, "graph_scout"),
            params,
            weights,
            provider: deps.llm.clone(),
        }))
    }

    /// Token overlap between the run input and a node's prompt/config text.
    fn capability_score(input_tokens: &[String], spec: &NodeSpec) -> f64 {
        if input_tokens.is_empty() {
            return 0.5;
        }
        let mut text = spec.prompt.clone().unwrap_or_default();
        text.push(' ');
        text.push_str(&serde_json::Value::Object(spec.params.clone()).to_string());
        let node_tokens = tokenize(&text);
        if node_tokens.is_empty() {
            return 0.0;
        }
        let matched = input_tokens
            .iter()
            .filter(|t| node_tokens.contains(t))
            .count();
        matched as f64 / input_tokens.len() as f64
    }

    /// Input readiness: every template identifier must resolve right now.
    fn input_ready(spec: &NodeSpec, ctx: &Context) -> bool {
        match &spec.prompt {
            None => true,
            Some(template) => TemplateRenderer::strict()
                .render(template, &ctx.template_scope())
                .is_ok(),
        }
    }

    async fn llm_path_score(&self, ids: &[String], ctx: &Context) -> f64 {
        let input = match &ctx.input {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let prompt = format!(
            "Rate from 0.0 to 1.0 how well the agent path [{}] serves this request:\n{}\n\
             Answer with only the number.",
            ids.join(" -> "),
            input
        );
        match self.provider.generate(&prompt, &LlmParams::default()).await {
            Ok(generation) => parse_first_float(&generation.text).unwrap_or(0.5),
            Err(e) => {
                tracing::warn!(error = %e, "scout llm evaluation failed; using neutral score");
                0.5
            }
        }
    }

    fn prior_for(ctx: &Context, node_id: &str) -> f64 {
        ctx.metadata
            .get(&format!("prior:{}", node_id))
            .and_then(|v| v.parse::<f64>().ok())
            .map(|v| v.clamp(0.0, 1.0))
            .unwrap_or(0.5)
    }
}

fn parse_first_float(text: &str) -> Option<f64> {
    let mut token = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() || c == '.' {
            token.push(c);
        } else if !token.is_empty() {
            break;
        }
    }
    token.parse::<f64>().ok().map(|v| v.clamp(0.0, 1.0))
}

#[async_trait]
impl Node for GraphScoutNode {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        rt: &Engine,
        ctx: &Context,
        _prompt: Option<&str>,
    ) -> Result<NodeOutcome, OrkaError> {
        let downstream = rt.static_sequence_after(&self.descriptor.id);
        if downstream.is_empty() {
            return Err(OrkaError::NoViablePath(format!(
                "graph_scout '{}': no downstream agents to evaluate",
                self.descriptor.id
            )));
        }

        let input_tokens = tokenize(&match &ctx.input {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        });

        // Enumerate contiguous windows up to max_depth and apply the gates.
        let mut candidates: Vec<Candidate> = Vec::new();
        for start in 0..downstream.len() {
            for len in 1..=self.params.max_depth.min(downstream.len() - start) {
                let ids: Vec<String> = downstream[start..start + len].to_vec();
                let mut capability = 0.0;
                let mut safety: f64 = 1.0;
                let mut cost = 0.0;
                let mut latency_ms = 0.0;
                let mut ready = true;
                for id in &ids {
                    let Some(spec) = rt.spec(id) else {
                        ready = false;
                        break;
                    };
                    let Some(node) = rt.node_instance(id) else {
                        ready = false;
                        break;
                    };
                    let descriptor = node.descriptor();
                    capability += Self::capability_score(&input_tokens, spec);
                    safety = safety.min(if descriptor.side_effects { 0.5 } else { 1.0 });
                    cost += descriptor.estimated_cost.unwrap_or(0.0);
                    latency_ms += descriptor.estimated_latency_ms.unwrap_or(0) as f64;
                    if !Self::input_ready(spec, ctx) {
                        ready = false;
                        break;
                    }
                }
                if !ready || safety < self.params.safety_threshold {
                    continue;
                }
                if let Some(budget) = self.params.cost_budget {
                    if cost > budget {
                        continue;
                    }
                }
                if let Some(budget) = self.params.latency_budget_ms {
                    if latency_ms > budget as f64 {
                        continue;
                    }
                }
                candidates.push(Candidate {
                    capability: capability / ids.len() as f64,
                    ids,
                    score: 0.0,
                    safety,
                    cost,
                    latency_ms,
                });
            }
        }

        if candidates.is_empty() {
            return Err(OrkaError::NoViablePath(format!(
                "graph_scout '{}': no candidate passed the safety and budget gates",
                self.descriptor.id
            )));
        }

        match self.params.scoring_mode {
            ScoringMode::Boolean => {
                // Critical criteria already gated above; capability decides.
                candidates.retain(|c| c.capability >= self.params.important_threshold);
                if candidates.is_empty() {
                    return Err(OrkaError::NoViablePath(format!(
                        "graph_scout '{}': no candidate met the capability threshold",
                        self.descriptor.id
                    )));
                }
                for c in &mut candidates {
                    c.score = c.capability;
                }
            }
            ScoringMode::Numeric => {
                let w = &self.weights;
                let w_sum = (w.llm + w.capability + w.priors + w.cost + w.latency).max(f64::EPSILON);
                // Heuristic pre-ranking caps how many paths hit the LLM.
                candidates.sort_by(|a, b| {
                    b.capability
                        .partial_cmp(&a.capability)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                candidates.truncate(self.params.k_beam * 2);
                for c in &mut candidates {
                    let llm_score = if self.params.disable_llm_evaluation || w.llm <= 0.0 {
                        0.5
                    } else {
                        self.llm_path_score(&c.ids, ctx).await
                    };
                    let prior: f64 = c
                        .ids
                        .iter()
                        .map(|id| Self::prior_for(ctx, id))
                        .sum::<f64>()
                        / c.ids.len() as f64;
                    let cost_score = 1.0 / (1.0 + c.cost);
                    let latency_score = 1.0 / (1.0 + c.latency_ms / 1000.0);
                    c.score = (w.llm * llm_score
                        + w.capability * c.capability
                        + w.priors * prior
                        + w.cost * cost_score
                        + w.latency * latency_score)
                        / w_sum;
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(self.params.k_beam);

        let committed = candidates.len() == 1
            || candidates[0].score - candidates[1].score >= self.params.commit_margin;
        let (decision, targets) = if committed {
            ("commit_next", candidates[0].ids.clone())
        } else {
            // Shortlisted paths execute sequentially, deduplicated in order.
            let mut merged: Vec<String> = Vec::new();
            for c in &candidates {
                for id in &c.ids {
                    if !merged.contains(id) {
                        merged.push(id.clone());
                    }
                }
            }
            ("shortlist", merged)
        };

        tracing::debug!(
            scout = %self.descriptor.id,
            decision,
            targets = ?targets,
            best_score = candidates[0].score,
            "graph scout decision"
        );
        let report: Vec<_> = candidates
            .iter()
            .map(|c| {
                json!({
                    "path": c.ids,
                    "score": c.score,
                    "safety": c.safety,
                    "cost": c.cost,
                    "latency_ms": c.latency_ms,
                })
            })
            .collect();
        Ok(NodeOutcome::of(AgentOutput::success(json!({
            "decision": decision,
            "targets": targets,
            "candidates": report,
        })))
        .with_flow(Flow::Prepend(targets.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: the first float in an LLM reply parses and clamps.
    #[test]
    fn first_float_parses() {
        assert_eq!(parse_first_float("0.8"), Some(0.8));
        assert_eq!(parse_first_float("Score: 0.75 overall"), Some(0.75));
        assert_eq!(parse_first_float("definitely 2.5"), Some(1.0));
        assert_eq!(parse_first_float("no number"), None);
    }

    /// **Scenario**: k_beam and max_depth of zero are rejected.
    #[test]
    fn zero_parameters_rejected() {
        let spec: NodeSpec =
            serde_yaml::from_str("id: s\ntype: graph_scout\nk_beam: 0\n").unwrap();
        assert!(
            GraphScoutNode::build(&spec, &crate::agent::test_support::test_deps()).is_err()
        );
    }

    /// **Scenario**: capability score reflects token overlap with the prompt.
    #[test]
    fn capability_overlap() {
        let spec: NodeSpec = serde_yaml::from_str(
            "id: a\ntype: llm\nprompt: \"summarize the weather report\"\n",
        )
        .unwrap();
        let input = tokenize("weather in Paris");
        let score = GraphScoutNode::capability_score(&input, &spec);
        assert!(score > 0.0, "{}", score);
        let unrelated = tokenize("quantum chromodynamics");
        assert_eq!(GraphScoutNode::capability_score(&unrelated, &spec), 0.0);
    }
}
