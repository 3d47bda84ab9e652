//! Loop: iterative refinement over a nested workflow.
//!
//! Each iteration runs the internal workflow on a child context carrying
//! `loop_number`, the arena of past-iteration summaries and the per-category
//! cognitive-extraction aggregates. A score is extracted per iteration (direct
//! path wins over regex) and the loop stops at the threshold or the cap.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agent::{Node, NodeDescriptor, NodeOutcome, SharedDeps};
use crate::context::{AgentOutput, Context, PastLoop};
use crate::engine::{Engine, EngineStatus};
use crate::error::{ErrorKind, OrkaError};
use crate::graph::{self, NodeSpec, WorkflowGraph};

fn default_max_loops() -> u32 {
    5
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ScoreExtraction {
    /// Dot path into the iteration's outputs, e.g. `quality.result`.
    #[serde(default)]
    path: Option<String>,
    /// Regex whose capture group 1 parses as the score.
    #[serde(default)]
    pattern: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LoopParams {
    #[serde(default = "default_max_loops")]
    max_loops: u32,
    score_threshold: f64,
    #[serde(default)]
    score_extraction: ScoreExtraction,
    /// Per-field templates rendered against the iteration context post-run.
    #[serde(default)]
    past_loops_metadata: Option<HashMap<String, String>>,
    /// category → regex list; capture group 1 (or the whole match) is kept.
    #[serde(default)]
    cognitive_extraction: Option<HashMap<String, Vec<String>>>,
}

pub struct LoopNode {
    descriptor: NodeDescriptor,
    max_loops: u32,
    score_threshold: f64,
    score_path: Option<String>,
    score_pattern: Option<Regex>,
    past_loops_metadata: Option<HashMap<String, String>>,
    cognitive_extraction: Vec<(String, Vec<Regex>)>,
    internal: WorkflowGraph,
}

impl LoopNode {
    pub fn build(spec: &NodeSpec, deps: &SharedDeps) -> Result<Arc<dyn Node>, OrkaError> {
        Ok(Arc::new(Self::from_spec(spec, deps)?))
    }

    fn from_spec(spec: &NodeSpec, _deps: &SharedDeps) -> Result<Self, OrkaError> {
        let p: LoopParams = spec
            .parse_params()
            .map_err(|e| OrkaError::GraphInvalid { reasons: vec![e] })?;
        let internal_spec = spec.internal_workflow.as_ref().ok_or_else(|| {
            OrkaError::GraphInvalid {
                reasons: vec![format!("loop '{}': internal_workflow is required", spec.id)],
            }
        })?;
        if p.max_loops == 0 {
            return Err(OrkaError::GraphInvalid {
                reasons: vec![format!("loop '{}': max_loops must be at least 1", spec.id)],
            });
        }
        let score_pattern = p
            .score_extraction
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| OrkaError::GraphInvalid {
                reasons: vec![format!("loop '{}': invalid score pattern: {}", spec.id, e)],
            })?;
        let mut cognitive_extraction = Vec::new();
        for (category, patterns) in p.cognitive_extraction.unwrap_or_default() {
            let mut regexes = Vec::with_capacity(patterns.len());
            for raw in &patterns {
                regexes.push(Regex::new(raw).map_err(|e| OrkaError::GraphInvalid {
                    reasons: vec![format!(
                        "loop '{}': invalid cognitive pattern for '{}': {}",
                        spec.id, category, e
                    )],
                })?);
            }
            cognitive_extraction.push((category, regexes));
        }

        let internal = graph::compile_embedded(internal_spec)?;
        Ok(Self {
            descriptor: NodeDescriptor::control(&spec.id, "loop"),
            max_loops: p.max_loops,
            score_threshold: p.score_threshold,
            score_path: p.score_extraction.path,
            score_pattern,
            past_loops_metadata: p.past_loops_metadata,
            cognitive_extraction,
            internal,
        })
    }

    /// Concatenated iteration output text, in the inner sequence order.
    fn iteration_text(&self, child: &Context) -> String {
        self.internal
            .sequence
            .iter()
            .filter_map(|id| child.output(id))
            .map(|out| out.result_text())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Direct path wins; otherwise the regex's capture group 1; otherwise 0
    /// with a warning. Out-of-range and NaN values clamp to [0, 1].
    fn extract_score(&self, child: &Context) -> f64 {
        let raw = if let Some(path) = &self.score_path {
            match child.resolve_path(path) {
                Some(Value::Number(n)) => n.as_f64(),
                Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
        } else if let Some(pattern) = &self.score_pattern {
            pattern
                .captures(&self.iteration_text(child))
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<f64>().ok())
        } else {
            None
        };
        match raw {
            Some(v) if v.is_finite() => v.clamp(0.0, 1.0),
            _ => {
                tracing::warn!(
                    loop_node = %self.descriptor.id,
                    "no score extracted from iteration; defaulting to 0"
                );
                0.0
            }
        }
    }

    fn extract_categories(&self, text: &str) -> HashMap<String, Vec<String>> {
        let mut hits: HashMap<String, Vec<String>> = HashMap::new();
        for (category, regexes) in &self.cognitive_extraction {
            let mut found = Vec::new();
            for regex in regexes {
                for caps in regex.captures_iter(text) {
                    let hit = caps
                        .get(1)
                        .or_else(|| caps.get(0))
                        .map(|m| m.as_str().trim().to_string());
                    if let Some(hit) = hit {
                        if !hit.is_empty() {
                            found.push(hit);
                        }
                    }
                }
            }
            if !found.is_empty() {
                hits.insert(category.clone(), found);
            }
        }
        hits
    }

    /// Per-category concatenations across all prior iterations.
    fn aggregates(past_loops: &[PastLoop]) -> HashMap<String, String> {
        let mut agg: HashMap<String, Vec<String>> = HashMap::new();
        for past in past_loops {
            for (category, hits) in &past.extracted {
                agg.entry(category.clone()).or_default().extend(hits.clone());
            }
        }
        agg.into_iter()
            .map(|(category, hits)| (category, hits.join("\n")))
            .collect()
    }

    fn iteration_summary(
        &self,
        rt: &Engine,
        child: &Context,
        loop_number: u32,
        score: f64,
    ) -> Value {
        match &self.past_loops_metadata {
            Some(projection) => {
                let mut scope_ctx = child.clone();
                scope_ctx.score = Some(score);
                let scope = scope_ctx.template_scope();
                let mut summary = serde_json::Map::new();
                for (field, template) in projection {
                    let rendered = rt
                        .renderer()
                        .render(template, &scope)
                        .unwrap_or_else(|e| {
                            tracing::warn!(field = %field, error = %e, "past_loops projection failed");
                            String::new()
                        });
                    summary.insert(field.clone(), Value::String(rendered));
                }
                Value::Object(summary)
            }
            None => {
                let last = self
                    .internal
                    .sequence
                    .iter()
                    .rev()
                    .filter_map(|id| child.output(id))
                    .find(|out| out.status != crate::context::OutputStatus::Skipped)
                    .map(|out| out.result_text())
                    .unwrap_or_default();
                json!({
                    "loop_number": loop_number,
                    "score": score,
                    "result": last,
                })
            }
        }
    }
}

#[async_trait]
impl Node for LoopNode {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        rt: &Engine,
        ctx: &Context,
        _prompt: Option<&str>,
    ) -> Result<NodeOutcome, OrkaError> {
        let mut past_loops: Vec<PastLoop> = Vec::new();
        let mut final_score = 0.0;
        let mut last_output = Value::Null;
        let mut threshold_met = false;
        let mut iteration_error: Option<OrkaError> = None;

        for loop_number in 1..=self.max_loops {
            let mut child = ctx.loop_child(
                loop_number,
                past_loops.clone(),
                Self::aggregates(&past_loops),
            );

            match rt.run_subworkflow(&self.internal, &mut child).await {
                Ok(EngineStatus::Completed) => {}
                Ok(EngineStatus::Aborted { node_id }) => {
                    iteration_error = Some(OrkaError::AgentFailed(format!(
                        "iteration aborted by node '{}'",
                        node_id
                    )));
                    break;
                }
                Err(e) => {
                    if matches!(e, OrkaError::Cancelled) {
                        return Err(e);
                    }
                    tracing::warn!(
                        loop_node = %self.descriptor.id,
                        loop_number,
                        error = %e,
                        "loop iteration failed"
                    );
                    iteration_error = Some(e);
                    break;
                }
            }

            let score = self.extract_score(&child);
            let text = self.iteration_text(&child);
            let extracted = self.extract_categories(&text);
            let summary = self.iteration_summary(rt, &child, loop_number, score);
            past_loops.push(PastLoop {
                loop_number,
                score,
                summary,
                extracted,
            });

            final_score = score;
            last_output = self
                .internal
                .sequence
                .iter()
                .rev()
                .filter_map(|id| child.output(id))
                .map(|out| out.result.clone())
                .next()
                .unwrap_or(Value::Null);

            tracing::debug!(
                loop_node = %self.descriptor.id,
                loop_number,
                score,
                threshold = self.score_threshold,
                "loop iteration scored"
            );
            if score >= self.score_threshold {
                threshold_met = true;
                break;
            }
        }

        let result = json!({
            "loops_completed": past_loops.len(),
            "final_score": final_score,
            "past_loops": past_loops,
            "last_output": last_output,
        });

        let output = if threshold_met {
            AgentOutput::success(result)
        } else if past_loops.is_empty() {
            let message = iteration_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no iteration produced a score".into());
            AgentOutput::failed(
                ErrorKind::AgentFailed,
                format!("loop '{}': {}", self.descriptor.id, message),
            )
        } else {
            AgentOutput::partial(result)
        };
        Ok(NodeOutcome::of(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_support::test_deps;

    fn loop_spec(extra: &str) -> NodeSpec {
        serde_yaml::from_str(&format!(
            r#"
id: improve
type: loop
max_loops: 5
score_threshold: 0.85
{}
internal_workflow:
  orchestrator:
    id: improve-inner
    agents: [draft]
  agents:
    - id: draft
      type: llm
      prompt: "attempt {{{{ loop_number }}}}"
"#,
            extra
        ))
        .unwrap()
    }

    /// **Scenario**: loop requires an internal workflow and a positive cap.
    #[test]
    fn build_validations() {
        let spec: NodeSpec = serde_yaml::from_str(
            "id: l\ntype: loop\nmax_loops: 3\nscore_threshold: 0.5\n",
        )
        .unwrap();
        assert!(LoopNode::build(&spec, &test_deps()).is_err());

        let spec = loop_spec("score_extraction:\n  pattern: \"SCORE: ([0-9.]+)\"");
        assert!(LoopNode::build(&spec, &test_deps()).is_ok());
    }

    /// **Scenario**: invalid regexes are rejected at build time.
    #[test]
    fn invalid_patterns_rejected() {
        let spec = loop_spec("score_extraction:\n  pattern: \"([\"");
        assert!(LoopNode::build(&spec, &test_deps()).is_err());

        let spec = loop_spec(
            "cognitive_extraction:\n  insights:\n    - \"([\"",
        );
        assert!(LoopNode::build(&spec, &test_deps()).is_err());
    }

    fn built(extra: &str) -> LoopNode {
        LoopNode::from_spec(&loop_spec(extra), &test_deps()).unwrap()
    }

    /// **Scenario**: score extraction clamps out-of-range and non-finite
    /// values and falls back to 0 when nothing matches.
    #[test]
    fn score_extraction_clamps() {
        let lp = built("score_extraction:\n  pattern: \"SCORE: (-?[0-9.]+)\"");
        let mut child = Context::new(json!("q"), "t-1");
        child.insert_output("draft", AgentOutput::success(json!("text SCORE: 1.7")));
        assert_eq!(lp.extract_score(&child), 1.0);

        child.insert_output("draft", AgentOutput::success(json!("text SCORE: -0.5")));
        assert_eq!(lp.extract_score(&child), 0.0);

        child.insert_output("draft", AgentOutput::success(json!("no score here")));
        assert_eq!(lp.extract_score(&child), 0.0);
    }

    /// **Scenario**: a direct path wins over the regex pattern.
    #[test]
    fn path_wins_over_pattern() {
        let lp = built(
            "score_extraction:\n  path: quality.result\n  pattern: \"SCORE: ([0-9.]+)\"",
        );
        let mut child = Context::new(json!("q"), "t-1");
        child.insert_output("quality", AgentOutput::success(json!("0.42")));
        child.insert_output("draft", AgentOutput::success(json!("SCORE: 0.99")));
        assert!((lp.extract_score(&child) - 0.42).abs() < 1e-9);
    }

    /// **Scenario**: cognitive extraction collects capture-group hits per
    /// category and aggregates across iterations.
    #[test]
    fn cognitive_extraction_aggregates() {
        let lp = built(
            "cognitive_extraction:\n  insights:\n    - \"INSIGHT: ([^\\n]+)\"",
        );
        let hits = lp.extract_categories("INSIGHT: first\nnoise\nINSIGHT: second");
        assert_eq!(hits["insights"], vec!["first", "second"]);

        let past = vec![
            PastLoop {
                loop_number: 1,
                score: 0.2,
                summary: json!({}),
                extracted: HashMap::from([(
                    "insights".to_string(),
                    vec!["first".to_string()],
                )]),
            },
            PastLoop {
                loop_number: 2,
                score: 0.4,
                summary: json!({}),
                extracted: HashMap::from([(
                    "insights".to_string(),
                    vec!["second".to_string()],
                )]),
            },
        ];
        let agg = LoopNode::aggregates(&past);
        assert_eq!(agg["insights"], "first\nsecond");
    }
}
