//! Per-run context and the uniform agent output envelope.
//!
//! The engine is the single writer: each node appends exactly one
//! [`AgentOutput`] under its own id. Reads take cloned snapshots, so concurrent
//! fork branches never observe each other's writes before the join barrier.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorKind, OrkaError};

/// Terminal status of one node execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStatus {
    Success,
    Failed,
    Skipped,
    /// Loop-specific: iteration cap hit without meeting the score threshold.
    Partial,
}

/// Error descriptor carried inside a failed output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn from_error(err: &OrkaError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Per-node resource accounting; aggregated into the run report.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub tokens: u64,
    pub latency_ms: u64,
    pub retries: u32,
    pub cost: f64,
}

impl Metrics {
    /// Accumulates `other` into `self` (latency sums; the report tracks wall
    /// time separately).
    pub fn absorb(&mut self, other: &Metrics) {
        self.tokens += other.tokens;
        self.latency_ms += other.latency_ms;
        self.retries += other.retries;
        self.cost += other.cost;
    }
}

/// Execution trace attached to an output: what was actually sent and to whom.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceInfo {
    /// Prompt after template rendering, when the node used one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Provider/model identifier, when the node called a provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Nested outputs (failover children, fork observability records).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub sub_outputs: HashMap<String, AgentOutput>,
}

/// Uniform envelope produced by every node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutput {
    pub result: Value,
    pub status: OutputStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default)]
    pub metrics: Metrics,
    #[serde(default)]
    pub trace: TraceInfo,
}

impl AgentOutput {
    pub fn success(result: Value) -> Self {
        Self {
            result,
            status: OutputStatus::Success,
            error: None,
            metrics: Metrics::default(),
            trace: TraceInfo::default(),
        }
    }

    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            result: Value::Null,
            status: OutputStatus::Failed,
            error: Some(ErrorInfo {
                kind,
                message: message.into(),
            }),
            metrics: Metrics::default(),
            trace: TraceInfo::default(),
        }
    }

    pub fn skipped() -> Self {
        Self {
            result: Value::Null,
            status: OutputStatus::Skipped,
            error: None,
            metrics: Metrics::default(),
            trace: TraceInfo::default(),
        }
    }

    pub fn partial(result: Value) -> Self {
        Self {
            result,
            status: OutputStatus::Partial,
            error: None,
            metrics: Metrics::default(),
            trace: TraceInfo::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_trace(mut self, trace: TraceInfo) -> Self {
        self.trace = trace;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == OutputStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        self.status == OutputStatus::Failed
    }

    /// The result as display text: strings pass through, everything else is
    /// JSON-encoded. Used for prompt flattening and score extraction.
    pub fn result_text(&self) -> String {
        match &self.result {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// One finished loop iteration, kept in an ordered arena on the context.
///
/// Later iterations and the loop's final result reference these by index;
/// there are no back-references into iteration contexts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PastLoop {
    pub loop_number: u32,
    pub score: f64,
    /// Projection rendered from `past_loops_metadata` (or the default shape).
    pub summary: Value,
    /// Cognitive-extraction hits for this iteration, by category.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extracted: HashMap<String, Vec<String>>,
}

/// Per-run mutable state. Created by the run coordinator, mutated only by the
/// engine; nodes receive cloned snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    /// User payload (string or structured map).
    pub input: Value,
    /// node-id → output. At most one entry per id per scope.
    pub previous_outputs: HashMap<String, AgentOutput>,
    /// Unique run identifier.
    pub trace_id: String,
    /// Set only inside a loop's nested workflow (1-based).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_number: Option<u32>,
    /// Last extracted loop score, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Iteration summaries of the enclosing loop.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub past_loops: Vec<PastLoop>,
    /// Fork group id when executing inside a fork branch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fork_group: Option<String>,
    /// Per-category concatenations of cognitive-extraction hits across prior
    /// iterations; visible to templates under `extracted.*`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extracted: HashMap<String, String>,
    /// Free-form metadata, copied into emitted events.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    /// Node ids in execution order, maintained by the engine. Join-merged
    /// branch outputs and failover children are not listed here.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub executed: Vec<String>,
}

impl Context {
    pub fn new(input: Value, trace_id: impl Into<String>) -> Self {
        Self {
            input,
            previous_outputs: HashMap::new(),
            trace_id: trace_id.into(),
            loop_number: None,
            score: None,
            past_loops: Vec::new(),
            fork_group: None,
            extracted: HashMap::new(),
            metadata: HashMap::new(),
            executed: Vec::new(),
        }
    }

    /// Records one node's output. Serialized through the engine; last write
    /// wins if a scope replays an id (loops overwrite per iteration).
    pub fn insert_output(&mut self, node_id: impl Into<String>, output: AgentOutput) {
        self.previous_outputs.insert(node_id.into(), output);
    }

    pub fn output(&self, node_id: &str) -> Option<&AgentOutput> {
        self.previous_outputs.get(node_id)
    }

    /// Resolves a dot path rooted at `previous_outputs`, e.g.
    /// `classify.result` or `fetch.result.items.0.title`.
    pub fn resolve_path(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let node_id = segments.next()?;
        let output = self.previous_outputs.get(node_id)?;
        let root = serde_json::to_value(output).ok()?;
        let mut current = root;
        for seg in segments {
            current = match current {
                Value::Object(mut map) => map.remove(seg)?,
                Value::Array(mut items) => {
                    let idx: usize = seg.parse().ok()?;
                    if idx < items.len() {
                        items.swap_remove(idx)
                    } else {
                        return None;
                    }
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Snapshot for a fork branch: identical state plus the group id.
    /// Branch-local writes stay invisible to siblings until the join merges.
    pub fn branch_child(&self, fork_group: &str) -> Self {
        let mut child = self.clone();
        child.fork_group = Some(fork_group.to_string());
        child
    }

    /// Snapshot for one loop iteration with injected loop state.
    pub fn loop_child(
        &self,
        loop_number: u32,
        past_loops: Vec<PastLoop>,
        extracted: HashMap<String, String>,
    ) -> Self {
        let mut child = self.clone();
        child.loop_number = Some(loop_number);
        child.score = None;
        child.past_loops = past_loops;
        child.extracted = extracted;
        child
    }

    /// Builds the template scope: every recognized variable plus a top-level
    /// flattening of each prior node's direct string result.
    pub fn template_scope(&self) -> Value {
        let mut scope = serde_json::Map::new();
        scope.insert("input".into(), self.input.clone());
        scope.insert("trace_id".into(), Value::String(self.trace_id.clone()));

        let mut outputs = serde_json::Map::new();
        for (id, out) in &self.previous_outputs {
            if let Ok(v) = serde_json::to_value(out) {
                outputs.insert(id.clone(), v);
            }
            // Convenience flattening: `{{ classify }}` is the string result.
            if !scope.contains_key(id) {
                scope.insert(id.clone(), Value::String(out.result_text()));
            }
        }
        scope.insert("previous_outputs".into(), Value::Object(outputs));

        if let Some(n) = self.loop_number {
            scope.insert("loop_number".into(), Value::from(n));
        }
        if let Some(s) = self.score {
            scope.insert("score".into(), Value::from(s));
        }
        if !self.past_loops.is_empty() {
            if let Ok(v) = serde_json::to_value(&self.past_loops) {
                scope.insert("past_loops".into(), v);
            }
        }
        if let Some(g) = &self.fork_group {
            scope.insert("fork_group".into(), Value::String(g.clone()));
        }
        if !self.extracted.is_empty() {
            if let Ok(v) = serde_json::to_value(&self.extracted) {
                scope.insert("extracted".into(), v);
            }
        }
        if !self.metadata.is_empty() {
            if let Ok(v) = serde_json::to_value(&self.metadata) {
                scope.insert("metadata".into(), v);
            }
        }
        Value::Object(scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Scenario**: result_text passes strings through and JSON-encodes maps.
    #[test]
    fn result_text_string_vs_structured() {
        assert_eq!(AgentOutput::success(json!("4")).result_text(), "4");
        let out = AgentOutput::success(json!({"answer": 4}));
        assert_eq!(out.result_text(), "{\"answer\":4}");
        assert_eq!(AgentOutput::skipped().result_text(), "");
    }

    /// **Scenario**: resolve_path walks output fields and array indices.
    #[test]
    fn resolve_path_navigates_output() {
        let mut ctx = Context::new(json!("q"), "t-1");
        ctx.insert_output(
            "fetch",
            AgentOutput::success(json!({"items": [{"title": "first"}]})),
        );
        assert_eq!(
            ctx.resolve_path("fetch.result.items.0.title"),
            Some(json!("first"))
        );
        assert_eq!(ctx.resolve_path("fetch.status"), Some(json!("success")));
        assert_eq!(ctx.resolve_path("missing.result"), None);
        assert_eq!(ctx.resolve_path("fetch.result.items.9"), None);
    }

    /// **Scenario**: branch_child copies state and stamps the fork group;
    /// branch-local writes do not leak back to the parent.
    #[test]
    fn branch_child_isolated() {
        let mut parent = Context::new(json!("q"), "t-1");
        parent.insert_output("seed", AgentOutput::success(json!("s")));
        let mut child = parent.branch_child("fg-1");
        assert_eq!(child.fork_group.as_deref(), Some("fg-1"));
        assert!(child.output("seed").is_some());
        child.insert_output("branch_only", AgentOutput::success(json!("b")));
        assert!(parent.output("branch_only").is_none());
    }

    /// **Scenario**: loop_child injects loop_number/past_loops and clears score.
    #[test]
    fn loop_child_injects_loop_state() {
        let mut parent = Context::new(json!("q"), "t-1");
        parent.score = Some(0.4);
        let past = vec![PastLoop {
            loop_number: 1,
            score: 0.4,
            summary: json!({"n": 1}),
            extracted: HashMap::new(),
        }];
        let child = parent.loop_child(2, past, HashMap::new());
        assert_eq!(child.loop_number, Some(2));
        assert_eq!(child.score, None);
        assert_eq!(child.past_loops.len(), 1);
    }

    /// **Scenario**: template_scope exposes flattened node results and the
    /// full previous_outputs map.
    #[test]
    fn template_scope_flattens_results() {
        let mut ctx = Context::new(json!("What is 2+2?"), "t-9");
        ctx.insert_output("answer", AgentOutput::success(json!("4")));
        let scope = ctx.template_scope();
        assert_eq!(scope["answer"], json!("4"));
        assert_eq!(scope["previous_outputs"]["answer"]["result"], json!("4"));
        assert_eq!(scope["input"], json!("What is 2+2?"));
        assert_eq!(scope["trace_id"], json!("t-9"));
    }

    /// **Scenario**: metrics absorb sums every field.
    #[test]
    fn metrics_absorb_sums() {
        let mut total = Metrics::default();
        total.absorb(&Metrics {
            tokens: 10,
            latency_ms: 5,
            retries: 1,
            cost: 0.25,
        });
        total.absorb(&Metrics {
            tokens: 2,
            latency_ms: 7,
            retries: 0,
            cost: 0.05,
        });
        assert_eq!(total.tokens, 12);
        assert_eq!(total.latency_ms, 12);
        assert_eq!(total.retries, 1);
        assert!((total.cost - 0.30).abs() < 1e-9);
    }
}
