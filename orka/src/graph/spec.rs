//! Workflow document types.
//!
//! The YAML has two top-level sections: `orchestrator` (id, strategy, ordered
//! node sequence, memory defaults) and `agents` (one item per node). Node
//! configs are typed per variant: the common fields live on [`NodeSpec`], the
//! type-specific ones flatten into `params` and are parsed by the owning node
//! builder via [`NodeSpec::parse_params`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::MemoryOverrides;

/// Top-level execution strategy. `parallel` runs the whole sequence
/// concurrently with an implicit join at the end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Sequential,
    Parallel,
}

/// What the engine does when a node's output is `failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and keep processing the queue (default).
    #[default]
    Continue,
    /// Stop the run; completed outputs are preserved in the report.
    Abort,
}

/// The `orchestrator` section.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSpec {
    pub id: String,
    #[serde(default)]
    pub strategy: Strategy,
    /// Ordered node ids to execute.
    pub agents: Vec<String>,
    #[serde(default)]
    pub memory_preset: Option<String>,
    #[serde(default)]
    pub memory_config: Option<MemoryOverrides>,
}

/// One node definition from the `agents` section.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Prompt template, rendered by the engine before each invocation.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Inline children (failover alternatives).
    #[serde(default)]
    pub children: Vec<NodeSpec>,
    /// Embedded full document (loop body).
    #[serde(default)]
    pub internal_workflow: Option<Box<WorkflowSpec>>,
    /// Total node budget in seconds.
    #[serde(default)]
    pub timeout_secs: Option<f64>,
    /// Per-attempt budget in seconds (provider calls).
    #[serde(default)]
    pub attempt_timeout_secs: Option<f64>,
    /// Concurrent invocations of this node allowed at once.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    /// Marks the node unsafe for graph-scout candidate scoring.
    #[serde(default)]
    pub side_effects: bool,
    /// Type-specific configuration.
    #[serde(flatten)]
    pub params: serde_json::Map<String, Value>,
}

impl NodeSpec {
    /// Parses the flattened type-specific params into a typed config.
    pub fn parse_params<T: serde::de::DeserializeOwned>(&self) -> Result<T, String> {
        serde_json::from_value(Value::Object(self.params.clone()))
            .map_err(|e| format!("node '{}' ({}): {}", self.id, self.kind, e))
    }
}

/// The whole workflow document.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowSpec {
    pub orchestrator: OrchestratorSpec,
    pub agents: Vec<NodeSpec>,
}

/// Immutable graph produced by the loader. Shared read-only for the run.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    pub id: String,
    pub strategy: Strategy,
    pub sequence: Vec<String>,
    pub nodes: HashMap<String, NodeSpec>,
    pub memory_preset: Option<String>,
    pub memory_overrides: Option<MemoryOverrides>,
}

impl WorkflowGraph {
    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }
}
