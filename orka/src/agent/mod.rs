//! Agent lifecycle contract.
//!
//! Every graph vertex — leaf agent or control-flow node — implements [`Node`]:
//! a descriptor for validation and scouting, and one async `run` step against
//! a context snapshot. Nodes return an [`AgentOutput`] plus a [`Flow`]
//! directive; only the engine mutates the context.

mod leaf;
mod registry;

pub use leaf::{ClassifierAgent, LlmAgent, SearchAgent};
pub use registry::{NodeBuilder, NodeRegistry, SharedDeps};

use async_trait::async_trait;

use crate::context::{AgentOutput, Context};
use crate::engine::Engine;
use crate::error::OrkaError;

/// Static node metadata: drives graph validation and graph-scout scoring.
#[derive(Debug, Clone)]
pub struct NodeDescriptor {
    pub id: String,
    pub kind: &'static str,
    pub control_flow: bool,
    /// Writes stored-category memory entries.
    pub memory_writer: bool,
    /// Opts out of graph-scout's full safety score.
    pub side_effects: bool,
    pub estimated_cost: Option<f64>,
    pub estimated_latency_ms: Option<u64>,
}

impl NodeDescriptor {
    pub fn leaf(id: impl Into<String>, kind: &'static str) -> Self {
        Self {
            id: id.into(),
            kind,
            control_flow: false,
            memory_writer: false,
            side_effects: false,
            estimated_cost: None,
            estimated_latency_ms: None,
        }
    }

    pub fn control(id: impl Into<String>, kind: &'static str) -> Self {
        Self {
            control_flow: true,
            ..Self::leaf(id, kind)
        }
    }
}

/// Scheduling directive returned alongside a node's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Proceed with the remaining queue.
    Continue,
    /// Push these ids in front of the remaining queue (router, graph-scout).
    /// Ids already present later in the queue are deduplicated away so a node
    /// runs at most once per scope.
    Prepend(Vec<String>),
    /// Stop processing the queue (terminal node).
    End,
}

/// One node invocation's result: the output envelope, a flow directive, and
/// any additional outputs to record under other ids (join merges, failover
/// children).
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub output: AgentOutput,
    pub flow: Flow,
    pub extra_outputs: Vec<(String, AgentOutput)>,
}

impl NodeOutcome {
    pub fn of(output: AgentOutput) -> Self {
        Self {
            output,
            flow: Flow::Continue,
            extra_outputs: Vec::new(),
        }
    }

    pub fn with_flow(mut self, flow: Flow) -> Self {
        self.flow = flow;
        self
    }

    pub fn with_extra(mut self, id: impl Into<String>, output: AgentOutput) -> Self {
        self.extra_outputs.push((id.into(), output));
        self
    }
}

/// The uniform run contract.
///
/// `prompt` is the node's template already rendered against the context
/// snapshot (engine step 1); nodes without a template receive `None`.
/// Implementations never retry silently and never write the context — they
/// return data, the engine records it.
#[async_trait]
pub trait Node: Send + Sync {
    fn descriptor(&self) -> &NodeDescriptor;

    async fn run(
        &self,
        rt: &Engine,
        ctx: &Context,
        prompt: Option<&str>,
    ) -> Result<NodeOutcome, OrkaError>;
}

impl std::fmt::Debug for dyn Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("descriptor", self.descriptor())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::memory::{HashEmbedder, InMemoryBackend, MemoryStore, RetentionPolicy};
    use crate::providers::{MockLlm, MockSearch};
    use crate::template::TemplateRenderer;

    use super::SharedDeps;

    /// Deps over an in-memory store and deterministic mocks.
    pub(crate) fn test_deps() -> SharedDeps {
        SharedDeps {
            memory: Arc::new(MemoryStore::new(
                Arc::new(InMemoryBackend::new()),
                Arc::new(HashEmbedder::new(64)),
                RetentionPolicy::default(),
            )),
            llm: Arc::new(MockLlm::always("ok")),
            search: Arc::new(MockSearch::empty()),
            renderer: Arc::new(TemplateRenderer::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Scenario**: descriptor constructors mark control-flow vs leaf.
    #[test]
    fn descriptor_constructors() {
        let leaf = NodeDescriptor::leaf("answer", "llm");
        assert!(!leaf.control_flow);
        assert_eq!(leaf.kind, "llm");
        let ctl = NodeDescriptor::control("route", "router");
        assert!(ctl.control_flow);
    }

    /// **Scenario**: outcome builder defaults to Continue with no extras.
    #[test]
    fn outcome_builder() {
        let outcome = NodeOutcome::of(AgentOutput::success(json!("x")));
        assert_eq!(outcome.flow, Flow::Continue);
        assert!(outcome.extra_outputs.is_empty());

        let outcome = NodeOutcome::of(AgentOutput::success(json!("x")))
            .with_flow(Flow::Prepend(vec!["a".into()]))
            .with_extra("child", AgentOutput::success(json!("y")));
        assert_eq!(outcome.flow, Flow::Prepend(vec!["a".to_string()]));
        assert_eq!(outcome.extra_outputs.len(), 1);
    }
}
