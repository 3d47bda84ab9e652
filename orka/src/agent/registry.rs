//! Node registry: type tag → constructor.
//!
//! The loader rejects unregistered tags; the engine instantiates every node in
//! a graph through [`NodeRegistry::build`] at construction, so config errors
//! surface before the first step runs.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::OrkaError;
use crate::graph::NodeSpec;
use crate::memory::MemoryStore;
use crate::providers::{LlmProvider, SearchProvider};
use crate::template::TemplateRenderer;

use super::leaf::{ClassifierAgent, LlmAgent, SearchAgent};
use super::Node;

/// Dependencies handed to node builders: the run's memory store, default
/// providers and the prompt renderer.
#[derive(Clone)]
pub struct SharedDeps {
    pub memory: Arc<MemoryStore>,
    pub llm: Arc<dyn LlmProvider>,
    pub search: Arc<dyn SearchProvider>,
    pub renderer: Arc<TemplateRenderer>,
}

/// Constructs one node from its spec.
pub type NodeBuilder =
    Arc<dyn Fn(&NodeSpec, &SharedDeps) -> Result<Arc<dyn Node>, OrkaError> + Send + Sync>;

/// Maps `type` strings to constructors. Instances are per-engine; builders may
/// return pooled objects as long as they are safe for concurrent use.
#[derive(Clone)]
pub struct NodeRegistry {
    builders: HashMap<String, NodeBuilder>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl NodeRegistry {
    /// Empty registry (custom stacks, tests).
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Registry with every builtin type: the leaf agents (`llm`,
    /// `classifier`, `search`) and the control-flow nodes (`router`, `fork`,
    /// `join`, `failover`, `loop`, `graph_scout`, `memory`).
    pub fn with_builtins() -> Self {
        let mut reg = Self::empty();
        reg.register("llm", Arc::new(|spec, deps| LlmAgent::build(spec, deps)));
        reg.register("classifier", Arc::new(|spec, deps| ClassifierAgent::build(spec, deps)));
        reg.register("search", Arc::new(|spec, deps| SearchAgent::build(spec, deps)));
        reg.register("router", Arc::new(|spec, deps| {
            crate::nodes::RouterNode::build(spec, deps)
        }));
        reg.register("fork", Arc::new(|spec, deps| {
            crate::nodes::ForkNode::build(spec, deps)
        }));
        reg.register("join", Arc::new(|spec, deps| {
            crate::nodes::JoinNode::build(spec, deps)
        }));
        reg.register("failover", Arc::new(|spec, deps| {
            crate::nodes::FailoverNode::build(spec, deps)
        }));
        reg.register("loop", Arc::new(|spec, deps| {
            crate::nodes::LoopNode::build(spec, deps)
        }));
        reg.register("graph_scout", Arc::new(|spec, deps| {
            crate::nodes::GraphScoutNode::build(spec, deps)
        }));
        reg.register("memory", Arc::new(|spec, deps| {
            crate::nodes::MemoryNode::build(spec, deps)
        }));
        reg
    }

    /// Adds or replaces a type tag.
    pub fn register(&mut self, kind: impl Into<String>, builder: NodeBuilder) {
        self.builders.insert(kind.into(), builder);
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.builders.contains_key(kind)
    }

    pub fn registered_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Instantiates a node; unknown tags and invalid configs fail here.
    pub fn build(&self, spec: &NodeSpec, deps: &SharedDeps) -> Result<Arc<dyn Node>, OrkaError> {
        let builder = self.builders.get(&spec.kind).ok_or_else(|| {
            OrkaError::GraphInvalid {
                reasons: vec![format!(
                    "node '{}': unregistered type '{}'",
                    spec.id, spec.kind
                )],
            }
        })?;
        builder(spec, deps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_support::test_deps;

    /// **Scenario**: the builtin registry knows every spec'd type tag.
    #[test]
    fn builtins_registered() {
        let reg = NodeRegistry::with_builtins();
        for kind in [
            "llm", "classifier", "search", "router", "fork", "join", "failover", "loop",
            "graph_scout", "memory",
        ] {
            assert!(reg.contains(kind), "missing builtin '{}'", kind);
        }
        assert!(!reg.contains("bogus"));
    }

    /// **Scenario**: building an unregistered type reports the node and tag.
    #[test]
    fn unknown_type_fails_build() {
        let reg = NodeRegistry::empty();
        let spec: NodeSpec = serde_yaml::from_str("id: x\ntype: alien\n").unwrap();
        let err = reg.build(&spec, &test_deps()).unwrap_err();
        match err {
            OrkaError::GraphInvalid { reasons } => {
                assert!(reasons[0].contains("alien"), "{:?}", reasons);
                assert!(reasons[0].contains("'x'"), "{:?}", reasons);
            }
            other => panic!("expected GraphInvalid, got {:?}", other),
        }
    }

    /// **Scenario**: a registered custom builder is used for its tag.
    #[test]
    fn custom_builder_registers() {
        let mut reg = NodeRegistry::empty();
        reg.register("llm", Arc::new(|spec, deps| LlmAgent::build(spec, deps)));
        let spec: NodeSpec = serde_yaml::from_str("id: a\ntype: llm\n").unwrap();
        let node = reg.build(&spec, &test_deps()).unwrap();
        assert_eq!(node.descriptor().kind, "llm");
    }
}
