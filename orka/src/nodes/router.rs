//! Router: decision-value branching.
//!
//! Resolves `decision_key` against `previous_outputs`, looks the value up in
//! the routing map and prepends the selected ids to the engine's queue. Ids
//! that also occur later in the static sequence are deduplicated by the
//! engine, so a routed node runs at most once per scope.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agent::{Flow, Node, NodeDescriptor, NodeOutcome, SharedDeps};
use crate::context::{AgentOutput, Context};
use crate::engine::Engine;
use crate::error::OrkaError;
use crate::graph::NodeSpec;

#[derive(Debug, Clone, Deserialize)]
struct RouterParams {
    /// Dot path into `previous_outputs`, e.g. `classify.result`.
    decision_key: String,
    routing_map: HashMap<String, Vec<String>>,
    #[serde(default)]
    default: Option<Vec<String>>,
}

pub struct RouterNode {
    descriptor: NodeDescriptor,
    decision_key: String,
    routing_map: HashMap<String, Vec<String>>,
    default: Option<Vec<String>>,
}

impl RouterNode {
    pub fn build(spec: &NodeSpec, _deps: &SharedDeps) -> Result<Arc<dyn Node>, OrkaError> {
        let p: RouterParams = spec
            .parse_params()
            .map_err(|e| OrkaError::GraphInvalid { reasons: vec![e] })?;
        if p.routing_map.is_empty() {
            return Err(OrkaError::GraphInvalid {
                reasons: vec![format!("router '{}': routing_map must not be empty", spec.id)],
            });
        }
        Ok(Arc::new(Self {
            descriptor: NodeDescriptor::control(&spec.id, "router"),
            decision_key: p.decision_key,
            routing_map: p.routing_map,
            default: p.default,
        }))
    }

    /// Decision values are matched as strings; non-strings use their JSON
    /// form, and a lowercase retry absorbs classifier casing.
    fn targets_for(&self, decision: &str) -> Option<&Vec<String>> {
        self.routing_map
            .get(decision)
            .or_else(|| self.routing_map.get(&decision.to_lowercase()))
            .or(self.default.as_ref())
    }
}

#[async_trait]
impl Node for RouterNode {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        _rt: &Engine,
        ctx: &Context,
        _prompt: Option<&str>,
    ) -> Result<NodeOutcome, OrkaError> {
        let decision = match ctx.resolve_path(&self.decision_key) {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let targets = self
            .targets_for(&decision)
            .ok_or_else(|| OrkaError::RouteUnknown(decision.clone()))?
            .clone();

        tracing::debug!(
            router = %self.descriptor.id,
            decision = %decision,
            targets = ?targets,
            "routing decision"
        );
        Ok(NodeOutcome::of(AgentOutput::success(json!({
            "decision": decision,
            "targets": targets,
        })))
        .with_flow(Flow::Prepend(targets)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_support::test_deps;
    use crate::engine::test_support::idle_engine;

    fn router() -> Arc<dyn Node> {
        let spec: NodeSpec = serde_yaml::from_str(
            r#"
id: route
type: router
decision_key: classify.result
routing_map:
  "yes": [a]
  "no": [b]
"#,
        )
        .unwrap();
        RouterNode::build(&spec, &test_deps()).unwrap()
    }

    /// **Scenario**: a mapped decision prepends its target list.
    #[tokio::test]
    async fn mapped_decision_prepends() {
        let engine = idle_engine();
        let mut ctx = Context::new(json!("q"), "t-1");
        ctx.insert_output("classify", AgentOutput::success(json!("yes")));
        let outcome = router().run(&engine, &ctx, None).await.unwrap();
        assert_eq!(outcome.flow, Flow::Prepend(vec!["a".to_string()]));
        assert_eq!(outcome.output.result["decision"], json!("yes"));
    }

    /// **Scenario**: casing from a classifier is absorbed.
    #[tokio::test]
    async fn lowercase_retry() {
        let engine = idle_engine();
        let mut ctx = Context::new(json!("q"), "t-1");
        ctx.insert_output("classify", AgentOutput::success(json!("YES")));
        let outcome = router().run(&engine, &ctx, None).await.unwrap();
        assert_eq!(outcome.flow, Flow::Prepend(vec!["a".to_string()]));
    }

    /// **Scenario**: unmapped decision without default is RouteUnknown.
    #[tokio::test]
    async fn unmapped_without_default_fails() {
        let engine = idle_engine();
        let mut ctx = Context::new(json!("q"), "t-1");
        ctx.insert_output("classify", AgentOutput::success(json!("maybe")));
        let err = router().run(&engine, &ctx, None).await.unwrap_err();
        assert!(matches!(err, OrkaError::RouteUnknown(v) if v == "maybe"));
    }

    /// **Scenario**: unmapped decision falls through to the default route.
    #[tokio::test]
    async fn default_route_used() {
        let spec: NodeSpec = serde_yaml::from_str(
            r#"
id: route
type: router
decision_key: classify.result
routing_map:
  "yes": [a]
default: [fallback]
"#,
        )
        .unwrap();
        let node = RouterNode::build(&spec, &test_deps()).unwrap();
        let engine = idle_engine();
        let mut ctx = Context::new(json!("q"), "t-1");
        ctx.insert_output("classify", AgentOutput::success(json!("maybe")));
        let outcome = node.run(&engine, &ctx, None).await.unwrap();
        assert_eq!(outcome.flow, Flow::Prepend(vec!["fallback".to_string()]));
    }

    /// **Scenario**: empty routing map is rejected at build time.
    #[test]
    fn empty_map_rejected() {
        let spec: NodeSpec = serde_yaml::from_str(
            "id: r\ntype: router\ndecision_key: x.result\nrouting_map: {}\n",
        )
        .unwrap();
        assert!(RouterNode::build(&spec, &test_deps()).is_err());
    }
}
