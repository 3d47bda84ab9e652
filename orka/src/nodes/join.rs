//! Join: barrier over a fork group.
//!
//! Blocks until every required branch leaf has reported, then merges branch
//! results into `branch-leaf-id → result` and records every branch node's
//! output in the parent scope. Timeout produces `JoinTimeout`; partial branch
//! failures follow the fork's `require_all` setting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::agent::{Node, NodeDescriptor, NodeOutcome, SharedDeps};
use crate::context::{AgentOutput, Context};
use crate::engine::Engine;
use crate::error::{ErrorKind, OrkaError};
use crate::graph::NodeSpec;

#[derive(Debug, Clone, Deserialize)]
struct JoinParams {
    /// Fork node id whose group this join closes.
    group: String,
    /// Caps the wait at `max_retries` seconds when tighter than the run's
    /// join timeout.
    #[serde(default)]
    max_retries: Option<u64>,
}

pub struct JoinNode {
    descriptor: NodeDescriptor,
    group: String,
    max_retries: Option<u64>,
}

impl JoinNode {
    pub fn build(spec: &NodeSpec, _deps: &SharedDeps) -> Result<Arc<dyn Node>, OrkaError> {
        let p: JoinParams = spec
            .parse_params()
            .map_err(|e| OrkaError::GraphInvalid { reasons: vec![e] })?;
        Ok(Arc::new(Self {
            descriptor: NodeDescriptor::control(&spec.id, "join"),
            group: p.group,
            max_retries: p.max_retries,
        }))
    }
}

#[async_trait]
impl Node for JoinNode {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        rt: &Engine,
        _ctx: &Context,
        _prompt: Option<&str>,
    ) -> Result<NodeOutcome, OrkaError> {
        let group = rt.forks().group_for_fork(&self.group).ok_or_else(|| {
            OrkaError::AgentFailed(format!(
                "join '{}': no open fork group for '{}'",
                self.descriptor.id, self.group
            ))
        })?;

        let mut timeout = rt.join_timeout();
        if let Some(retries) = self.max_retries {
            timeout = timeout.min(Duration::from_secs(retries));
        }
        if !group.wait_complete(timeout).await {
            return Err(OrkaError::JoinTimeout(group.group_id.clone()));
        }

        let outputs = group.snapshot_outputs();
        let mut merged = Map::new();
        let mut failed_leaves: Vec<String> = Vec::new();
        for leaf in &group.leaf_ids {
            match outputs.get(leaf) {
                Some(out) if out.is_success() => {
                    merged.insert(leaf.clone(), out.result.clone());
                }
                Some(out) => {
                    failed_leaves.push(leaf.clone());
                    let message = out
                        .error
                        .as_ref()
                        .map(|e| e.message.clone())
                        .unwrap_or_else(|| "branch failed".into());
                    merged.insert(leaf.clone(), json!({ "error": message }));
                }
                None => {
                    failed_leaves.push(leaf.clone());
                    merged.insert(leaf.clone(), json!({ "error": "missing branch output" }));
                }
            }
        }

        let output = if !failed_leaves.is_empty() && group.require_all {
            AgentOutput::failed(
                ErrorKind::AgentFailed,
                format!(
                    "join '{}': branches failed: {}",
                    self.descriptor.id,
                    failed_leaves.join(", ")
                ),
            )
        } else {
            AgentOutput::success(Value::Object(merged))
        };

        // Post-join, every branch node's output becomes visible to the rest
        // of the run.
        let mut outcome = NodeOutcome::of(output);
        for (id, out) in outputs {
            outcome = outcome.with_extra(id, out);
        }
        Ok(outcome)
    }
}
