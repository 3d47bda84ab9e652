//! Fork: launch branches under a fresh fork group.
//!
//! Each branch runs on a context snapshotted at fork time, so concurrent
//! branches never observe each other's outputs; the matching join merges
//! branch results back into the parent scope. Parallel branches are spawned
//! on the engine's bounded worker pool; sequential mode runs them inline in
//! the listed order.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::agent::{Node, NodeDescriptor, NodeOutcome, SharedDeps};
use crate::context::{AgentOutput, Context};
use crate::engine::Engine;
use crate::error::{ErrorKind, OrkaError};
use crate::graph::NodeSpec;

/// One branch: a single node id or an ordered list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum BranchSpec {
    One(String),
    Many(Vec<String>),
}

impl BranchSpec {
    fn into_ids(self) -> Vec<String> {
        match self {
            BranchSpec::One(id) => vec![id],
            BranchSpec::Many(ids) => ids,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ForkMode {
    #[default]
    Parallel,
    Sequential,
}

fn default_require_all() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct ForkParams {
    targets: Vec<BranchSpec>,
    #[serde(default)]
    mode: ForkMode,
    #[serde(default = "default_require_all")]
    require_all: bool,
}

pub struct ForkNode {
    descriptor: NodeDescriptor,
    branches: Vec<Vec<String>>,
    mode: ForkMode,
    require_all: bool,
}

impl ForkNode {
    pub fn build(spec: &NodeSpec, _deps: &SharedDeps) -> Result<Arc<dyn Node>, OrkaError> {
        let p: ForkParams = spec
            .parse_params()
            .map_err(|e| OrkaError::GraphInvalid { reasons: vec![e] })?;
        let branches: Vec<Vec<String>> = p.targets.into_iter().map(BranchSpec::into_ids).collect();
        if branches.is_empty() || branches.iter().any(Vec::is_empty) {
            return Err(OrkaError::GraphInvalid {
                reasons: vec![format!(
                    "fork '{}': targets must be a non-empty list of non-empty branches",
                    spec.id
                )],
            });
        }
        Ok(Arc::new(Self {
            descriptor: NodeDescriptor::control(&spec.id, "fork"),
            branches,
            mode: p.mode,
            require_all: p.require_all,
        }))
    }
}

#[async_trait]
impl Node for ForkNode {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        rt: &Engine,
        ctx: &Context,
        _prompt: Option<&str>,
    ) -> Result<NodeOutcome, OrkaError> {
        let leaf_ids: Vec<String> = self
            .branches
            .iter()
            .map(|b| b.last().expect("validated non-empty").clone())
            .collect();
        let group = rt.forks().open(
            &self.descriptor.id,
            leaf_ids,
            self.branches.len(),
            self.require_all,
        );
        tracing::debug!(
            fork = %self.descriptor.id,
            group = %group.group_id,
            branches = self.branches.len(),
            mode = ?self.mode,
            "fork group opened"
        );

        match self.mode {
            ForkMode::Sequential => {
                for branch in &self.branches {
                    let child = ctx.branch_child(&group.group_id);
                    let outputs = rt.run_branch_collect(branch.clone(), child).await;
                    group.record_branch(outputs);
                }
            }
            ForkMode::Parallel => {
                for branch in &self.branches {
                    let engine = rt.clone();
                    let group = group.clone();
                    let branch = branch.clone();
                    let child = ctx.branch_child(&group.group_id);
                    tokio::spawn(async move {
                        let _permit = engine.branch_permits().acquire_owned().await.ok();
                        let outputs = engine.run_branch_collect(branch, child).await;
                        group.record_branch(outputs);
                    });
                }
            }
        }

        let branch_list = json!(self.branches);
        let outcome = NodeOutcome::of(AgentOutput::success(json!({
            "fork_group": group.group_id,
            "targets": self.branches,
        })))
        // Observability record under the group id itself.
        .with_extra(
            group.group_id.clone(),
            AgentOutput::success(json!({
                "fork": self.descriptor.id,
                "targets": branch_list,
            })),
        );
        Ok(outcome)
    }
}

/// Helper used by the engine to fill a missing branch output after a fatal
/// branch error, so a waiting join can still complete.
pub(crate) fn branch_error_output(message: &str) -> AgentOutput {
    AgentOutput::failed(ErrorKind::AgentFailed, message.to_string())
}
