//! Failover: ordered alternatives, first success wins.

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::{Node, NodeDescriptor, NodeOutcome, SharedDeps};
use crate::context::{AgentOutput, Context, Metrics, TraceInfo};
use crate::engine::Engine;
use crate::error::{ErrorKind, OrkaError};
use crate::graph::NodeSpec;

/// Executes inline children in order against the parent context snapshot; the
/// first `success` becomes the failover's result and later children never
/// run. Every attempted child's output is also recorded under its own id.
pub struct FailoverNode {
    descriptor: NodeDescriptor,
    children: Vec<(NodeSpec, Arc<dyn Node>)>,
}

impl FailoverNode {
    pub fn build(spec: &NodeSpec, deps: &SharedDeps) -> Result<Arc<dyn Node>, OrkaError> {
        if spec.children.is_empty() {
            return Err(OrkaError::GraphInvalid {
                reasons: vec![format!(
                    "failover '{}': requires at least one inline child",
                    spec.id
                )],
            });
        }
        // Children are built through the same builtin builders as top-level
        // nodes; the loader has already validated their specs.
        let registry = crate::agent::NodeRegistry::with_builtins();
        let mut children = Vec::with_capacity(spec.children.len());
        for child_spec in &spec.children {
            let node = registry.build(child_spec, deps)?;
            children.push((child_spec.clone(), node));
        }
        Ok(Arc::new(Self {
            descriptor: NodeDescriptor::control(&spec.id, "failover"),
            children,
        }))
    }
}

#[async_trait]
impl Node for FailoverNode {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        rt: &Engine,
        ctx: &Context,
        _prompt: Option<&str>,
    ) -> Result<NodeOutcome, OrkaError> {
        let mut attempts: Vec<(String, AgentOutput)> = Vec::new();
        let mut winner: Option<AgentOutput> = None;
        let mut metrics = Metrics::default();

        for (child_spec, child) in &self.children {
            let output = rt.invoke_child(child_spec, child, ctx).await;
            metrics.absorb(&output.metrics);
            let succeeded = output.is_success();
            tracing::debug!(
                failover = %self.descriptor.id,
                child = %child_spec.id,
                success = succeeded,
                "failover attempt"
            );
            attempts.push((child_spec.id.clone(), output.clone()));
            if succeeded {
                winner = Some(output);
                break;
            }
        }

        let mut trace = TraceInfo::default();
        for (id, output) in &attempts {
            trace.sub_outputs.insert(id.clone(), output.clone());
        }

        let mut outcome = match winner {
            Some(output) => NodeOutcome::of(
                AgentOutput::success(output.result.clone())
                    .with_metrics(metrics)
                    .with_trace(trace),
            ),
            None => {
                let summary: Vec<String> = attempts
                    .iter()
                    .map(|(id, out)| {
                        let msg = out
                            .error
                            .as_ref()
                            .map(|e| e.message.clone())
                            .unwrap_or_else(|| "failed".into());
                        format!("{}: {}", id, msg)
                    })
                    .collect();
                NodeOutcome::of(
                    AgentOutput::failed(
                        ErrorKind::AgentFailed,
                        format!("all children failed ({})", summary.join("; ")),
                    )
                    .with_metrics(metrics)
                    .with_trace(trace),
                )
            }
        };
        for (id, output) in attempts {
            outcome = outcome.with_extra(id, output);
        }
        Ok(outcome)
    }
}
