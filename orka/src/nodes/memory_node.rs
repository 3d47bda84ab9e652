//! Memory node: preset-driven read and write operations against the store.
//!
//! One type, two operations. `read` resolves the preset's search parameters
//! and returns ranked matches; `write` resolves the preset's retention side
//! through the store's classification and TTL logic and returns the stored id.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agent::{Node, NodeDescriptor, NodeOutcome, SharedDeps};
use crate::context::{AgentOutput, Context};
use crate::engine::Engine;
use crate::error::OrkaError;
use crate::graph::NodeSpec;
use crate::memory::{preset, MemoryEntry, MemoryType, SearchParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum MemoryOperation {
    Read,
    Write,
}

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct MemoryNodeParams {
    operation: MemoryOperation,
    #[serde(default = "default_namespace")]
    namespace: String,
    #[serde(default)]
    preset: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    similarity_threshold: Option<f64>,
    /// Pins the retention class instead of letting the store classify.
    #[serde(default)]
    memory_type: Option<MemoryType>,
    /// Attached to written entries; read side uses it as an exact filter.
    #[serde(default)]
    metadata: HashMap<String, Value>,
    /// Explicit id for idempotent writes.
    #[serde(default)]
    key: Option<String>,
    /// How many recent outputs feed the context-aware scoring component.
    #[serde(default)]
    context_window: Option<usize>,
}

pub struct MemoryNode {
    descriptor: NodeDescriptor,
    params: MemoryNodeParams,
}

impl MemoryNode {
    pub fn build(spec: &NodeSpec, _deps: &SharedDeps) -> Result<Arc<dyn Node>, OrkaError> {
        let params: MemoryNodeParams = spec
            .parse_params()
            .map_err(|e| OrkaError::GraphInvalid { reasons: vec![e] })?;
        if let Some(name) = &params.preset {
            if preset(name).is_none() {
                return Err(OrkaError::GraphInvalid {
                    reasons: vec![format!(
                        "memory '{}': unknown preset '{}' (known: {})",
                        spec.id,
                        name,
                        crate::memory::preset_names().join(", ")
                    )],
                });
            }
        }
        let mut descriptor = NodeDescriptor::leaf(&spec.id, "memory");
        descriptor.memory_writer = params.operation == MemoryOperation::Write;
        Ok(Arc::new(Self { descriptor, params }))
    }

    fn search_params(&self, rt: &Engine, ctx: &Context) -> SearchParams {
        let mut params = self
            .params
            .preset
            .as_deref()
            .and_then(preset)
            .map(|p| p.read.search_params())
            .unwrap_or_default();
        if let Some(overrides) = rt.memory_overrides() {
            overrides.apply_to_search(&mut params);
        }
        params.namespace = Some(self.params.namespace.clone());
        if let Some(limit) = self.params.limit {
            params.limit = limit;
        }
        if let Some(threshold) = self.params.similarity_threshold {
            params.similarity_threshold = threshold;
        }
        params.memory_type = self.params.memory_type;
        params.metadata_filters = self.params.metadata.clone();

        // Recent outputs, in sequence order, feed the context component.
        if params.context_weight > 0.0 {
            let window = self.params.context_window.unwrap_or(3);
            let mut recent: Vec<String> = rt
                .graph()
                .sequence
                .iter()
                .filter_map(|id| ctx.output(id))
                .map(|out| out.result_text())
                .filter(|text| !text.is_empty())
                .collect();
            let keep = recent.len().saturating_sub(window);
            params.context_window = recent.split_off(keep);
        }
        params
    }
}

#[async_trait]
impl Node for MemoryNode {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        rt: &Engine,
        ctx: &Context,
        prompt: Option<&str>,
    ) -> Result<NodeOutcome, OrkaError> {
        let text = prompt.map(str::to_string).unwrap_or_else(|| match &ctx.input {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });

        match self.params.operation {
            MemoryOperation::Read => {
                let params = self.search_params(rt, ctx);
                let response = rt
                    .memory()
                    .search(&text, &params)
                    .await
                    .map_err(OrkaError::from)?;
                let matches: Vec<Value> = response
                    .hits
                    .iter()
                    .map(|hit| {
                        json!({
                            "id": hit.entry.id,
                            "content": hit.entry.content,
                            "score": hit.score,
                            "metadata": hit.entry.metadata,
                            "memory_type": hit.entry.memory_type,
                        })
                    })
                    .collect();
                tracing::debug!(
                    node = %self.descriptor.id,
                    hits = matches.len(),
                    elapsed_ms = response.elapsed.as_millis() as u64,
                    vector_used = response.vector_used,
                    "memory read"
                );
                Ok(NodeOutcome::of(AgentOutput::success(Value::Array(matches))))
            }
            MemoryOperation::Write => {
                let mut entry = MemoryEntry::stored(&self.params.namespace, &text)
                    .with_node(&self.descriptor.id)
                    .with_trace(&ctx.trace_id);
                if let Some(id) = &self.params.key {
                    entry = entry.with_id(id.clone());
                }
                if let Some(t) = self.params.memory_type {
                    entry = entry.with_memory_type(t);
                }
                for (k, v) in &self.params.metadata {
                    entry = entry.with_metadata(k.clone(), v.clone());
                }
                let id = rt.memory().append(entry).await.map_err(OrkaError::from)?;
                Ok(NodeOutcome::of(AgentOutput::success(json!([id]))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_support::test_deps;
    use crate::engine::test_support::idle_engine_with_deps;

    /// **Scenario**: write returns the stored id; a read with a related query
    /// then surfaces the content.
    #[tokio::test]
    async fn write_then_read_round_trip() {
        let deps = test_deps();
        let engine = idle_engine_with_deps(deps.clone());

        let write_spec: NodeSpec = serde_yaml::from_str(
            "id: writer\ntype: memory\noperation: write\nnamespace: facts\n",
        )
        .unwrap();
        let writer = MemoryNode::build(&write_spec, &deps).unwrap();
        let ctx = Context::new(json!("ignored"), "t-1");
        let outcome = writer
            .run(&engine, &ctx, Some("capital of France is Paris"))
            .await
            .unwrap();
        let id = outcome.output.result[0].as_str().unwrap().to_string();
        assert!(!id.is_empty());

        let read_spec: NodeSpec = serde_yaml::from_str(
            "id: reader\ntype: memory\noperation: read\nnamespace: facts\nsimilarity_threshold: 0.6\n",
        )
        .unwrap();
        let reader = MemoryNode::build(&read_spec, &deps).unwrap();
        let outcome = reader
            .run(&engine, &ctx, Some("France capital"))
            .await
            .unwrap();
        let matches = outcome.output.result.as_array().unwrap();
        assert!(!matches.is_empty());
        assert!(matches[0]["content"].as_str().unwrap().contains("Paris"));
    }

    /// **Scenario**: unknown preset names are rejected at build time.
    #[test]
    fn unknown_preset_rejected() {
        let spec: NodeSpec = serde_yaml::from_str(
            "id: m\ntype: memory\noperation: read\npreset: imaginary\n",
        )
        .unwrap();
        let err = MemoryNode::build(&spec, &test_deps()).unwrap_err();
        assert!(matches!(err, OrkaError::GraphInvalid { .. }));
    }

    /// **Scenario**: the write operation marks the node as a memory writer.
    #[test]
    fn writer_descriptor_flag() {
        let spec: NodeSpec =
            serde_yaml::from_str("id: m\ntype: memory\noperation: write\n").unwrap();
        let node = MemoryNode::build(&spec, &test_deps()).unwrap();
        assert!(node.descriptor().memory_writer);

        let spec: NodeSpec =
            serde_yaml::from_str("id: m\ntype: memory\noperation: read\n").unwrap();
        let node = MemoryNode::build(&spec, &test_deps()).unwrap();
        assert!(!node.descriptor().memory_writer);
    }
}
