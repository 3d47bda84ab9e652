//! Workflow loading and one-pass validation.
//!
//! Parses the YAML document, accumulates every problem it can find into a
//! single `GraphInvalid { reasons }` and only then builds the immutable
//! [`WorkflowGraph`]. Per-variant config validation reuses the node builders
//! against throwaway dependencies, so the loader and the engine can never
//! disagree about what a valid config is.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::agent::{NodeRegistry, SharedDeps};
use crate::error::OrkaError;
use crate::memory::{
    preset, preset_names, HashEmbedder, InMemoryBackend, MemoryStore, RetentionPolicy,
};
use crate::providers::{MockLlm, MockSearch};
use crate::template::TemplateRenderer;

use super::spec::{NodeSpec, WorkflowGraph, WorkflowSpec};

/// Loads and validates a workflow document from YAML text.
pub fn load_str(yaml: &str, registry: &NodeRegistry) -> Result<WorkflowGraph, OrkaError> {
    let spec: WorkflowSpec = serde_yaml::from_str(yaml).map_err(|e| OrkaError::GraphInvalid {
        reasons: vec![format!("yaml: {}", e)],
    })?;
    load_spec(&spec, registry)
}

/// Loads and validates a workflow document from a file.
pub fn load_file(path: impl AsRef<Path>, registry: &NodeRegistry) -> Result<WorkflowGraph, OrkaError> {
    let yaml = std::fs::read_to_string(path.as_ref()).map_err(|e| OrkaError::GraphInvalid {
        reasons: vec![format!("read {}: {}", path.as_ref().display(), e)],
    })?;
    load_str(&yaml, registry)
}

/// Validates a parsed document and compiles the immutable graph.
pub fn load_spec(spec: &WorkflowSpec, registry: &NodeRegistry) -> Result<WorkflowGraph, OrkaError> {
    let reasons = validate(spec, registry);
    if !reasons.is_empty() {
        return Err(OrkaError::GraphInvalid { reasons });
    }
    compile_embedded(spec)
}

/// Structure-only compile (no registry checks). Used for loop bodies whose
/// enclosing document has already been validated.
pub fn compile_embedded(spec: &WorkflowSpec) -> Result<WorkflowGraph, OrkaError> {
    let mut nodes = HashMap::new();
    let mut reasons = Vec::new();
    for node in &spec.agents {
        if nodes.insert(node.id.clone(), node.clone()).is_some() {
            reasons.push(format!("duplicate node id '{}'", node.id));
        }
    }
    for id in &spec.orchestrator.agents {
        if !nodes.contains_key(id) {
            reasons.push(format!("sequence references unknown node '{}'", id));
        }
    }
    if spec.orchestrator.agents.is_empty() {
        reasons.push("orchestrator sequence is empty".into());
    }
    if !reasons.is_empty() {
        return Err(OrkaError::GraphInvalid { reasons });
    }
    Ok(WorkflowGraph {
        id: spec.orchestrator.id.clone(),
        strategy: spec.orchestrator.strategy,
        sequence: spec.orchestrator.agents.clone(),
        nodes,
        memory_preset: spec.orchestrator.memory_preset.clone(),
        memory_overrides: spec.orchestrator.memory_config.clone(),
    })
}

/// One validation pass over the whole document, nested workflows included.
/// Returns every issue found; an empty list means the document is valid.
pub fn validate(spec: &WorkflowSpec, registry: &NodeRegistry) -> Vec<String> {
    let mut reasons = Vec::new();
    let scratch = scratch_deps();
    validate_document(spec, registry, &scratch, &mut reasons);
    reasons
}

fn validate_document(
    spec: &WorkflowSpec,
    registry: &NodeRegistry,
    scratch: &SharedDeps,
    reasons: &mut Vec<String>,
) {
    if spec.orchestrator.agents.is_empty() {
        reasons.push(format!(
            "workflow '{}': orchestrator sequence is empty",
            spec.orchestrator.id
        ));
    }

    let mut ids = HashSet::new();
    for node in &spec.agents {
        if !ids.insert(node.id.as_str()) {
            reasons.push(format!("duplicate node id '{}'", node.id));
        }
    }

    for id in &spec.orchestrator.agents {
        if !ids.contains(id.as_str()) {
            reasons.push(format!("sequence references unknown node '{}'", id));
        }
    }

    if let Some(name) = &spec.orchestrator.memory_preset {
        if preset(name).is_none() {
            reasons.push(format!(
                "unknown memory_preset '{}' (known: {})",
                name,
                preset_names().join(", ")
            ));
        }
    }

    for node in &spec.agents {
        validate_node(node, &ids, registry, scratch, reasons, &mut Vec::new());
    }
}

fn validate_node(
    node: &NodeSpec,
    ids: &HashSet<&str>,
    registry: &NodeRegistry,
    scratch: &SharedDeps,
    reasons: &mut Vec<String>,
    ancestors: &mut Vec<String>,
) {
    if !registry.contains(&node.kind) {
        reasons.push(format!(
            "node '{}': unregistered type '{}'",
            node.id, node.kind
        ));
        return;
    }
    if ancestors.iter().any(|a| a == &node.id) {
        reasons.push(format!(
            "node '{}' references itself through its child tree",
            node.id
        ));
        return;
    }

    // Reference checks by type, straight off the raw params.
    match node.kind.as_str() {
        "router" => {
            for (value, targets) in routing_targets(node) {
                for target in targets {
                    if !ids.contains(target.as_str()) {
                        reasons.push(format!(
                            "router '{}': route {:?} targets unknown node '{}'",
                            node.id, value, target
                        ));
                    }
                }
            }
        }
        "fork" => {
            let branches = fork_branches(node);
            if branches.is_empty() || branches.iter().any(Vec::is_empty) {
                reasons.push(format!(
                    "fork '{}': targets must be a non-empty list of non-empty branches",
                    node.id
                ));
            }
            for branch in branches {
                for target in branch {
                    if !ids.contains(target.as_str()) {
                        reasons.push(format!(
                            "fork '{}': branch references unknown node '{}'",
                            node.id, target
                        ));
                    }
                }
            }
        }
        "join" => {
            match node.params.get("group").and_then(Value::as_str) {
                Some(group) => {
                    if !ids.contains(group) {
                        reasons.push(format!(
                            "join '{}': group references unknown fork '{}'",
                            node.id, group
                        ));
                    }
                }
                None => reasons.push(format!("join '{}': group is required", node.id)),
            }
        }
        "loop" => match &node.internal_workflow {
            Some(inner) => validate_document(inner, registry, scratch, reasons),
            None => reasons.push(format!("loop '{}': internal_workflow is required", node.id)),
        },
        _ => {}
    }

    // Per-variant config parse via the real builders against scratch deps.
    // Identical reasons (loop bodies are also walked above) deduplicate.
    if let Err(e) = registry.build(node, scratch) {
        if let OrkaError::GraphInvalid { reasons: build_reasons } = e {
            for reason in build_reasons {
                if !reasons.contains(&reason) {
                    reasons.push(reason);
                }
            }
        }
    }

    ancestors.push(node.id.clone());
    for child in &node.children {
        validate_node(child, ids, registry, scratch, reasons, ancestors);
    }
    ancestors.pop();
}

fn routing_targets(node: &NodeSpec) -> Vec<(String, Vec<String>)> {
    let mut routes = Vec::new();
    if let Some(Value::Object(map)) = node.params.get("routing_map") {
        for (value, targets) in map {
            routes.push((value.clone(), string_list(targets)));
        }
    }
    if let Some(default) = node.params.get("default") {
        routes.push(("default".into(), string_list(default)));
    }
    routes
}

fn fork_branches(node: &NodeSpec) -> Vec<Vec<String>> {
    match node.params.get("targets") {
        Some(Value::Array(branches)) => branches
            .iter()
            .map(|branch| match branch {
                Value::String(id) => vec![id.clone()],
                other => string_list(other),
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Throwaway dependencies for validation-time builds: nothing is called,
/// configs just have to parse.
fn scratch_deps() -> SharedDeps {
    SharedDeps {
        memory: Arc::new(MemoryStore::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(HashEmbedder::default()),
            RetentionPolicy::default(),
        )),
        llm: Arc::new(MockLlm::always(String::new())),
        search: Arc::new(MockSearch::empty()),
        renderer: Arc::new(TemplateRenderer::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> NodeRegistry {
        NodeRegistry::with_builtins()
    }

    /// **Scenario**: a valid document loads into an immutable graph.
    #[test]
    fn valid_document_loads() {
        let graph = load_str(
            r#"
orchestrator:
  id: qa
  strategy: sequential
  agents: [answer]
  memory_preset: episodic
agents:
  - id: answer
    type: llm
    prompt: "Answer: {{ input }}"
"#,
            &registry(),
        )
        .unwrap();
        assert_eq!(graph.id, "qa");
        assert_eq!(graph.sequence, vec!["answer"]);
        assert_eq!(graph.memory_preset.as_deref(), Some("episodic"));
        assert!(graph.node("answer").is_some());
    }

    /// **Scenario**: all problems accumulate into one GraphInvalid.
    #[test]
    fn problems_accumulate_in_one_pass() {
        let err = load_str(
            r#"
orchestrator:
  id: broken
  agents: [ghost, route]
  memory_preset: imaginary
agents:
  - id: route
    type: router
    decision_key: ghost.result
    routing_map:
      "yes": [nowhere]
  - id: alien
    type: martian
"#,
            &registry(),
        )
        .unwrap_err();
        let OrkaError::GraphInvalid { reasons } = err else {
            panic!("expected GraphInvalid");
        };
        let text = reasons.join("\n");
        assert!(text.contains("unknown node 'ghost'"), "{}", text);
        assert!(text.contains("unknown node 'nowhere'"), "{}", text);
        assert!(text.contains("unregistered type 'martian'"), "{}", text);
        assert!(text.contains("memory_preset 'imaginary'"), "{}", text);
        assert!(reasons.len() >= 4, "{:?}", reasons);
    }

    /// **Scenario**: empty fork target list is rejected at load time.
    #[test]
    fn empty_fork_targets_rejected() {
        let err = load_str(
            r#"
orchestrator:
  id: forky
  agents: [split]
agents:
  - id: split
    type: fork
    targets: []
"#,
            &registry(),
        )
        .unwrap_err();
        let OrkaError::GraphInvalid { reasons } = err else {
            panic!("expected GraphInvalid");
        };
        assert!(reasons.iter().any(|r| r.contains("non-empty")), "{:?}", reasons);
    }

    /// **Scenario**: join must reference an existing fork node.
    #[test]
    fn join_group_checked() {
        let err = load_str(
            r#"
orchestrator:
  id: joined
  agents: [j]
agents:
  - id: j
    type: join
    group: missing_fork
"#,
            &registry(),
        )
        .unwrap_err();
        let OrkaError::GraphInvalid { reasons } = err else {
            panic!("expected GraphInvalid");
        };
        assert!(
            reasons.iter().any(|r| r.contains("missing_fork")),
            "{:?}",
            reasons
        );
    }

    /// **Scenario**: a loop's internal workflow is validated recursively.
    #[test]
    fn loop_internal_validated_recursively() {
        let err = load_str(
            r#"
orchestrator:
  id: looped
  agents: [improve]
agents:
  - id: improve
    type: loop
    max_loops: 3
    score_threshold: 0.8
    internal_workflow:
      orchestrator:
        id: inner
        agents: [missing_draft]
      agents:
        - id: draft
          type: llm
"#,
            &registry(),
        )
        .unwrap_err();
        let OrkaError::GraphInvalid { reasons } = err else {
            panic!("expected GraphInvalid");
        };
        assert!(
            reasons.iter().any(|r| r.contains("missing_draft")),
            "{:?}",
            reasons
        );
    }

    /// **Scenario**: a failover child sharing an ancestor id is a cycle.
    #[test]
    fn child_self_reference_rejected() {
        let err = load_str(
            r#"
orchestrator:
  id: cyclic
  agents: [resilient]
agents:
  - id: resilient
    type: failover
    children:
      - id: resilient
        type: llm
"#,
            &registry(),
        )
        .unwrap_err();
        let OrkaError::GraphInvalid { reasons } = err else {
            panic!("expected GraphInvalid");
        };
        assert!(
            reasons.iter().any(|r| r.contains("references itself")),
            "{:?}",
            reasons
        );
    }

    /// **Scenario**: duplicate node ids are reported.
    #[test]
    fn duplicate_ids_reported() {
        let err = load_str(
            r#"
orchestrator:
  id: dup
  agents: [a]
agents:
  - id: a
    type: llm
  - id: a
    type: llm
"#,
            &registry(),
        )
        .unwrap_err();
        let OrkaError::GraphInvalid { reasons } = err else {
            panic!("expected GraphInvalid");
        };
        assert!(reasons.iter().any(|r| r.contains("duplicate")), "{:?}", reasons);
    }

    /// **Scenario**: malformed YAML surfaces as GraphInvalid, not a panic.
    #[test]
    fn malformed_yaml_is_graph_invalid() {
        let err = load_str("orchestrator: [not, a, map", &registry()).unwrap_err();
        assert!(matches!(err, OrkaError::GraphInvalid { .. }));
    }
}
