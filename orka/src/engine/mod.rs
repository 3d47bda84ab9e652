//! Execution engine: queue-driven scheduling over an immutable graph.
//!
//! The engine owns the run's scheduler queue and is the only writer of the
//! run context. Per node it renders the prompt, applies the node's limits,
//! invokes it, wraps failures into the output envelope, records the output
//! (plus any extra outputs a join or failover reports) and appends a
//! log-category memory entry. Routers prepend to the queue; forks dispatch
//! branches onto a bounded worker pool; loops run nested engines with an
//! isolated queue but shared store and registry.

mod fork;

pub use fork::{ForkGroupManager, ForkGroupState};

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::agent::{Flow, Node, NodeRegistry, SharedDeps};
use crate::context::{AgentOutput, Context};
use crate::error::OrkaError;
use crate::graph::{FailurePolicy, NodeSpec, Strategy, WorkflowGraph};
use crate::memory::{MemoryEntry, MemoryOverrides, MemoryStore};
use crate::providers::ProviderError;
use crate::template::TemplateRenderer;

/// Run-level engine knobs. Per-node limits come from the node specs.
#[derive(Clone)]
pub struct EngineOptions {
    pub join_timeout: Duration,
    /// Default total budget per node.
    pub node_timeout: Duration,
    /// Default per-attempt budget for provider calls.
    pub attempt_timeout: Duration,
    /// Concurrent fork branches across the run.
    pub branch_pool_size: usize,
    pub cancel: CancellationToken,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(30),
            node_timeout: Duration::from_secs(120),
            attempt_timeout: Duration::from_secs(30),
            branch_pool_size: 8,
            cancel: CancellationToken::new(),
        }
    }
}

/// How a run ended from the engine's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    Completed,
    /// A node with `on_failure: abort` failed; the queue stopped there.
    Aborted { node_id: String },
}

struct NodeLimits {
    node_timeout: Duration,
    attempt_timeout: Duration,
    semaphore: Option<Arc<Semaphore>>,
    on_failure: FailurePolicy,
}

struct EngineInner {
    graph: Arc<WorkflowGraph>,
    registry: Arc<NodeRegistry>,
    deps: SharedDeps,
    nodes: HashMap<String, Arc<dyn Node>>,
    limits: HashMap<String, NodeLimits>,
    forks: ForkGroupManager,
    branch_permits: Arc<Semaphore>,
    options: EngineOptions,
}

/// Cheaply cloneable handle; fork branches and nested workflows share the
/// same inner state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Instantiates every node in the graph through the registry; config
    /// errors surface here, before the first step runs.
    pub fn new(
        graph: Arc<WorkflowGraph>,
        registry: Arc<NodeRegistry>,
        deps: SharedDeps,
        options: EngineOptions,
    ) -> Result<Self, OrkaError> {
        let mut nodes = HashMap::new();
        let mut limits = HashMap::new();
        for spec in graph.nodes.values() {
            let node = registry.build(spec, &deps)?;
            nodes.insert(spec.id.clone(), node);
            collect_limits(spec, &options, &mut limits);
        }
        Ok(Self {
            inner: Arc::new(EngineInner {
                branch_permits: Arc::new(Semaphore::new(options.branch_pool_size.max(1))),
                graph,
                registry,
                deps,
                nodes,
                limits,
                forks: ForkGroupManager::new(),
                options,
            }),
        })
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.inner.graph
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.inner.deps.memory
    }

    pub fn memory_overrides(&self) -> Option<&MemoryOverrides> {
        self.inner.graph.memory_overrides.as_ref()
    }

    pub fn renderer(&self) -> &TemplateRenderer {
        self.inner.deps.renderer.as_ref()
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.inner.registry
    }

    pub fn forks(&self) -> &ForkGroupManager {
        &self.inner.forks
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.options.cancel
    }

    pub fn join_timeout(&self) -> Duration {
        self.inner.options.join_timeout
    }

    pub fn branch_permits(&self) -> Arc<Semaphore> {
        self.inner.branch_permits.clone()
    }

    pub fn spec(&self, id: &str) -> Option<&NodeSpec> {
        self.inner.graph.nodes.get(id)
    }

    pub fn node_instance(&self, id: &str) -> Option<&Arc<dyn Node>> {
        self.inner.nodes.get(id)
    }

    /// Static sequence after `node_id` (graph-scout lookahead).
    pub fn static_sequence_after(&self, node_id: &str) -> Vec<String> {
        let seq = &self.inner.graph.sequence;
        match seq.iter().position(|id| id == node_id) {
            Some(pos) => seq[pos + 1..].to_vec(),
            None => Vec::new(),
        }
    }

    /// Drives the whole run according to the graph strategy.
    pub async fn run(&self, ctx: &mut Context) -> Result<EngineStatus, OrkaError> {
        match self.inner.graph.strategy {
            Strategy::Sequential => {
                let sequence = self.inner.graph.sequence.clone();
                self.run_queue(ctx, sequence).await
            }
            Strategy::Parallel => self.run_parallel(ctx).await,
        }
    }

    /// Queue loop: routers prepend (with dedup), `End` stops, failures follow
    /// the node's policy.
    pub async fn run_queue(
        &self,
        ctx: &mut Context,
        ids: Vec<String>,
    ) -> Result<EngineStatus, OrkaError> {
        let mut queue: VecDeque<String> = ids.into();
        while let Some(id) = queue.pop_front() {
            if self.inner.options.cancel.is_cancelled() {
                return Err(OrkaError::Cancelled);
            }
            let (spec, node) = self.lookup(&id)?;
            let (output, flow, extras) = self.invoke_spec(&spec, &node, ctx).await?;

            let failed = output.is_failed();
            self.record_step(ctx, &id, &output).await;
            ctx.insert_output(&id, output);
            ctx.executed.push(id.clone());
            for (extra_id, extra) in extras {
                ctx.insert_output(extra_id, extra);
            }

            if failed {
                let policy = self
                    .inner
                    .limits
                    .get(&id)
                    .map(|l| l.on_failure)
                    .unwrap_or_default();
                if policy == FailurePolicy::Abort {
                    tracing::warn!(node = %id, "abort policy triggered; stopping run");
                    self.inner.options.cancel.cancel();
                    return Ok(EngineStatus::Aborted { node_id: id });
                }
            }

            match flow {
                Flow::Continue => {}
                Flow::End => break,
                Flow::Prepend(targets) => {
                    // A routed id runs at most once per scope: drop duplicates
                    // from the remaining static queue, then prepend in order.
                    queue.retain(|queued| !targets.contains(queued));
                    for target in targets.into_iter().rev() {
                        queue.push_front(target);
                    }
                }
            }
        }
        Ok(EngineStatus::Completed)
    }

    /// Parallel strategy: every sequence node runs concurrently against the
    /// initial snapshot, with an implicit join at the end. Flow directives
    /// are meaningless here and ignored with a warning.
    async fn run_parallel(&self, ctx: &mut Context) -> Result<EngineStatus, OrkaError> {
        let mut set = JoinSet::new();
        for id in self.inner.graph.sequence.clone() {
            let engine = self.clone();
            let snapshot = ctx.clone();
            set.spawn(async move {
                let result = match engine.lookup(&id) {
                    Ok((spec, node)) => engine.invoke_spec(&spec, &node, &snapshot).await,
                    Err(e) => Err(e),
                };
                (id, result)
            });
        }

        let mut collected: HashMap<String, (AgentOutput, Vec<(String, AgentOutput)>)> =
            HashMap::new();
        while let Some(joined) = set.join_next().await {
            let (id, result) = joined.map_err(|e| OrkaError::AgentFailed(e.to_string()))?;
            let (output, flow, extras) = result?;
            if !matches!(flow, Flow::Continue) {
                tracing::warn!(node = %id, "flow directive ignored under parallel strategy");
            }
            collected.insert(id, (output, extras));
        }

        // Merge in sequence order for deterministic context contents.
        let mut aborted: Option<String> = None;
        for id in &self.inner.graph.sequence {
            if let Some((output, extras)) = collected.remove(id) {
                let failed = output.is_failed();
                self.record_step(ctx, id, &output).await;
                ctx.insert_output(id, output);
                ctx.executed.push(id.clone());
                for (extra_id, extra) in extras {
                    ctx.insert_output(extra_id, extra);
                }
                if failed && aborted.is_none() {
                    let policy = self
                        .inner
                        .limits
                        .get(id)
                        .map(|l| l.on_failure)
                        .unwrap_or_default();
                    if policy == FailurePolicy::Abort {
                        aborted = Some(id.clone());
                    }
                }
            }
        }
        match aborted {
            Some(node_id) => {
                self.inner.options.cancel.cancel();
                Ok(EngineStatus::Aborted { node_id })
            }
            None => Ok(EngineStatus::Completed),
        }
    }

    /// Runs one branch's node list sequentially on its isolated child
    /// context; returns the outputs added by the branch. Fatal errors mark
    /// the branch leaf with an error output so a waiting join can complete.
    pub async fn run_branch_collect(
        &self,
        ids: Vec<String>,
        mut ctx: Context,
    ) -> HashMap<String, AgentOutput> {
        let before: Vec<String> = ctx.previous_outputs.keys().cloned().collect();
        let leaf = ids.last().cloned();
        if let Err(e) = self.run_queue(&mut ctx, ids).await {
            tracing::warn!(error = %e, "fork branch failed");
            if let Some(leaf) = &leaf {
                if ctx.output(leaf).is_none() {
                    ctx.insert_output(
                        leaf.clone(),
                        crate::nodes::branch_error_output(&e.to_string()),
                    );
                }
            }
        }
        ctx.previous_outputs
            .into_iter()
            .filter(|(id, _)| !before.contains(id))
            .collect()
    }

    /// Runs a nested workflow (loop body) to completion on `ctx`, sharing the
    /// memory store and registry but an isolated scheduler scope.
    pub async fn run_subworkflow(
        &self,
        graph: &WorkflowGraph,
        ctx: &mut Context,
    ) -> Result<EngineStatus, OrkaError> {
        let mut options = self.inner.options.clone();
        options.cancel = self.inner.options.cancel.child_token();
        let nested = Engine::new(
            Arc::new(graph.clone()),
            self.inner.registry.clone(),
            self.inner.deps.clone(),
            options,
        )?;
        nested.run(ctx).await
    }

    /// Full per-node pipeline against a context snapshot, without recording:
    /// render prompt → limits → invoke → wrap non-fatal failures.
    async fn invoke_spec(
        &self,
        spec: &NodeSpec,
        node: &Arc<dyn Node>,
        ctx: &Context,
    ) -> Result<(AgentOutput, Flow, Vec<(String, AgentOutput)>), OrkaError> {
        let prompt = match &spec.prompt {
            Some(template) => Some(
                self.inner
                    .deps
                    .renderer
                    .render(template, &ctx.template_scope())
                    .map_err(OrkaError::from)?,
            ),
            None => None,
        };

        let limits = self.inner.limits.get(&spec.id);
        let node_timeout = limits
            .map(|l| l.node_timeout)
            .unwrap_or(self.inner.options.node_timeout);
        // Limiter acquisition is itself a suspension point subject to
        // cancellation.
        let _permit = match limits.and_then(|l| l.semaphore.clone()) {
            Some(semaphore) => Some(tokio::select! {
                _ = self.inner.options.cancel.cancelled() => return Err(OrkaError::Cancelled),
                permit = semaphore.acquire_owned() => {
                    permit.map_err(|_| OrkaError::Cancelled)?
                }
            }),
            None => None,
        };

        tracing::debug!(node = %spec.id, kind = %spec.kind, "node start");
        let started = std::time::Instant::now();
        let result = tokio::select! {
            _ = self.inner.options.cancel.cancelled() => Err(OrkaError::Cancelled),
            invoked = tokio::time::timeout(node_timeout, node.run(self, ctx, prompt.as_deref())) => {
                match invoked {
                    Ok(inner) => inner,
                    Err(_) => Err(OrkaError::Timeout(node_timeout)),
                }
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(outcome) => {
                tracing::debug!(
                    node = %spec.id,
                    status = ?outcome.output.status,
                    elapsed_ms,
                    "node complete"
                );
                Ok((outcome.output, outcome.flow, outcome.extra_outputs))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(node = %spec.id, error = %e, elapsed_ms, "node failed");
                let mut output = AgentOutput::failed(e.kind(), e.to_string());
                output.metrics.latency_ms = elapsed_ms;
                output.trace.prompt = prompt;
                Ok((output, Flow::Continue, Vec::new()))
            }
        }
    }

    /// Failover-child invocation: same pipeline, but every error (fatal
    /// included) collapses into a failed output — alternatives are exactly
    /// the place where failures stay local.
    pub async fn invoke_child(
        &self,
        spec: &NodeSpec,
        node: &Arc<dyn Node>,
        ctx: &Context,
    ) -> AgentOutput {
        match self.invoke_spec(spec, node, ctx).await {
            Ok((output, _, _)) => output,
            Err(e) => AgentOutput::failed(e.kind(), e.to_string()),
        }
    }

    /// Wraps one provider call in the node's per-attempt budget and the run's
    /// cancellation token. Enforcement lives here, not in agent code.
    pub async fn provider_attempt<T, F>(&self, node_id: &str, fut: F) -> Result<T, OrkaError>
    where
        F: Future<Output = Result<T, ProviderError>> + Send,
        T: Send,
    {
        let attempt_timeout = self
            .inner
            .limits
            .get(node_id)
            .map(|l| l.attempt_timeout)
            .unwrap_or(self.inner.options.attempt_timeout);
        tokio::select! {
            _ = self.inner.options.cancel.cancelled() => Err(OrkaError::Cancelled),
            attempted = tokio::time::timeout(attempt_timeout, fut) => match attempted {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(OrkaError::AgentFailed(e.to_string())),
                Err(_) => Err(OrkaError::Timeout(attempt_timeout)),
            },
        }
    }

    fn lookup(&self, id: &str) -> Result<(NodeSpec, Arc<dyn Node>), OrkaError> {
        let spec = self.inner.graph.nodes.get(id).ok_or_else(|| {
            OrkaError::GraphInvalid {
                reasons: vec![format!("queue references unknown node '{}'", id)],
            }
        })?;
        let node = self.inner.nodes.get(id).ok_or_else(|| {
            OrkaError::GraphInvalid {
                reasons: vec![format!("no instance for node '{}'", id)],
            }
        })?;
        Ok((spec.clone(), node.clone()))
    }

    /// Appends the step's log-category entry (never retrievable by readers).
    /// Log failures degrade to tracing warnings, they never fail the run.
    async fn record_step(&self, ctx: &Context, node_id: &str, output: &AgentOutput) {
        let content = json!({
            "node_id": node_id,
            "status": output.status,
            "latency_ms": output.metrics.latency_ms,
            "error": output.error.as_ref().map(|e| e.message.clone()),
        })
        .to_string();
        let mut entry = MemoryEntry::log(format!("{}_logs", self.inner.graph.id), content)
            .with_node(node_id)
            .with_trace(&ctx.trace_id);
        for (k, v) in &ctx.metadata {
            entry = entry.with_metadata(k.clone(), serde_json::Value::String(v.clone()));
        }
        if let Err(e) = self.inner.deps.memory.append(entry).await {
            tracing::warn!(node = %node_id, error = %e, "step log entry not stored");
        }
    }
}

fn collect_limits(
    spec: &NodeSpec,
    options: &EngineOptions,
    limits: &mut HashMap<String, NodeLimits>,
) {
    limits.insert(
        spec.id.clone(),
        NodeLimits {
            node_timeout: spec
                .timeout_secs
                .map(Duration::from_secs_f64)
                .unwrap_or(options.node_timeout),
            attempt_timeout: spec
                .attempt_timeout_secs
                .map(Duration::from_secs_f64)
                .unwrap_or(options.attempt_timeout),
            semaphore: spec
                .max_concurrency
                .map(|n| Arc::new(Semaphore::new(n.max(1)))),
            on_failure: spec.on_failure,
        },
    );
    for child in &spec.children {
        collect_limits(child, options, limits);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::sync::Arc;

    use crate::agent::{NodeRegistry, SharedDeps};
    use crate::graph::{Strategy, WorkflowGraph};
    use crate::providers::LlmProvider;

    use super::{Engine, EngineOptions};

    /// Engine over an empty graph, for node-level unit tests.
    pub(crate) fn idle_engine() -> Engine {
        idle_engine_with_deps(crate::agent::test_support::test_deps())
    }

    pub(crate) fn idle_engine_with_llm(llm: Arc<dyn LlmProvider>) -> Engine {
        let mut deps = crate::agent::test_support::test_deps();
        deps.llm = llm;
        idle_engine_with_deps(deps)
    }

    pub(crate) fn idle_engine_with_deps(deps: SharedDeps) -> Engine {
        let graph = WorkflowGraph {
            id: "test".into(),
            strategy: Strategy::Sequential,
            sequence: Vec::new(),
            nodes: HashMap::new(),
            memory_preset: None,
            memory_overrides: None,
        };
        Engine::new(
            Arc::new(graph),
            Arc::new(NodeRegistry::with_builtins()),
            deps,
            EngineOptions::default(),
        )
        .expect("idle engine")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_support::test_deps;
    use crate::context::OutputStatus;
    use crate::providers::MockLlm;
    use serde_json::json;

    fn graph_from_yaml(yaml: &str) -> Arc<WorkflowGraph> {
        let spec: crate::graph::WorkflowSpec = serde_yaml::from_str(yaml).unwrap();
        Arc::new(crate::graph::compile_embedded(&spec).unwrap())
    }

    fn engine_for(yaml: &str, llm: Arc<dyn crate::providers::LlmProvider>) -> Engine {
        let mut deps = test_deps();
        deps.llm = llm;
        Engine::new(
            graph_from_yaml(yaml),
            Arc::new(NodeRegistry::with_builtins()),
            deps,
            EngineOptions::default(),
        )
        .unwrap()
    }

    /// **Scenario**: a two-step sequence pipes the first output into the
    /// second prompt and records both outputs.
    #[tokio::test]
    async fn sequential_pipeline_observes_prior_outputs() {
        let engine = engine_for(
            r#"
orchestrator:
  id: pipeline
  agents: [first, second]
agents:
  - id: first
    type: llm
    prompt: "step one: {{ input }}"
  - id: second
    type: llm
    prompt: "step two after {{ previous_outputs.first.result }}"
"#,
            Arc::new(MockLlm::sequence(["one", "two"])),
        );
        let mut ctx = Context::new(json!("go"), "t-1");
        let status = engine.run(&mut ctx).await.unwrap();
        assert_eq!(status, EngineStatus::Completed);
        assert_eq!(ctx.output("first").unwrap().result, json!("one"));
        assert_eq!(ctx.output("second").unwrap().result, json!("two"));
        assert_eq!(
            ctx.output("second").unwrap().trace.prompt.as_deref(),
            Some("step two after one")
        );
    }

    /// **Scenario**: router output is prepended and duplicates are dropped
    /// from the remaining static queue (each id runs once).
    #[tokio::test]
    async fn router_prepend_deduplicates_static_queue() {
        let engine = engine_for(
            r#"
orchestrator:
  id: routed
  agents: [classify, route, a]
agents:
  - id: classify
    type: llm
    prompt: "classify {{ input }}"
  - id: route
    type: router
    decision_key: classify.result
    routing_map:
      "yes": [a]
      "no": [b]
  - id: a
    type: llm
    prompt: "ran a"
  - id: b
    type: llm
    prompt: "ran b"
"#,
            Arc::new(MockLlm::sequence(["yes", "went-A"])),
        );
        let mut ctx = Context::new(json!("q"), "t-1");
        engine.run(&mut ctx).await.unwrap();
        assert!(ctx.output("a").is_some());
        assert!(ctx.output("b").is_none());
        // "a" executed exactly once: the mock served only two calls.
        assert_eq!(ctx.output("a").unwrap().result, json!("went-A"));
    }

    /// **Scenario**: a failing node with the default policy lets the run
    /// continue; with abort policy the run stops and later nodes never run.
    #[tokio::test]
    async fn failure_policy_continue_vs_abort() {
        let continue_engine = engine_for(
            r#"
orchestrator:
  id: lenient
  agents: [bad, after]
agents:
  - id: bad
    type: llm
  - id: after
    type: llm
    prompt: "still running"
"#,
            Arc::new(MockLlm::failing("provider down")),
        );
        let mut ctx = Context::new(json!("q"), "t-1");
        let status = continue_engine.run(&mut ctx).await.unwrap();
        assert_eq!(status, EngineStatus::Completed);
        assert_eq!(ctx.output("bad").unwrap().status, OutputStatus::Failed);
        // Provider keeps failing, but the node still executed.
        assert!(ctx.output("after").is_some());

        let abort_engine = engine_for(
            r#"
orchestrator:
  id: strict
  agents: [bad, after]
agents:
  - id: bad
    type: llm
    on_failure: abort
  - id: after
    type: llm
    prompt: "never runs"
"#,
            Arc::new(MockLlm::failing("provider down")),
        );
        let mut ctx = Context::new(json!("q"), "t-1");
        let status = abort_engine.run(&mut ctx).await.unwrap();
        assert_eq!(
            status,
            EngineStatus::Aborted {
                node_id: "bad".into()
            }
        );
        assert!(ctx.output("after").is_none());
    }

    /// **Scenario**: every executed step appends a log-category entry that is
    /// invisible to reader searches but visible in stats.
    #[tokio::test]
    async fn steps_append_log_entries() {
        let engine = engine_for(
            r#"
orchestrator:
  id: logged
  agents: [only]
agents:
  - id: only
    type: llm
    prompt: "p"
"#,
            Arc::new(MockLlm::always("ok")),
        );
        let memory = engine.memory().clone();
        let mut ctx = Context::new(json!("q"), "t-log");
        engine.run(&mut ctx).await.unwrap();

        let stats = memory.stats().await.unwrap();
        assert_eq!(stats.log, 1);
        assert_eq!(stats.stored, 0);
        let params = crate::memory::SearchParams {
            namespace: Some("logged_logs".into()),
            ..Default::default()
        };
        let res = memory.search("only", &params).await.unwrap();
        assert!(res.hits.is_empty(), "log entries must not be searchable");
    }

    /// **Scenario**: node timeout produces a failed output with Timeout kind.
    #[tokio::test]
    async fn node_timeout_wraps_as_failed_output() {
        struct SlowLlm;
        #[async_trait::async_trait]
        impl crate::providers::LlmProvider for SlowLlm {
            async fn generate(
                &self,
                _prompt: &str,
                _params: &crate::providers::LlmParams,
            ) -> Result<crate::providers::Generation, crate::providers::ProviderError>
            {
                tokio::time::sleep(Duration::from_secs(60)).await;
                unreachable!("sleep outlives the attempt budget")
            }
            fn name(&self) -> &str {
                "slow"
            }
        }

        let engine = engine_for(
            r#"
orchestrator:
  id: slow
  agents: [sluggish]
agents:
  - id: sluggish
    type: llm
    prompt: "p"
    attempt_timeout_secs: 0.05
"#,
            Arc::new(SlowLlm),
        );
        let mut ctx = Context::new(json!("q"), "t-1");
        engine.run(&mut ctx).await.unwrap();
        let out = ctx.output("sluggish").unwrap();
        assert_eq!(out.status, OutputStatus::Failed);
        assert_eq!(
            out.error.as_ref().unwrap().kind,
            crate::error::ErrorKind::Timeout
        );
    }

    /// **Scenario**: cancelling the run token stops the queue with Cancelled.
    #[tokio::test]
    async fn cancellation_stops_queue() {
        let engine = engine_for(
            r#"
orchestrator:
  id: cancelled
  agents: [only]
agents:
  - id: only
    type: llm
    prompt: "p"
"#,
            Arc::new(MockLlm::always("ok")),
        );
        engine.cancel_token().cancel();
        let mut ctx = Context::new(json!("q"), "t-1");
        let err = engine.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, OrkaError::Cancelled));
    }

    /// **Scenario**: parallel strategy runs the whole sequence from the same
    /// snapshot and merges all outputs (implicit join at end).
    #[tokio::test]
    async fn parallel_strategy_merges_all_outputs() {
        let engine = engine_for(
            r#"
orchestrator:
  id: wide
  strategy: parallel
  agents: [left, right]
agents:
  - id: left
    type: llm
    prompt: "L {{ input }}"
  - id: right
    type: llm
    prompt: "R {{ input }}"
"#,
            Arc::new(MockLlm::always("done")),
        );
        let mut ctx = Context::new(json!("q"), "t-1");
        let status = engine.run(&mut ctx).await.unwrap();
        assert_eq!(status, EngineStatus::Completed);
        assert!(ctx.output("left").is_some());
        assert!(ctx.output("right").is_some());
    }
}
