//! Run coordination: per-run assembly, lifecycle events, the final report.
//!
//! An [`Orchestrator`] owns a loaded graph plus the shared services (store,
//! providers, renderer, registry) and produces one [`RunReport`] per `run`
//! call. The report materializes even when the run fails; completed outputs
//! are never discarded.

mod report;

pub use report::{RunReport, RunStatus};

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::agent::{NodeRegistry, SharedDeps};
use crate::config::EnvConfig;
use crate::context::{Context, ErrorInfo};
use crate::engine::{Engine, EngineOptions, EngineStatus};
use crate::error::OrkaError;
use crate::graph::{self, WorkflowGraph};
use crate::memory::{preset, DecaySweeper, MemoryEntry, MemoryStore, RetentionPolicy};
use crate::template::TemplateRenderer;

/// Run-level knobs; node-level limits come from the workflow document.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Whole-run budget; breaching it cancels in-flight work.
    pub run_timeout: Option<Duration>,
    pub join_timeout: Duration,
    pub node_timeout: Duration,
    pub attempt_timeout: Duration,
    pub branch_pool_size: usize,
    /// Fail renders on undefined identifiers instead of substituting empty.
    pub strict_templates: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            run_timeout: None,
            join_timeout: Duration::from_secs(30),
            node_timeout: Duration::from_secs(120),
            attempt_timeout: Duration::from_secs(30),
            branch_pool_size: 8,
            strict_templates: false,
        }
    }
}

/// Assembles engines per run and owns the run lifecycle.
pub struct Orchestrator {
    graph: Arc<WorkflowGraph>,
    registry: Arc<NodeRegistry>,
    deps: SharedDeps,
    options: RunOptions,
    sweeper: Option<DecaySweeper>,
}

impl Orchestrator {
    /// Wires a loaded graph to explicit dependencies. The decay sweeper, if
    /// policy enables it, runs for the orchestrator's lifetime. Must be
    /// called within a Tokio runtime (the sweeper task spawns here).
    pub fn new(
        graph: WorkflowGraph,
        registry: Arc<NodeRegistry>,
        deps: SharedDeps,
        options: RunOptions,
    ) -> Self {
        let sweeper = Some(DecaySweeper::spawn(
            deps.memory.clone(),
            CancellationToken::new(),
        ));
        Self {
            graph: Arc::new(graph),
            registry,
            deps,
            options,
            sweeper,
        }
    }

    /// Loads a workflow from YAML and assembles everything from the process
    /// environment: backend, retention policy (graph preset and overrides
    /// applied), providers, renderer.
    pub fn from_env(yaml: &str, options: RunOptions) -> Result<Self, OrkaError> {
        let env = EnvConfig::from_env()?;
        Self::from_yaml(yaml, &env, options)
    }

    /// Same assembly with an explicit [`EnvConfig`] (tests, embedding).
    pub fn from_yaml(yaml: &str, env: &EnvConfig, options: RunOptions) -> Result<Self, OrkaError> {
        let registry = Arc::new(NodeRegistry::with_builtins());
        let graph = graph::load_str(yaml, &registry)?;

        let mut policy = graph
            .memory_preset
            .as_deref()
            .and_then(preset)
            .map(|p| p.write.retention_policy(env.decay_enabled))
            .unwrap_or_default();
        if let Some(overrides) = &graph.memory_overrides {
            overrides.apply_to_policy(&mut policy);
        }
        let memory = env.build_store(policy)?;

        let renderer = if options.strict_templates {
            TemplateRenderer::strict()
        } else {
            TemplateRenderer::new()
        };
        let deps = SharedDeps {
            memory,
            llm: env.build_llm(),
            search: env.build_search(),
            renderer: Arc::new(renderer),
        };
        Ok(Self::new(graph, registry, deps, options))
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.deps.memory
    }

    /// Executes one run to a report. Fatal errors (invalid graph, template
    /// failure, lost store, run timeout) fail the run; leaf failures surface
    /// per node under the `continue` policy.
    pub async fn run(&self, input: Value) -> RunReport {
        self.run_with_cancel(input, CancellationToken::new()).await
    }

    /// Same as [`run`](Self::run) with an external abort handle.
    pub async fn run_with_cancel(&self, input: Value, cancel: CancellationToken) -> RunReport {
        let trace_id = format!("run_{}", uuid::Uuid::new_v4().simple());
        let started = chrono::Utc::now();
        let mut ctx = Context::new(input, trace_id.clone());

        tracing::info!(trace_id = %trace_id, workflow = %self.graph.id, "run start");
        self.record_lifecycle(&ctx, "run_start").await;

        let engine_options = EngineOptions {
            join_timeout: self.options.join_timeout,
            node_timeout: self.options.node_timeout,
            attempt_timeout: self.options.attempt_timeout,
            branch_pool_size: self.options.branch_pool_size,
            cancel: cancel.clone(),
        };
        let result = match Engine::new(
            self.graph.clone(),
            self.registry.clone(),
            self.deps.clone(),
            engine_options,
        ) {
            Ok(engine) => match self.options.run_timeout {
                Some(budget) => match tokio::time::timeout(budget, engine.run(&mut ctx)).await {
                    Ok(inner) => inner,
                    Err(_) => {
                        cancel.cancel();
                        Err(OrkaError::Timeout(budget))
                    }
                },
                None => engine.run(&mut ctx).await,
            },
            Err(e) => Err(e),
        };

        let (status, error) = match result {
            Ok(EngineStatus::Completed) => (RunStatus::Success, None),
            Ok(EngineStatus::Aborted { node_id }) => (
                RunStatus::Failed,
                Some(ErrorInfo {
                    kind: crate::error::ErrorKind::AgentFailed,
                    message: format!("aborted by failing node '{}'", node_id),
                }),
            ),
            Err(e) => (RunStatus::Failed, Some(ErrorInfo::from_error(&e))),
        };

        self.record_lifecycle(&ctx, "run_end").await;
        tracing::info!(
            trace_id = %trace_id,
            status = ?status,
            nodes = ctx.previous_outputs.len(),
            "run end"
        );
        RunReport::from_context(&self.graph.id, &ctx, status, error, started)
    }

    async fn record_lifecycle(&self, ctx: &Context, event: &str) {
        let entry = MemoryEntry::log(
            format!("{}_logs", self.graph.id),
            json!({ "event": event, "workflow": self.graph.id }).to_string(),
        )
        .with_trace(&ctx.trace_id);
        if let Err(e) = self.deps.memory.append(entry).await {
            tracing::warn!(error = %e, event, "lifecycle entry not stored");
        }
    }

    /// Stops the background sweeper; runs already in flight are unaffected.
    pub async fn shutdown(mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.shutdown().await;
        }
    }
}

/// Builds a store straight from env config with the default retention policy
/// (CLI memory commands operate without a workflow).
pub fn store_from_env(env: &EnvConfig) -> Result<Arc<MemoryStore>, OrkaError> {
    env.build_store(RetentionPolicy::default())
}
