//! # OrKa
//!
//! A declarative AI-agent orchestration runtime. Workflows are YAML graphs of
//! agents (LLM calls, classifiers, web searches) and control-flow nodes
//! (router, fork/join, loop, failover, graph-scout); the runtime executes the
//! graph against a per-run [`Context`], persists every event and agent output
//! to a vector-indexed memory store, and returns a structured [`RunReport`].
//!
//! ## Design principles
//!
//! - **Single writer**: only the engine mutates the run context; nodes
//!   receive snapshots and return an [`AgentOutput`] envelope.
//! - **Uniform contract**: every vertex — leaf agent or control-flow node —
//!   implements [`Node`]; the registry instantiates them by type tag.
//! - **Branch isolation**: fork branches execute on contexts snapshotted at
//!   fork time and merge at the join barrier, so concurrent branches never
//!   observe each other.
//! - **Injected policy**: the memory store takes its [`RetentionPolicy`] at
//!   construction; there are no process globals.
//!
//! ## Main modules
//!
//! - [`graph`]: workflow document types, loader and one-pass validator.
//! - [`engine`]: queue-driven execution, fork groups, timeouts, cancellation.
//! - [`agent`]: the [`Node`] contract, registry and builtin leaf agents.
//! - [`nodes`]: router, fork, join, failover, loop, graph-scout, memory node.
//! - [`memory`]: entries, backends (`memory://`, `sqlite://`), hybrid-search
//!   store, TTL decay, presets, embedders.
//! - [`template`]: prompt rendering with dot paths and a filter registry.
//! - [`providers`]: LLM and search provider traits, mocks, OpenAI client.
//! - [`run`]: the [`Orchestrator`] coordinator and [`RunReport`].
//! - [`config`]: environment-driven runtime configuration.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use orka::{Orchestrator, RunOptions};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), orka::OrkaError> {
//! let workflow = r#"
//! orchestrator:
//!   id: qa
//!   strategy: sequential
//!   agents: [answer]
//!   memory_preset: episodic
//! agents:
//!   - id: answer
//!     type: llm
//!     prompt: "Answer concisely: {{ input }}"
//! "#;
//!
//! let orchestrator = Orchestrator::from_env(workflow, RunOptions::default())?;
//! let report = orchestrator.run(serde_json::json!("What is 2+2?")).await;
//! println!("{}", serde_json::to_string_pretty(&report).unwrap());
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod graph;
pub mod memory;
pub mod nodes;
pub mod providers;
pub mod run;
pub mod template;

pub use agent::{Flow, Node, NodeDescriptor, NodeOutcome, NodeRegistry, SharedDeps};
pub use config::{EmbedderKind, EnvConfig, LlmProviderKind};
pub use context::{AgentOutput, Context, Metrics, OutputStatus, PastLoop};
pub use engine::{Engine, EngineOptions, EngineStatus};
pub use error::{ErrorKind, OrkaError};
pub use graph::{Strategy, WorkflowGraph, WorkflowSpec};
pub use memory::{
    MemoryCategory, MemoryEntry, MemoryStore, MemoryType, RetentionPolicy, SearchParams,
};
pub use providers::{LlmProvider, MockLlm, MockSearch, SearchProvider};
pub use run::{Orchestrator, RunOptions, RunReport, RunStatus};
pub use template::TemplateRenderer;
