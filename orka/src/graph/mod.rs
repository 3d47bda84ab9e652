//! Workflow graphs: document types, loader and one-pass validator.

mod loader;
mod spec;

pub use loader::{compile_embedded, load_file, load_spec, load_str, validate};
pub use spec::{FailurePolicy, NodeSpec, OrchestratorSpec, Strategy, WorkflowGraph, WorkflowSpec};
