//! Runtime error taxonomy.
//!
//! One enum covers the whole run lifecycle: graph load, prompt render, agent
//! execution, control flow and the memory subsystem. Callers that embed an
//! error into an [`crate::context::AgentOutput`] use [`OrkaError::kind`] to get
//! the wire-level descriptor without carrying the full error.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error raised anywhere in the orchestration runtime.
///
/// Agent-local failures are normally absorbed into `AgentOutput{status=failed}`
/// by the engine (`continue` policy); only graph, template, configuration and
/// store-unavailable errors abort a run. See the propagation rules in
/// [`crate::engine`].
#[derive(Debug, Error)]
pub enum OrkaError {
    /// Workflow description failed validation. All issues from one pass.
    #[error("invalid graph: {}", reasons.join("; "))]
    GraphInvalid { reasons: Vec<String> },

    /// Prompt rendering failed (undefined identifier under strict mode,
    /// unknown filter, malformed expression).
    #[error("template: {0}")]
    Template(String),

    /// Leaf agent failure (wraps the provider error message).
    #[error("agent failed: {0}")]
    AgentFailed(String),

    /// Per-attempt or node-budget timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Join barrier did not complete within the run's join timeout.
    #[error("join timed out waiting for fork group {0}")]
    JoinTimeout(String),

    /// Router decision value had no mapping and no default route.
    #[error("no route for decision value {0:?}")]
    RouteUnknown(String),

    /// Graph-scout found no candidate meeting the safety or budget gates.
    #[error("no viable path: {0}")]
    NoViablePath(String),

    /// Memory backend lost or unreachable.
    #[error("memory backend unavailable: {0}")]
    StoreUnavailable(String),

    /// Write deferred to the retry queue; the store keeps serving.
    #[error("memory store degraded: {0}")]
    StoreDegraded(String),

    /// Write dropped after exhausting the retry cap.
    #[error("memory write failed: {0}")]
    StoreWriteFailed(String),

    /// Startup configuration missing or malformed (env vars, provider keys).
    #[error("configuration: {0}")]
    Configuration(String),

    /// Cooperative cancellation (run abort, run timeout, abort-policy failure).
    #[error("cancelled")]
    Cancelled,
}

impl OrkaError {
    /// Wire-level kind for error descriptors in agent outputs and reports.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrkaError::GraphInvalid { .. } => ErrorKind::GraphInvalid,
            OrkaError::Template(_) => ErrorKind::TemplateError,
            OrkaError::AgentFailed(_) => ErrorKind::AgentFailed,
            OrkaError::Timeout(_) => ErrorKind::Timeout,
            OrkaError::JoinTimeout(_) => ErrorKind::JoinTimeout,
            OrkaError::RouteUnknown(_) => ErrorKind::RouteUnknown,
            OrkaError::NoViablePath(_) => ErrorKind::NoViablePath,
            OrkaError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            OrkaError::StoreDegraded(_) => ErrorKind::StoreDegraded,
            OrkaError::StoreWriteFailed(_) => ErrorKind::StoreWriteFailed,
            OrkaError::Configuration(_) => ErrorKind::Configuration,
            OrkaError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the error aborts the whole run regardless of node policy.
    ///
    /// Agent-level failures (`AgentFailed`, `Timeout`, `RouteUnknown`,
    /// `NoViablePath`, `JoinTimeout`, degraded writes) stay inside the node's
    /// output; everything else unwinds.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrkaError::GraphInvalid { .. }
                | OrkaError::Template(_)
                | OrkaError::StoreUnavailable(_)
                | OrkaError::Configuration(_)
                | OrkaError::Cancelled
        )
    }
}

/// Serializable error kind carried inside `AgentOutput.error` and run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    GraphInvalid,
    TemplateError,
    AgentFailed,
    Timeout,
    JoinTimeout,
    RouteUnknown,
    NoViablePath,
    StoreUnavailable,
    StoreDegraded,
    StoreWriteFailed,
    Configuration,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: GraphInvalid joins all accumulated reasons into one message.
    #[test]
    fn graph_invalid_display_joins_reasons() {
        let err = OrkaError::GraphInvalid {
            reasons: vec!["unknown type 'x'".into(), "router 'r' targets missing node".into()],
        };
        let s = err.to_string();
        assert!(s.contains("unknown type 'x'"), "{}", s);
        assert!(s.contains("router 'r' targets missing node"), "{}", s);
    }

    /// **Scenario**: kind() maps each variant to its wire-level descriptor.
    #[test]
    fn kind_matches_variant() {
        assert_eq!(
            OrkaError::RouteUnknown("yes".into()).kind(),
            ErrorKind::RouteUnknown
        );
        assert_eq!(
            OrkaError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(OrkaError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    /// **Scenario**: only graph/template/store-unavailable/config/cancel are fatal.
    #[test]
    fn fatality_split() {
        assert!(OrkaError::GraphInvalid { reasons: vec![] }.is_fatal());
        assert!(OrkaError::Template("x".into()).is_fatal());
        assert!(OrkaError::StoreUnavailable("gone".into()).is_fatal());
        assert!(!OrkaError::AgentFailed("api".into()).is_fatal());
        assert!(!OrkaError::JoinTimeout("g1".into()).is_fatal());
        assert!(!OrkaError::StoreDegraded("queued".into()).is_fatal());
    }

    /// **Scenario**: ErrorKind serializes snake_case for reports.
    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::JoinTimeout).unwrap();
        assert_eq!(json, "\"join_timeout\"");
    }
}
