//! Structured run report.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::context::{AgentOutput, Context, ErrorInfo, Metrics, OutputStatus};

/// How the run ended. Node-level failures under the `continue` policy do not
/// fail the run; they are visible per node in `outputs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// A fatal error, an abort-policy failure, or a run-level timeout.
    Failed,
}

/// The caller-facing result of one run. Materializes even when the run
/// failed, carrying every completed output.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub trace_id: String,
    pub workflow_id: String,
    pub status: RunStatus,
    /// Per-node outputs as recorded in the context.
    pub outputs: HashMap<String, AgentOutput>,
    /// Aggregate tokens, latency, retries and cost across all outputs.
    pub metrics: Metrics,
    /// The last executed non-skipped node's result.
    pub final_result: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
}

impl RunReport {
    /// Aggregates metrics and the final result from a finished context.
    pub fn from_context(
        workflow_id: &str,
        ctx: &Context,
        status: RunStatus,
        error: Option<ErrorInfo>,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        let finished = chrono::Utc::now();
        let mut metrics = Metrics::default();
        for output in ctx.previous_outputs.values() {
            metrics.absorb(&output.metrics);
        }
        let final_result = ctx
            .executed
            .iter()
            .rev()
            .filter_map(|id| ctx.output(id))
            .find(|out| out.status != OutputStatus::Skipped)
            .map(|out| out.result.clone())
            .unwrap_or(Value::Null);
        Self {
            trace_id: ctx.trace_id.clone(),
            workflow_id: workflow_id.to_string(),
            status,
            outputs: ctx.previous_outputs.clone(),
            metrics,
            final_result,
            error,
            started_at: started_at.to_rfc3339(),
            finished_at: finished.to_rfc3339(),
            duration_ms: (finished - started_at).num_milliseconds().max(0) as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Scenario**: the report aggregates metrics and picks the last
    /// executed non-skipped result.
    #[test]
    fn aggregates_and_final_result() {
        let mut ctx = Context::new(json!("q"), "t-1");
        let mut first = AgentOutput::success(json!("one"));
        first.metrics.tokens = 10;
        first.metrics.cost = 0.1;
        ctx.insert_output("first", first);
        ctx.executed.push("first".into());
        let mut second = AgentOutput::skipped();
        second.metrics.tokens = 1;
        ctx.insert_output("second", second);
        ctx.executed.push("second".into());

        let report = RunReport::from_context(
            "wf",
            &ctx,
            RunStatus::Success,
            None,
            chrono::Utc::now(),
        );
        assert_eq!(report.metrics.tokens, 11);
        assert_eq!(report.final_result, json!("one"));
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.outputs.len(), 2);
    }

    /// **Scenario**: a failed run still materializes outputs and the error.
    #[test]
    fn failed_run_keeps_outputs() {
        let mut ctx = Context::new(json!("q"), "t-1");
        ctx.insert_output("done", AgentOutput::success(json!("kept")));
        ctx.executed.push("done".into());
        let report = RunReport::from_context(
            "wf",
            &ctx,
            RunStatus::Failed,
            Some(ErrorInfo {
                kind: crate::error::ErrorKind::Timeout,
                message: "run timed out".into(),
            }),
            chrono::Utc::now(),
        );
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.outputs["done"].result, json!("kept"));
        assert!(report.error.is_some());
    }
}
