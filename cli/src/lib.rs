//! Command implementations for the `orka` binary.
//!
//! Each command returns the process exit code: 0 success, 1 run failed,
//! 2 invalid configuration (bad graph, bad env). The binary in `main.rs`
//! only parses arguments and dispatches here.

use std::path::Path;
use std::time::Duration;

use serde_json::Value;

use orka::memory::MemoryStore;
use orka::run::store_from_env;
use orka::{EnvConfig, Orchestrator, OrkaError, RunOptions, RunStatus};

/// Exit code for a failed run.
pub const EXIT_RUN_FAILED: i32 = 1;
/// Exit code for invalid configuration or an invalid graph.
pub const EXIT_INVALID_CONFIG: i32 = 2;

fn configuration_exit(err: &OrkaError) -> i32 {
    match err {
        OrkaError::GraphInvalid { .. } | OrkaError::Configuration(_) => EXIT_INVALID_CONFIG,
        _ => EXIT_RUN_FAILED,
    }
}

/// `orka run <workflow> <input>`: executes the workflow and prints the JSON
/// run report on stdout.
pub async fn run_workflow(path: &Path, input: &str, options: RunOptions) -> i32 {
    let yaml = match std::fs::read_to_string(path) {
        Ok(yaml) => yaml,
        Err(e) => {
            eprintln!("error: cannot read {}: {}", path.display(), e);
            return EXIT_INVALID_CONFIG;
        }
    };
    let orchestrator = match Orchestrator::from_env(&yaml, options) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("error: {}", e);
            return configuration_exit(&e);
        }
    };

    // A payload that parses as JSON is passed structured; anything else is a
    // plain string.
    let payload: Value = serde_json::from_str(input)
        .unwrap_or_else(|_| Value::String(input.to_string()));
    let report = orchestrator.run(payload).await;
    match serde_json::to_string_pretty(&report) {
        Ok(rendered) => println!("{}", rendered),
        Err(e) => eprintln!("error: cannot render report: {}", e),
    }
    let code = match report.status {
        RunStatus::Success => 0,
        RunStatus::Failed => EXIT_RUN_FAILED,
    };
    orchestrator.shutdown().await;
    code
}

fn open_store() -> Result<std::sync::Arc<MemoryStore>, OrkaError> {
    // Memory commands never call a provider, so the lenient read skips the
    // API-key requirement.
    let env = EnvConfig::from_env_lenient()?;
    store_from_env(&env)
}

/// `orka memory stats`: counts by namespace, type and category plus health.
pub async fn memory_stats() -> i32 {
    let store = match open_store() {
        Ok(store) => store,
        Err(e) => {
            eprintln!("error: {}", e);
            return EXIT_INVALID_CONFIG;
        }
    };
    match store.stats().await {
        Ok(stats) => {
            println!("{}", serde_json::to_string_pretty(&stats).unwrap_or_default());
            0
        }
        Err(e) => {
            eprintln!("error: {}", e);
            EXIT_RUN_FAILED
        }
    }
}

/// `orka memory watch --interval <secs>`: prints stats on a cadence until
/// interrupted.
pub async fn memory_watch(interval_secs: u64) -> i32 {
    let store = match open_store() {
        Ok(store) => store,
        Err(e) => {
            eprintln!("error: {}", e);
            return EXIT_INVALID_CONFIG;
        }
    };
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        ticker.tick().await;
        match store.stats().await {
            Ok(stats) => {
                println!(
                    "[{}] total={} stored={} log={} short={} long={} degraded={}",
                    chrono::Utc::now().format("%H:%M:%S"),
                    stats.total,
                    stats.stored,
                    stats.log,
                    stats.short_term,
                    stats.long_term,
                    stats.degraded,
                );
            }
            Err(e) => {
                eprintln!("error: {}", e);
                return EXIT_RUN_FAILED;
            }
        }
    }
}

/// `orka memory cleanup [--dry-run]`: removes (or counts) expired entries.
pub async fn memory_cleanup(dry_run: bool) -> i32 {
    let store = match open_store() {
        Ok(store) => store,
        Err(e) => {
            eprintln!("error: {}", e);
            return EXIT_INVALID_CONFIG;
        }
    };
    match store.cleanup_expired(dry_run).await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
            0
        }
        Err(e) => {
            eprintln!("error: {}", e);
            EXIT_RUN_FAILED
        }
    }
}

/// `orka memory configure`: prints the resolved memory configuration.
pub async fn memory_configure() -> i32 {
    match EnvConfig::from_env_lenient() {
        Ok(env) => {
            println!("memory_url: {}", env.memory_url);
            println!("decay_enabled: {}", env.decay_enabled);
            println!(
                "short_term_hours: {}",
                env.short_term_hours
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| "(policy default)".into())
            );
            println!(
                "long_term_hours: {}",
                env.long_term_hours
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| "(policy default)".into())
            );
            println!(
                "check_interval_minutes: {}",
                env.check_interval_minutes
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "(policy default)".into())
            );
            println!("embedding_dimension: {}", env.embedding_dimension);
            println!("embedder_cache: {}", env.embedder_cache);
            0
        }
        Err(e) => {
            eprintln!("error: {}", e);
            EXIT_INVALID_CONFIG
        }
    }
}

/// `orka system status`: backend health and capability set.
pub async fn system_status() -> i32 {
    let store = match open_store() {
        Ok(store) => store,
        Err(e) => {
            eprintln!("error: {}", e);
            return EXIT_INVALID_CONFIG;
        }
    };
    let caps = store.capabilities();
    println!("backend: {}", caps.scheme);
    println!("persistent: {}", caps.persistent);
    println!("vectors: {}", caps.vectors);
    match store.ping().await {
        Ok(()) => {
            println!("health: ok");
            0
        }
        Err(e) => {
            println!("health: unavailable ({})", e);
            EXIT_RUN_FAILED
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: graph/config errors map to exit 2, the rest to exit 1.
    #[test]
    fn exit_code_mapping() {
        assert_eq!(
            configuration_exit(&OrkaError::GraphInvalid { reasons: vec![] }),
            EXIT_INVALID_CONFIG
        );
        assert_eq!(
            configuration_exit(&OrkaError::Configuration("x".into())),
            EXIT_INVALID_CONFIG
        );
        assert_eq!(
            configuration_exit(&OrkaError::AgentFailed("x".into())),
            EXIT_RUN_FAILED
        );
    }

    /// **Scenario**: running a workflow file end-to-end with the mock
    /// provider exits 0 and a missing file exits 2.
    #[tokio::test]
    async fn run_workflow_exit_codes() {
        std::env::set_var("ORKA_LLM_PROVIDER", "mock");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wf.yml");
        std::fs::write(
            &path,
            "orchestrator:\n  id: qa\n  agents: [answer]\nagents:\n  - id: answer\n    type: llm\n    prompt: \"A: {{ input }}\"\n",
        )
        .unwrap();
        let code = run_workflow(&path, "2+2?", RunOptions::default()).await;
        assert_eq!(code, 0);

        let code = run_workflow(dir.path().join("missing.yml").as_path(), "x", RunOptions::default()).await;
        assert_eq!(code, EXIT_INVALID_CONFIG);
        std::env::remove_var("ORKA_LLM_PROVIDER");
    }
}
