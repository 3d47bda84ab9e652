//! OrKa CLI binary.
//!
//! Subcommands: `run` (execute a workflow), `memory` (stats/watch/cleanup/
//! configure), `system` (status). Loads `.env` first (existing environment
//! wins) and initializes tracing from `RUST_LOG`.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use orka::RunOptions;

#[derive(Parser, Debug)]
#[command(name = "orka")]
#[command(about = "OrKa — declarative AI-agent orchestration")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a workflow file against an input payload
    Run {
        /// Path to the workflow YAML
        workflow: PathBuf,
        /// Input payload (JSON or plain text)
        input: String,
        /// Whole-run timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<f64>,
        /// Fail prompt rendering on undefined identifiers
        #[arg(long)]
        strict_templates: bool,
    },
    /// Inspect and maintain the memory store
    Memory {
        #[command(subcommand)]
        cmd: MemoryCommand,
    },
    /// Runtime and backend health
    System {
        #[command(subcommand)]
        cmd: SystemCommand,
    },
}

#[derive(Subcommand, Debug)]
enum MemoryCommand {
    /// Counts by namespace, type and category
    Stats,
    /// Print stats on an interval until interrupted
    Watch {
        #[arg(long, default_value_t = 5, value_name = "SECS")]
        interval: u64,
    },
    /// Remove expired entries
    Cleanup {
        /// Only count what would be removed
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the resolved memory configuration
    Configure,
}

#[derive(Subcommand, Debug)]
enum SystemCommand {
    /// Backend health and capability set
    Status,
}

#[tokio::main]
async fn main() {
    // Existing environment wins over .env.
    let _ = dotenv::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let code = match args.cmd {
        Command::Run {
            workflow,
            input,
            timeout,
            strict_templates,
        } => {
            let options = RunOptions {
                run_timeout: timeout.map(Duration::from_secs_f64),
                strict_templates,
                ..RunOptions::default()
            };
            cli::run_workflow(&workflow, &input, options).await
        }
        Command::Memory { cmd } => match cmd {
            MemoryCommand::Stats => cli::memory_stats().await,
            MemoryCommand::Watch { interval } => cli::memory_watch(interval).await,
            MemoryCommand::Cleanup { dry_run } => cli::memory_cleanup(dry_run).await,
            MemoryCommand::Configure => cli::memory_configure().await,
        },
        Command::System { cmd } => match cmd {
            SystemCommand::Status => cli::system_status().await,
        },
    };
    std::process::exit(code);
}
