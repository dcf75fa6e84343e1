//! Agentic end-to-end test orchestrator CLI.
//!
//! `runner run <path>` loads scenarios, dispatches them through the router,
//! and prints/saves a `RunReport`. `runner validate <path>` loads and
//! validates without executing anything. Flag shape follows the teacher's
//! `Cli`/`Commands::Execute` clap-derive convention, generalized from a
//! single-file UTDL plan to a directory of scenario YAML files.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};

use orchestrator::config::RunnerLimits;
use orchestrator::context::VarContext;
use orchestrator::driver::{api::ApiDriver, cli::CliDriver, gui::GuiDriver, tui_driver::TuiDriver, websocket::WebSocketDriver, Agent};
use orchestrator::loader;
use orchestrator::model::{Interface, RunReport};
use orchestrator::process::{signals, ProcessLifecycleManager};
use orchestrator::pty::PtySessionManager;
use orchestrator::router::{self, AgentRegistry, RouterConfig};
use orchestrator::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "runner")]
#[command(about = "Agentic end-to-end test orchestrator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Loads and runs every scenario reachable from `path`.
    Run {
        path: PathBuf,

        #[arg(long)]
        max_parallel: Option<usize>,

        #[arg(long, default_value = "false")]
        fail_fast: bool,

        #[arg(long, default_value = "0")]
        retry_count: u32,

        #[arg(long, default_value = "false")]
        otel: bool,

        #[arg(long)]
        otel_endpoint: Option<String>,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(short, long, default_value = "false")]
        verbose: bool,
    },
    /// Loads and validates every scenario reachable from `path` without
    /// dispatching any of them.
    Validate {
        path: PathBuf,

        #[arg(long, default_value = "false")]
        strict: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run { path, max_parallel, fail_fast, retry_count, otel, otel_endpoint, output, verbose } => {
            let mut telemetry_config = TelemetryConfig::from_env();
            telemetry_config.log_level = if *verbose { Level::DEBUG } else { Level::INFO };
            if *otel {
                if let Some(endpoint) = otel_endpoint {
                    telemetry_config.otlp_endpoint = Some(endpoint.clone());
                } else if telemetry_config.otlp_endpoint.is_none() {
                    telemetry_config.otlp_endpoint = Some("http://localhost:4317".to_string());
                }
            }
            if let Err(e) = init_telemetry(telemetry_config) {
                eprintln!("Warning: failed to initialize telemetry: {e}");
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                    .try_init();
            }

            let exit_code = run_command(path, *max_parallel, *fail_fast, *retry_count, output).await;

            shutdown_telemetry();
            std::process::exit(exit_code);
        }
        Commands::Validate { path, strict } => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init();
            std::process::exit(validate_command(path, *strict));
        }
    }
}

/// Implements the process boundary documented in SPEC_FULL.md §6: 0 when
/// every scenario passed, 1 when one or more did not, 2 on a fatal
/// configuration error (e.g. the path can't be loaded at all).
async fn run_command(path: &PathBuf, max_parallel: Option<usize>, fail_fast: bool, retry_count: u32, output: &Option<PathBuf>) -> i32 {
    let limits = RunnerLimits::from_env();

    let report = match loader::load_scenarios(path, &limits, false) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "failed to load scenarios");
            return 2;
        }
    };
    for failure in &report.load_failures {
        error!(path = %failure.path.display(), message = %failure.message, "scenario failed to load");
    }
    if report.loaded.is_empty() {
        error!("no scenarios loaded");
        return 2;
    }
    info!(count = report.loaded.len(), failures = report.load_failures.len(), "scenarios loaded");

    let (plm, _process_events) = ProcessLifecycleManager::new();
    signals::install_global_hooks(plm.clone());
    let pty = PtySessionManager::new(plm.clone());

    let mut registry: AgentRegistry = AgentRegistry::new();
    registry.insert(Interface::Cli, Arc::new(CliDriver::new(plm.clone())) as Arc<dyn Agent>);
    registry.insert(Interface::Tui, Arc::new(TuiDriver::new(pty)) as Arc<dyn Agent>);
    registry.insert(Interface::Api, Arc::new(ApiDriver::new()) as Arc<dyn Agent>);
    registry.insert(Interface::Websocket, Arc::new(WebSocketDriver::new()) as Arc<dyn Agent>);
    registry.insert(Interface::Gui, Arc::new(GuiDriver::new()) as Arc<dyn Agent>);

    let config = RouterConfig {
        max_parallel: max_parallel.unwrap_or(limits.max_parallel),
        fail_fast,
        retry_count,
    };
    let cancel = CancellationToken::new();
    let started = chrono::Utc::now();

    let (results, mut events) = router::run(report.loaded, Arc::new(registry), VarContext::new(), config, cancel).await;
    while let Ok(event) = events.try_recv() {
        if let router::RouterEvent::Failure { scenario_id, message } = event {
            error!(scenario_id = %scenario_id, message = %message, "router-level failure");
        }
    }

    let run_report = RunReport::new(started, results);
    let all_passed = run_report.summary.failed == 0 && run_report.summary.errored == 0;
    info!(
        total = run_report.summary.total,
        passed = run_report.summary.passed,
        failed = run_report.summary.failed,
        errored = run_report.summary.errored,
        skipped = run_report.summary.skipped,
        "run finished"
    );

    let json = match serde_json::to_string_pretty(&run_report) {
        Ok(j) => j,
        Err(e) => {
            error!(error = %e, "failed to serialize run report");
            return 2;
        }
    };
    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, &json) {
                error!(error = %e, path = %path.display(), "failed to write report");
                return 2;
            }
        }
        None => println!("{json}"),
    }

    plm.shutdown(std::time::Duration::from_secs(5)).await;

    if all_passed {
        0
    } else {
        1
    }
}

fn validate_command(path: &PathBuf, strict: bool) -> i32 {
    let limits = RunnerLimits::from_env();
    let report = match loader::load_scenarios(path, &limits, strict) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("fatal: {e}");
            return 2;
        }
    };

    for failure in &report.load_failures {
        eprintln!("{}: {}", failure.path.display(), failure.message);
    }

    if report.is_clean() {
        println!("{} scenario(s) valid", report.loaded.len());
        0
    } else {
        eprintln!("{} scenario(s) failed validation", report.load_failures.len());
        1
    }
}
