//! testfleet - Distributed Test Execution CLI
//!
//! Runs one test suite on many processes so that every test executes
//! exactly once across the fleet.
//!
//! ## Usage
//!
//! ```bash
//! # Serve the registry (in memory, or backed by Redis with --redis)
//! testfleet coordinator --bind 0.0.0.0:8787
//!
//! # Run a plan on every machine of the fleet
//! export TESTFLEET_COORDINATOR=coordinator:8787
//! export TESTFLEET_EXECUTION_ID=build-1234
//! testfleet run --plan tests.yaml
//!
//! # Shell fleets: claim and complete single units
//! testfleet claim --path "Checkout" "pays by card" && ./run-test.sh
//! testfleet complete --path "Checkout" "pays by card" --status success
//!
//! # Aggregated report
//! testfleet report --format summary
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use testfleet::cli::{self, Args};
use testfleet::config::{self, AppConfig, ConfigFile, EnvConfig, Mode, ENV_PREFIX};
use testfleet::coordinator::Coordinator;
use testfleet::host::{PlanExecutor, TestPlan};
use testfleet::models::{ExecutionId, TerminalStatus, TestError, TestResult, WorkItemKey};
use testfleet::output::{OutputFormat, ResultFormatter};
use testfleet::registry::{Backend, BackendTarget};
use testfleet::results::{aggregate_all, export_reports, ExportFormat};
use testfleet::utils::{epoch_ms, init_logger, LogLevel};
use testfleet::worker::{Decision, Interceptor, PassthroughInterceptor, WorkerAgent};

/// Exit code of `claim` when another worker owns the unit
const EXIT_SKIP: i32 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::resolve(args.config.as_deref())?;
    args.apply_to(&mut config)?;

    init_logger(LogLevel::from_verbose(config.verbose));

    match args.command {
        cli::Command::Coordinator(_) => {
            run_coordinator(config).await?;
        }
        cli::Command::Run(run_args) => {
            run_plan(config, run_args).await?;
        }
        cli::Command::List(list_args) => {
            list_plan(&config, list_args)?;
        }
        cli::Command::Report(report_args) => {
            show_report(&config, report_args).await?;
        }
        cli::Command::Claim(claim_args) => {
            claim_unit(config, claim_args).await?;
        }
        cli::Command::Complete(complete_args) => {
            complete_unit(config, complete_args).await?;
        }
        cli::Command::Config(config_args) => {
            manage_config(&config, config_args)?;
        }
    }

    Ok(())
}

fn print_banner(config: &AppConfig) {
    if config.verbose {
        eprint!("{}", config.banner());
    }
}

async fn run_coordinator(config: AppConfig) -> Result<()> {
    print_banner(&config);

    let execution = config
        .execution()
        .unwrap_or_else(|| ExecutionId::new("default"));

    let coordinator = match config.redis.as_deref().filter(|url| !url.trim().is_empty()) {
        Some(url) => {
            let backend = Backend::connect(
                BackendTarget::Redis(url.to_string()),
                config.request_timeout(),
            )?;
            info!("Coordinator storing ownership in {}", config::mask_credentials(url));
            Coordinator::with_backend(backend, execution).with_ttl(config.ttl())
        }
        None => Coordinator::in_memory(execution, config.ttl()),
    };

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind coordinator to {}", config.bind))?;

    coordinator
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
}

fn worker_agent(config: &mut AppConfig) -> Result<WorkerAgent> {
    let owner = config.ensure_runner_id();
    let (execution, target) = config.worker_settings()?;
    print_banner(config);

    let backend = Backend::connect(target, config.request_timeout())?;
    Ok(WorkerAgent::new(&backend, execution, owner)
        .with_granularity(config.granularity)
        .with_ttl(config.ttl())
        .with_policy(config.on_unreachable))
}

async fn run_plan(mut config: AppConfig, args: cli::RunArgs) -> Result<()> {
    let plan = TestPlan::load(&args.plan)
        .with_context(|| format!("Failed to load plan: {}", args.plan.display()))?;
    let tests = plan.collect()?;

    let interceptor: Arc<dyn Interceptor> = match config.mode {
        Mode::Disabled => {
            info!("Coordination disabled, running every test locally");
            Arc::new(PassthroughInterceptor::new(config.granularity))
        }
        Mode::Worker => Arc::new(worker_agent(&mut config)?),
        Mode::Coordinator => {
            anyhow::bail!(
                "Mode is coordinator; use `testfleet coordinator` or set {ENV_PREFIX}_MODE=worker"
            )
        }
    };

    let formatter =
        ResultFormatter::new(OutputFormat::from_str(&args.format).unwrap_or(OutputFormat::Table));

    let summary = PlanExecutor::new(interceptor, config.granularity)
        .with_jobs(args.jobs)
        .with_shell(args.shell)
        .run(tests)
        .await;

    println!("{}", formatter.format_local(&summary));

    if !summary.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn list_plan(config: &AppConfig, args: cli::ListArgs) -> Result<()> {
    let plan = TestPlan::load(&args.plan)
        .with_context(|| format!("Failed to load plan: {}", args.plan.display()))?;
    let tests = plan.collect()?;

    println!("Units ({} granularity):", config.granularity);
    println!("{:-<70}", "");
    for test in &tests {
        let key = WorkItemKey::derive(test.path.as_slice(), config.granularity)?;
        println!("  {:40} {}", test.path.join(" > "), key);
        if args.detailed {
            println!("    run:     {}", test.command);
            if let Some(timeout) = test.timeout {
                println!("    timeout: {}s", timeout.as_secs());
            }
            if test.retries > 0 {
                println!("    retries: {}", test.retries);
            }
        }
    }
    println!();
    println!("Total: {} tests", tests.len());
    Ok(())
}

async fn show_report(config: &AppConfig, args: cli::ReportArgs) -> Result<()> {
    let target = config.backend_target().ok_or_else(|| {
        anyhow::anyhow!("Report needs a registry: set {ENV_PREFIX}_REDIS or {ENV_PREFIX}_COORDINATOR")
    })?;
    let backend = Backend::connect(target, config.request_timeout())?;

    let mut reports = aggregate_all(
        backend
            .results
            .load_results()
            .await
            .context("Failed to load results")?,
    );
    if let Some(execution) = &args.execution {
        reports.retain(|r| r.execution_id.as_str() == execution);
    }

    if reports.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    let formatter =
        ResultFormatter::new(OutputFormat::from_str(&args.format).unwrap_or(OutputFormat::Table));
    println!("{}", formatter.format_reports(&reports));

    if let Some(export) = &args.export {
        let path = Path::new(export);
        export_reports(&reports, path, ExportFormat::from_path(path))?;
        println!("✓ Report exported to: {export}");
    }

    Ok(())
}

async fn claim_unit(mut config: AppConfig, args: cli::ClaimArgs) -> Result<()> {
    let agent = worker_agent(&mut config)?;

    match agent.claim(&args.path).await? {
        Decision::Run { key, retry_count } => {
            println!("run {key} (retries {retry_count})");
        }
        Decision::Skip { key, reason } => {
            println!("skip {key}: {reason}");
            std::process::exit(EXIT_SKIP);
        }
        Decision::Fail { key, reason } => {
            anyhow::bail!("Cannot claim {key}: {reason}");
        }
    }
    Ok(())
}

async fn complete_unit(mut config: AppConfig, args: cli::CompleteArgs) -> Result<()> {
    let agent = worker_agent(&mut config)?;

    let result = match TerminalStatus::from_str(&args.status) {
        TerminalStatus::Success => TestResult::passed(args.path.clone(), args.duration),
        TerminalStatus::Failed => TestResult::failed(
            args.path.clone(),
            args.duration,
            TestError::new(args.message.unwrap_or_else(|| "failed".to_string())),
        ),
    };
    let end_time = epoch_ms();
    let result = result.with_times(end_time - args.duration as i64, end_time);

    match agent.complete(&result).await? {
        Some(record) => {
            println!("{} {}", args.path.join(" > "), record.status);
            Ok(())
        }
        None => anyhow::bail!(
            "{} is owned by another worker; result discarded",
            args.path.join(" > ")
        ),
    }
}

fn manage_config(config: &AppConfig, args: cli::ConfigArgs) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { output, force } => {
            let path = Path::new(&output);
            if path.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {output}. Use --force to overwrite."
                );
            }

            ConfigFile::example().save(path)?;
            println!("✓ Configuration file created: {output}");
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show { format } => {
            let mut resolved = ConfigFile {
                app: config.clone(),
                ..ConfigFile::default()
            };
            if let Some(redis) = resolved.app.redis.as_deref() {
                resolved.app.redis = Some(config::mask_credentials(redis));
            }
            let output = if format == "json" {
                serde_json::to_string_pretty(&resolved)?
            } else {
                serde_yaml::to_string(&resolved)?
            };
            println!("{output}");
        }

        cli::ConfigAction::Env => {
            EnvConfig::load().print_summary();
            println!();
            config::print_env_help();
        }
    }

    Ok(())
}
