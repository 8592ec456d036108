//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{AppConfig, Mode};
use crate::models::Granularity;
use crate::worker::UnreachablePolicy;

/// Distributed test execution: every test runs exactly once across a fleet
#[derive(Parser, Debug)]
#[command(name = "testfleet")]
#[command(author = "hephaex@gmail.com")]
#[command(version = "0.1.0")]
#[command(about = "Run one test suite on many processes, executing every test exactly once")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (YAML or JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Process role (disabled, coordinator, worker)
    #[arg(long, global = true)]
    pub mode: Option<String>,

    /// Execution id shared by all workers of one run
    #[arg(short, long, global = true)]
    pub execution_id: Option<String>,

    /// Identifier of this worker
    #[arg(long, global = true)]
    pub runner_id: Option<String>,

    /// Redis URL, redis://[user:pass@]host[:port][/db]
    #[arg(long, global = true)]
    pub redis: Option<String>,

    /// Coordinator address (host:port or URL)
    #[arg(long, global = true)]
    pub coordinator: Option<String>,

    /// Work item granularity (test, suite)
    #[arg(short, long, global = true)]
    pub granularity: Option<String>,

    /// Ownership record lifetime in seconds
    #[arg(long, global = true)]
    pub expiration: Option<u64>,

    /// What to do when the registry is unreachable (skip, fail)
    #[arg(long, global = true)]
    pub on_unreachable: Option<String>,
}

impl Args {
    /// Apply command line overrides on top of the resolved configuration
    pub fn apply_to(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(mode) = &self.mode {
            config.mode = Mode::from_str(mode).ok_or_else(|| {
                anyhow::anyhow!("Invalid --mode {mode:?} (disabled, coordinator, worker)")
            })?;
        }
        if let Some(execution_id) = &self.execution_id {
            config.execution_id = Some(execution_id.clone());
        }
        if let Some(runner_id) = &self.runner_id {
            config.runner_id = Some(runner_id.clone());
        }
        if let Some(redis) = &self.redis {
            config.redis = Some(redis.clone());
        }
        if let Some(coordinator) = &self.coordinator {
            config.coordinator = Some(coordinator.clone());
        }
        if let Some(granularity) = &self.granularity {
            config.granularity = Granularity::from_str(granularity);
        }
        if let Some(secs) = self.expiration {
            if secs == 0 {
                anyhow::bail!("--expiration must be greater than zero");
            }
            config.expiration_secs = secs;
        }
        if let Some(policy) = &self.on_unreachable {
            config.on_unreachable = UnreachablePolicy::from_str(policy);
        }
        if self.verbose {
            config.verbose = true;
        }
        if let Command::Coordinator(CoordinatorArgs { bind: Some(bind) }) = &self.command {
            config.bind = bind.clone();
        }
        Ok(())
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the ownership registry to workers over HTTP
    Coordinator(CoordinatorArgs),

    /// Run a test plan, claiming each unit before running it
    Run(RunArgs),

    /// List the units of a test plan and their work keys
    List(ListArgs),

    /// Aggregate stored results into per-execution reports
    Report(ReportArgs),

    /// Claim one unit (exit code 0 = run it, 2 = skip it)
    Claim(ClaimArgs),

    /// Report the terminal status of a claimed unit
    Complete(CompleteArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for coordinator command
#[derive(Parser, Debug)]
pub struct CoordinatorArgs {
    /// Listen address (default 0.0.0.0:8787)
    #[arg(short, long)]
    pub bind: Option<String>,
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Test plan file (YAML)
    #[arg(short, long)]
    pub plan: PathBuf,

    /// Number of work items run concurrently
    #[arg(short, long, default_value = "4")]
    pub jobs: usize,

    /// Shell used to run test commands
    #[arg(long, default_value = "sh")]
    pub shell: String,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Test plan file (YAML)
    #[arg(short, long)]
    pub plan: PathBuf,

    /// Show commands and timeouts
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for report command
#[derive(Parser, Debug)]
pub struct ReportArgs {
    /// Only this execution (default: all stored executions)
    #[arg(long)]
    pub execution: Option<String>,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Export to file (json or csv by extension)
    #[arg(long)]
    pub export: Option<String>,
}

/// Arguments for claim command
#[derive(Parser, Debug)]
pub struct ClaimArgs {
    /// Suite titles followed by the test title
    #[arg(short, long, num_args = 1.., required = true)]
    pub path: Vec<String>,
}

/// Arguments for complete command
#[derive(Parser, Debug)]
pub struct CompleteArgs {
    /// Suite titles followed by the test title
    #[arg(short, long, num_args = 1.., required = true)]
    pub path: Vec<String>,

    /// Terminal status (success, failed)
    #[arg(short, long)]
    pub status: String,

    /// Unit duration in milliseconds, stored with the result
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Failure message stored with the result
    #[arg(long)]
    pub message: Option<String>,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the resolved configuration
    Show {
        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Show environment variables
    Env,

    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "./testfleet.yaml")]
        output: String,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
