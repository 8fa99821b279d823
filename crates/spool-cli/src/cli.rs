use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use spool_core::app::{QueueConfig, RetryMode};

/// In-process job queue with retries.
#[derive(Debug, Parser)]
#[command(name = "spool", version, about)]
pub struct CliArgs {
    /// Path to a TOML config file.
    #[arg(long, short, env = "SPOOL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Number of dispatch loops.
    #[arg(long, env = "SPOOL_DISPATCHERS", global = true)]
    pub dispatchers: Option<usize>,

    /// Maximum concurrently executing tasks.
    #[arg(long, global = true)]
    pub max_in_flight: Option<usize>,

    /// How failed tasks are re-queued.
    #[arg(long, value_enum, global = true)]
    pub retry_mode: Option<RetryModeArg>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Enqueue one task per type, run them on simulated workers and print the result.
    Demo(DemoArgs),
    /// Print the effective configuration as TOML.
    Config,
}

#[derive(Debug, Args)]
pub struct DemoArgs {
    /// Task types to enqueue, comma separated.
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "email,report,data-cleanup,sms,newsletter,fail,fail-absolute"
    )]
    pub types: Vec<String>,

    /// maxRetries for every task (config default otherwise).
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Multiplier applied to simulated work durations.
    #[arg(long, default_value_t = 0.1)]
    pub scale: f64,

    /// Delete the first task once it is running.
    #[arg(long)]
    pub delete_first: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RetryModeArg {
    Immediate,
    Backoff,
}

impl From<RetryModeArg> for RetryMode {
    fn from(arg: RetryModeArg) -> Self {
        match arg {
            RetryModeArg::Immediate => RetryMode::Immediate,
            RetryModeArg::Backoff => RetryMode::Backoff,
        }
    }
}

impl CliArgs {
    /// Flags win over file values.
    pub fn apply(&self, config: &mut QueueConfig) {
        if let Some(n) = self.dispatchers {
            config.dispatchers = n;
        }
        if let Some(n) = self.max_in_flight {
            config.max_in_flight = n;
        }
        if let Some(mode) = self.retry_mode {
            config.retry.mode = mode.into();
        }
    }
}
