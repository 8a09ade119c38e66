//! CLI argument parsing using clap derive API
//!
//! Purely declarative: no side effects or I/O happen here.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use siemlite_core::config::DEFAULT_CONFIG_PATH;

/// siemlite -- authentication log SIEM.
///
/// Use `siemlite <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "siemlite", version, about, long_about = None)]
pub struct Cli {
    /// Path to the log source configuration (YAML or TOML).
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check that every configured log source is readable and preview it.
    Verify(VerifyArgs),

    /// Tail the configured sources and emit events and findings until Ctrl-C.
    Run(RunArgs),

    /// Run a static log file through parse, validate and detect.
    Replay(ReplayArgs),

    /// Check a JSON lines file of event records against the record schema.
    ValidateEvents(ValidateEventsArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- verify ----

/// Preflight the configured log sources.
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Only check this source (treated as required).
    #[arg(short, long)]
    pub source: Option<String>,

    /// Number of preview lines per source (default: pipeline.preview_lines).
    #[arg(long)]
    pub preview_lines: Option<usize>,
}

// ---- run ----

/// Run the live pipeline.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Read existing file content instead of starting at the end.
    #[arg(long)]
    pub from_beginning: bool,

    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    pub duration_secs: Option<u64>,

    /// Seconds between health checks.
    #[arg(long, default_value_t = 30)]
    pub health_interval_secs: u64,
}

// ---- replay ----

/// Replay a log file offline.
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Log file to replay.
    pub file: PathBuf,

    /// Parser to use for every line (auth_log, json).
    #[arg(short = 't', long, default_value = "auth_log")]
    pub source_type: String,

    /// Print findings only (events are still detected, but not printed).
    #[arg(long)]
    pub findings_only: bool,
}

// ---- validate-events ----

/// Validate wire-format event records.
#[derive(Args, Debug)]
pub struct ValidateEventsArgs {
    /// JSON lines file, one event record per line.
    pub file: PathBuf,
}

// ---- config ----

/// Manage siemlite configuration.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only a specific section
        /// (general, required_sources, log_sources, pipeline, detectors, sink).
        #[arg(long)]
        section: Option<String>,
    },
}
