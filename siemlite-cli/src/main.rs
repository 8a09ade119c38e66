//! siemlite -- authentication log SIEM command-line tool.
//!
//! Loads the log source configuration, initialises logging from its
//! `general` section and dispatches to the subcommand handler. Errors are
//! printed once and mapped to an exit code by [`CliError::exit_code`].

mod cli;
mod commands;
mod error;
mod logging;
mod output;

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;

use siemlite_core::config::{GeneralConfig, SiemConfig};

use crate::cli::{Cli, Commands};
use crate::error::CliError;
use crate::output::OutputWriter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut general = logging_settings(&cli.config).await;
    if let Some(level) = &cli.log_level {
        general.log_level.clone_from(level);
    }
    if let Err(e) = logging::init_tracing(&general) {
        eprintln!("warning: {e}");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            use colored::Colorize;

            eprintln!("{} {e}", "error:".red().bold());
            exit_code(&e)
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let writer = OutputWriter::new(cli.output);

    match cli.command {
        Commands::Verify(args) => commands::verify::execute(args, &cli.config, &writer).await,
        Commands::Run(args) => commands::run::execute(args, &cli.config, &writer).await,
        Commands::Replay(args) => commands::replay::execute(args, &cli.config, &writer).await,
        Commands::ValidateEvents(args) => commands::validate_events::execute(args, &writer).await,
        Commands::Config(args) => commands::config::execute(args, &cli.config, &writer).await,
    }
}

/// Logging settings from the configuration, or defaults when it cannot be
/// loaded. The command itself reports the load error.
async fn logging_settings(path: &Path) -> GeneralConfig {
    SiemConfig::from_file(path)
        .await
        .map(|mut config| {
            config.apply_env_overrides();
            config.general
        })
        .unwrap_or_default()
}

fn exit_code(err: &CliError) -> ExitCode {
    u8::try_from(err.exit_code()).map_or(ExitCode::FAILURE, ExitCode::from)
}
