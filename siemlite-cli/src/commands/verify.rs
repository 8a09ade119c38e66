//! `siemlite verify` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use siemlite_core::config::SiemConfig;
use siemlite_log_pipeline::collector::preflight::Diagnostic;
use siemlite_log_pipeline::{PreflightOptions, PreflightReport, run_preflight};

use crate::cli::VerifyArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `verify` command.
///
/// A configuration that cannot be loaded is reported as a single `[FATAL]`
/// diagnostic so the output shape is the same as a failed source check.
pub async fn execute(
    args: VerifyArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    info!(path = %config_path.display(), "verifying log sources");

    let config = match SiemConfig::load(config_path).await {
        Ok(config) => config,
        Err(e) => {
            let err = CliError::from(e);
            let report = VerifyReport {
                config: config_path.display().to_string(),
                passed: false,
                report: PreflightReport {
                    diagnostics: vec![Diagnostic::Fatal(err.to_string())],
                    sources: Vec::new(),
                },
            };
            writer.render(&report)?;
            return Err(err);
        }
    };

    let options = PreflightOptions {
        only: args.source,
        preview_lines: args
            .preview_lines
            .unwrap_or(config.pipeline.preview_lines),
    };
    let preflight = run_preflight(&config, &options).await;

    let report = VerifyReport {
        config: config_path.display().to_string(),
        passed: preflight.passed(),
        report: preflight,
    };
    writer.render(&report)?;

    match report.report.fatal() {
        Some(message) => Err(CliError::Preflight(message.to_owned())),
        None => Ok(()),
    }
}

/// Result of a `verify` run.
#[derive(Serialize)]
pub struct VerifyReport {
    /// Configuration file path
    pub config: String,
    /// `true` when no fatal diagnostic was raised
    pub passed: bool,
    /// Diagnostics and per-source details
    #[serde(flatten)]
    pub report: PreflightReport,
}

impl Render for VerifyReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        for diagnostic in &self.report.diagnostics {
            match diagnostic {
                Diagnostic::Info(m) => writeln!(w, "{} {m}", "[INFO]".green())?,
                Diagnostic::Warn(m) => writeln!(w, "{} {m}", "[WARN]".yellow())?,
                Diagnostic::Fatal(m) => writeln!(w, "{} {m}", "[FATAL]".red().bold())?,
                Diagnostic::Preview(m) => writeln!(w, "    {}", m.dimmed())?,
            }
        }
        Ok(())
    }
}
