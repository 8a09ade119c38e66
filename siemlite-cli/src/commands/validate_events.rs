//! `siemlite validate-events` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use siemlite_core::validate::Validator;

use crate::cli::ValidateEventsArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `validate-events` command.
///
/// Blank lines are skipped. Sink output wrapped as `{"kind": "event",
/// "data": {...}}` is unwrapped first; `finding` lines are counted but not
/// validated.
pub async fn execute(args: ValidateEventsArgs, writer: &OutputWriter) -> Result<(), CliError> {
    info!(file = %args.file.display(), "validating event records");

    let report = validate_file(&args.file).await?;
    writer.render(&report)?;

    if report.invalid.is_empty() {
        Ok(())
    } else {
        Err(CliError::InvalidEvents {
            invalid: report.invalid.len(),
            total: report.total,
        })
    }
}

/// Validates every line of a JSON lines file.
pub async fn validate_file(path: &Path) -> Result<EventValidationReport, CliError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| CliError::Command(format!("cannot open {}: {e}", path.display())))?;
    let mut lines = BufReader::new(file).lines();

    let mut report = EventValidationReport {
        file: path.display().to_string(),
        ..EventValidationReport::default()
    };
    let mut line_no = 0;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match check_line(trimmed) {
            LineCheck::Valid => {
                report.total += 1;
                report.valid += 1;
            }
            LineCheck::Skipped => report.skipped += 1,
            LineCheck::Invalid(error) => {
                report.total += 1;
                report.invalid.push(InvalidRecord {
                    line: line_no,
                    error,
                });
            }
        }
    }
    Ok(report)
}

enum LineCheck {
    Valid,
    Skipped,
    Invalid(String),
}

fn check_line(line: &str) -> LineCheck {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => return LineCheck::Invalid(format!("malformed JSON: {e}")),
    };

    let record = match value.get("kind").and_then(|k| k.as_str()) {
        Some("finding") => return LineCheck::Skipped,
        Some("event") => match value.get("data") {
            Some(data) => data,
            None => return LineCheck::Invalid("event line without 'data'".to_owned()),
        },
        _ => &value,
    };

    match Validator::validate_value(record) {
        Ok(_) => LineCheck::Valid,
        Err(e) => LineCheck::Invalid(e.to_string()),
    }
}

/// A record that failed validation.
#[derive(Debug, Serialize)]
pub struct InvalidRecord {
    /// 1-based line number
    pub line: usize,
    /// Validation failure
    pub error: String,
}

/// Result of validating a JSON lines file.
#[derive(Debug, Default, Serialize)]
pub struct EventValidationReport {
    /// Validated file
    pub file: String,
    /// Event records checked
    pub total: usize,
    /// Records that passed
    pub valid: usize,
    /// Finding lines that were skipped
    pub skipped: usize,
    /// Records that failed
    pub invalid: Vec<InvalidRecord>,
}

impl Render for EventValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Event Validation: {}", self.file.bold())?;
        writeln!(
            w,
            "  Records: {} checked, {} valid, {} invalid, {} skipped",
            self.total,
            self.valid,
            self.invalid.len(),
            self.skipped
        )?;
        if self.invalid.is_empty() {
            writeln!(w, "  Result: {}", "VALID".green().bold())?;
        } else {
            writeln!(w, "  Result: {}", "INVALID".red().bold())?;
            for record in &self.invalid {
                writeln!(w, "  line {}: {}", record.line, record.error.red())?;
            }
        }
        Ok(())
    }
}
