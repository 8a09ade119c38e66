//! `siemlite config` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use siemlite_core::config::{ConfigFormat, SiemConfig};
use siemlite_log_pipeline::PipelineConfig;

use crate::cli::{ConfigAction, ConfigArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Sections accepted by `config show --section`.
const SECTIONS: &[&str] = &[
    "general",
    "required_sources",
    "log_sources",
    "pipeline",
    "detectors",
    "sink",
];

/// Execute the `config` command.
pub async fn execute(
    args: ConfigArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match args.action {
        ConfigAction::Validate => execute_validate(config_path, writer).await,
        ConfigAction::Show { section } => execute_show(config_path, section, writer).await,
    }
}

/// Loads the document and also derives the runtime pipeline settings, so
/// values that only fail when converted (durations, policies) are caught too.
async fn execute_validate(config_path: &Path, writer: &OutputWriter) -> Result<(), CliError> {
    info!(path = %config_path.display(), "validating configuration");

    let errors = match SiemConfig::load(config_path).await {
        Ok(config) => match PipelineConfig::from_core(&config) {
            Ok(_) => Vec::new(),
            Err(e) => vec![e.to_string()],
        },
        Err(e) => vec![e.to_string()],
    };

    let report = ConfigValidationReport {
        source: config_path.display().to_string(),
        valid: errors.is_empty(),
        errors,
    };
    writer.render(&report)?;

    if !report.valid {
        return Err(CliError::Config("configuration is invalid".to_owned()));
    }
    Ok(())
}

async fn execute_show(
    config_path: &Path,
    section: Option<String>,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    info!(path = %config_path.display(), "loading configuration");

    let config = SiemConfig::load(config_path).await?;
    let format = ConfigFormat::from_path(config_path);

    let value = match section.as_deref() {
        None => serde_json::to_value(&config)?,
        Some(name) => {
            let full = serde_json::to_value(&config)?;
            match full.get(name) {
                Some(part) if SECTIONS.contains(&name) => part.clone(),
                _ => {
                    return Err(CliError::Command(format!(
                        "unknown section: {name} (expected: {})",
                        SECTIONS.join(", ")
                    )));
                }
            }
        }
    };

    let text = render_document(&value, format, section.as_deref())?;
    let report = ConfigReport {
        source: config_path.display().to_string(),
        section,
        config: value,
        text,
    };
    writer.render(&report)?;
    Ok(())
}

/// Serializes a (partial) configuration in the document's own format.
///
/// TOML cannot represent a bare array or string at the top level, so a
/// section is wrapped in a table named after it.
fn render_document(
    value: &serde_json::Value,
    format: ConfigFormat,
    section: Option<&str>,
) -> Result<String, CliError> {
    match format {
        ConfigFormat::Toml => {
            let mut wrapped = match section {
                Some(name) => {
                    let mut table = serde_json::Map::new();
                    table.insert(name.to_owned(), value.clone());
                    serde_json::Value::Object(table)
                }
                None => value.clone(),
            };
            strip_nulls(&mut wrapped);
            toml::to_string_pretty(&wrapped)
                .map_err(|e| CliError::Command(format!("toml serialization error: {e}")))
        }
        ConfigFormat::Yaml => serde_yaml::to_string(value)
            .map_err(|e| CliError::Command(format!("yaml serialization error: {e}"))),
    }
}

/// TOML has no null; unset optional fields are omitted instead.
fn strip_nulls(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(strip_nulls);
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}

/// Effective configuration display.
#[derive(Serialize)]
pub struct ConfigReport {
    /// Configuration file path
    pub source: String,
    /// Optional section name (None = full config)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Configuration as structured data (JSON output)
    pub config: serde_json::Value,
    /// Configuration in the file's own format (text output)
    #[serde(skip)]
    pub text: String,
}

impl Render for ConfigReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        if let Some(ref section) = self.section {
            let label = format!("[{section}]");
            writeln!(w, "Configuration {} (source: {})", label.bold(), self.source)?;
        } else {
            writeln!(w, "Configuration (source: {})", self.source.bold())?;
        }

        writeln!(w)?;
        write!(w, "{}", self.text)?;
        Ok(())
    }
}

/// Configuration validation result.
#[derive(Serialize)]
pub struct ConfigValidationReport {
    /// Configuration file path
    pub source: String,
    /// Whether the configuration is valid
    pub valid: bool,
    /// Validation error messages (empty if valid)
    pub errors: Vec<String>,
}

impl Render for ConfigValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Config Validation: {}", self.source.bold())?;
        if self.valid {
            writeln!(w, "  Result: {}", "VALID".green().bold())?;
        } else {
            writeln!(w, "  Result: {}", "INVALID".red().bold())?;
            for err in &self.errors {
                writeln!(w, "  Error: {}", err.red())?;
            }
        }
        Ok(())
    }
}
