//! `siemlite replay` command handler
//!
//! Feeds a static file through the same parse, validate and detect path the
//! live pipeline uses, and prints every sink item as a JSON line on stdout.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use siemlite_core::action::ActionTable;
use siemlite_core::config::SiemConfig;
use siemlite_core::pipeline::Pipeline;
use siemlite_core::types::SinkItem;
use siemlite_log_pipeline::{
    ChannelSink, OverflowPolicy, ParserRegistry, PipelineConfig, SiemPipelineBuilder,
    StatsSnapshot,
};

use crate::cli::ReplayArgs;
use crate::commands::run::render_stats;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Source name attached to replayed events.
const REPLAY_SOURCE: &str = "replay";

/// Execute the `replay` command.
///
/// Detector and sink settings come from the configuration when the file
/// exists, otherwise defaults are used. Configured sources are ignored and
/// the sink never drops items.
pub async fn execute(
    args: ReplayArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let mut pipeline_config = if tokio::fs::try_exists(config_path).await.unwrap_or(false) {
        let config = SiemConfig::load(config_path).await?;
        PipelineConfig::from_core(&config)?
    } else {
        debug!(path = %config_path.display(), "no configuration file, using defaults");
        PipelineConfig::default()
    };
    pipeline_config.sources.clear();

    let registry = ParserRegistry::with_defaults(ActionTable::builtin())?;
    if !registry.contains(&args.source_type) {
        return Err(CliError::Command(format!(
            "unknown source type '{}' (available: {})",
            args.source_type,
            registry.source_types().join(", ")
        )));
    }
    pipeline_config.sink.overflow_policy = OverflowPolicy::Block;

    let file = tokio::fs::File::open(&args.file).await.map_err(|e| {
        CliError::Command(format!("cannot open {}: {e}", args.file.display()))
    })?;

    let (sink, rx) = ChannelSink::new(pipeline_config.sink.buffer_capacity);
    let mut pipeline = SiemPipelineBuilder::new()
        .config(pipeline_config)
        .registry(registry)
        .sink(Arc::new(sink))
        .build()?;

    let printer = tokio::spawn(print_items(rx, args.findings_only));

    pipeline.start().await?;
    info!(
        file = %args.file.display(),
        source_type = %args.source_type,
        "replaying log file"
    );

    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            break;
        }
        let line = strip_terminator(&buf);
        if line.is_empty() {
            continue;
        }
        // non UTF-8 lines are counted as parse failures, never re-encoded
        pipeline
            .ingest_bytes(REPLAY_SOURCE, &args.source_type, line)
            .await?;
    }

    pipeline.stop().await?;
    let stats = pipeline.snapshot();
    // the printer only finishes once the last sender is gone
    drop(pipeline);

    let printed = printer
        .await
        .map_err(|e| CliError::Command(format!("output task failed: {e}")))??;

    let summary = ReplaySummary {
        file: args.file.display().to_string(),
        source_type: args.source_type,
        printed,
        stats,
    };
    writer.render_stderr(&summary)?;
    Ok(())
}

/// Writes sink items to stdout as JSON lines and returns how many were written.
async fn print_items(
    mut rx: mpsc::Receiver<SinkItem>,
    findings_only: bool,
) -> Result<u64, CliError> {
    let mut printed = 0;
    while let Some(item) = rx.recv().await {
        if findings_only && !matches!(item, SinkItem::Finding(_)) {
            continue;
        }
        let line = serde_json::to_string(&item)?;
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{line}")?;
        printed += 1;
    }
    Ok(printed)
}

fn strip_terminator(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}

/// Outcome of a replay run.
#[derive(Serialize)]
pub struct ReplaySummary {
    /// Replayed file
    pub file: String,
    /// Parser used for every line
    pub source_type: String,
    /// JSON lines written to stdout
    pub printed: u64,
    /// Pipeline counters
    pub stats: StatsSnapshot,
}

impl Render for ReplaySummary {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(
            w,
            "Replayed {} as {} ({} items printed)",
            self.file.bold(),
            self.source_type,
            self.printed
        )?;
        render_stats(w, &self.stats)
    }
}
