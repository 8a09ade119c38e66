//! `siemlite run` command handler

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use siemlite_core::config::SiemConfig;
use siemlite_core::pipeline::{HealthStatus, Pipeline};
use siemlite_log_pipeline::{
    PipelineConfig, PreflightOptions, SiemPipelineBuilder, StartPosition, StatsSnapshot,
    run_preflight,
};

use crate::cli::RunArgs;
use crate::commands::verify::VerifyReport;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `run` command.
///
/// Preflight runs first and a fatal result aborts before anything starts.
/// Reports go to stderr because the default sink writes events to stdout.
pub async fn execute(
    args: RunArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = SiemConfig::load(config_path).await?;

    let options = PreflightOptions {
        only: None,
        preview_lines: 0,
    };
    let preflight = run_preflight(&config, &options).await;
    let report = VerifyReport {
        config: config_path.display().to_string(),
        passed: preflight.passed(),
        report: preflight,
    };
    writer.render_stderr(&report)?;
    if let Some(message) = report.report.fatal() {
        return Err(CliError::Preflight(message.to_owned()));
    }

    // no-op unless the embedding process installed a metrics recorder
    siemlite_core::metrics::describe_all();

    let mut pipeline_config = PipelineConfig::from_core(&config)?;
    if args.from_beginning {
        pipeline_config.start_position = StartPosition::Beginning;
    }

    let mut pipeline = SiemPipelineBuilder::new().config(pipeline_config).build()?;
    pipeline.start().await?;

    let deadline = args.duration_secs.map(Duration::from_secs);
    let mut health_tick =
        tokio::time::interval(Duration::from_secs(args.health_interval_secs.max(1)));
    health_tick.tick().await;
    let sleep = async {
        match deadline {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "failed to listen for ctrl-c, shutting down");
                }
                info!("interrupt received, shutting down");
                break;
            }
            () = &mut sleep => {
                info!("run duration elapsed, shutting down");
                break;
            }
            _ = health_tick.tick() => {
                match pipeline.health_check().await {
                    HealthStatus::Healthy => {}
                    HealthStatus::Degraded(reason) => warn!(%reason, "pipeline degraded"),
                    HealthStatus::Unhealthy(reason) => {
                        warn!(%reason, "pipeline unhealthy, shutting down");
                        break;
                    }
                }
            }
        }
    }

    let health = pipeline.health_check().await;
    pipeline.stop().await?;

    let summary = RunSummary {
        health,
        stats: pipeline.snapshot(),
    };
    writer.render_stderr(&summary)?;
    Ok(())
}

/// Final counters of a `run` session.
#[derive(Serialize)]
pub struct RunSummary {
    /// Health observed just before shutdown
    pub health: HealthStatus,
    /// Counters at shutdown
    pub stats: StatsSnapshot,
}

impl Render for RunSummary {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        let health = match &self.health {
            HealthStatus::Healthy => "healthy".green().to_string(),
            HealthStatus::Degraded(reason) => format!("{} ({reason})", "degraded".yellow()),
            HealthStatus::Unhealthy(reason) => format!("{} ({reason})", "unhealthy".red()),
        };
        writeln!(w, "Pipeline: {health}")?;
        render_stats(w, &self.stats)
    }
}

/// Shared counter table for `run` and `replay`.
pub fn render_stats(w: &mut dyn Write, stats: &StatsSnapshot) -> std::io::Result<()> {
    let rows = [
        ("lines read", stats.lines_read),
        ("events accepted", stats.events_accepted),
        ("parse failures", stats.parse_failures),
        ("validation failures", stats.validation_failures),
        ("findings", stats.findings),
        ("detector errors", stats.detector_errors),
        ("sink delivered", stats.sink_delivered),
        ("sink dropped", stats.sink_dropped),
        ("sink retries", stats.sink_retries),
        ("source errors", stats.source_errors),
        ("rotations", stats.rotations),
    ];
    for (label, value) in rows {
        writeln!(w, "  {label:<20} {value}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_summary_render_text() {
        colored::control::set_override(false);
        let summary = RunSummary {
            health: HealthStatus::Degraded("sink buffer at 95%".to_owned()),
            stats: StatsSnapshot {
                lines_read: 10,
                events_accepted: 8,
                findings: 1,
                ..StatsSnapshot::default()
            },
        };

        let mut buffer = Vec::new();
        summary.render_text(&mut buffer).expect("render");
        let output = String::from_utf8(buffer).expect("valid UTF-8");

        assert!(output.starts_with("Pipeline: degraded (sink buffer at 95%)"));
        assert!(output.contains("lines read"));
        assert!(output.contains("findings"));
        assert_eq!(output.lines().count(), 12);
    }

    #[test]
    fn test_run_summary_json_shape() {
        let summary = RunSummary {
            health: HealthStatus::Healthy,
            stats: StatsSnapshot::default(),
        };
        let json = serde_json::to_value(&summary).expect("serialize");
        assert_eq!(json["health"]["status"], "healthy");
        assert_eq!(json["stats"]["lines_read"], 0);
    }
}
