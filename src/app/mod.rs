pub mod config;
pub mod logging_system;

pub use config::{Config, ConfigError, LogFormat, LogLevel};
pub use logging_system::{LoggingError, init_tracing};

use crate::domain::{LogEvent, SessionFields, Severity};
use crate::pipeline::{Pipeline, SubmitOutcome};
use crate::sender::MetricsSnapshot;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use uuid::Uuid;

/// Turns one input line into an event. A leading `LEVEL:` prefix picks the
/// severity; anything else is shipped as `info` unchanged.
pub fn parse_line(line: &str) -> LogEvent {
    if let Some((prefix, rest)) = line.split_once(':')
        && let Some(severity) = Severity::parse(prefix)
    {
        return LogEvent::new(severity, rest.trim_start().to_string());
    }
    LogEvent::new(Severity::Info, line.to_string())
}

/// Counts from feeding a reader into the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineStats {
    pub lines: usize,
    pub accepted: usize,
    pub rejected: usize,
}

/// Submits every non-empty line of `reader` until EOF or until `stop`
/// completes, whichever comes first.
pub async fn ship_lines<R, F>(pipeline: &Pipeline, reader: R, stop: F) -> std::io::Result<LineStats>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = ()>,
{
    let mut lines = reader.lines();
    let mut stats = LineStats::default();
    tokio::pin!(stop);

    loop {
        let line = tokio::select! {
            _ = &mut stop => {
                info!("Stop requested, no more input is read");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        stats.lines += 1;
        match pipeline.submit(parse_line(&line)) {
            SubmitOutcome::Rejected(reason) => {
                stats.rejected += 1;
                warn!("Line {} rejected: {:?}", stats.lines, reason);
            }
            _ => stats.accepted += 1,
        }
    }

    Ok(stats)
}

/// Ships stdin to the configured collector and returns the final counters.
pub async fn run(config: Config) -> anyhow::Result<MetricsSnapshot> {
    let fields = SessionFields::new().with_app_version(env!("CARGO_PKG_VERSION"));
    fields.set_session_id(Some(Uuid::new_v4().to_string()));

    let pipeline = Pipeline::spawn(&config, Arc::new(fields))?;
    info!(
        "Shipping stdin to {} (batch {} records / {} bytes, flush every {:?})",
        config.endpoint_url_template,
        config.max_batch_count,
        config.max_batch_bytes,
        config.flush_interval()
    );

    let stop = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler available; rely on EOF
            std::future::pending::<()>().await;
        }
    };
    let stats = ship_lines(&pipeline, BufReader::new(tokio::io::stdin()), stop).await?;
    info!(
        "Input finished: {} lines, {} accepted, {} rejected",
        stats.lines, stats.accepted, stats.rejected
    );

    let snapshot = pipeline.shutdown().await?;
    if let Some(first) = pipeline.first_response() {
        info!("First collector response: HTTP {} {}", first.status, first.body);
    }
    info!(
        "Final counters: submitted={} delivered={} retries={} dropped={} (fatal={}, overflow={}, shutdown={})",
        snapshot.submitted,
        snapshot.records_delivered,
        snapshot.retries,
        snapshot.total_dropped(),
        snapshot.dropped_fatal,
        snapshot.dropped_overflow,
        snapshot.dropped_on_shutdown
    );

    #[cfg(feature = "metrics")]
    if config.print_metrics {
        let exporter = crate::reliability::PrometheusExporter::new()?;
        exporter.update(&snapshot);
        print!("{}", exporter.gather_text()?);
    }
    #[cfg(not(feature = "metrics"))]
    if config.print_metrics {
        warn!("--print-metrics needs the `metrics` feature");
    }

    Ok(snapshot)
}

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

pub async fn main() -> anyhow::Result<()> {
    let config = Config::from_args(std::env::args_os())?;
    init_tracing(config.log_level, config.log_format)?;
    info!("Starting hec-log-shipper v{}", get_version());

    let snapshot = run(config).await?;
    if snapshot.dropped_fatal > 0 {
        anyhow::bail!(
            "{} records were rejected by the collector",
            snapshot.dropped_fatal
        );
    }
    Ok(())
}
