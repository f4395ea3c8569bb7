use super::metrics::{WriteMetrics, WriteMetricsSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default interval between metrics reports.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Spawns a task that periodically logs `metrics` until `cancel` fires.
///
/// The caller owns the returned handle and should await it after
/// cancelling.
pub fn spawn_metrics_reporter(
    metrics: Arc<WriteMetrics>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => report(&metrics.snapshot()),
            }
        }

        debug!("metrics reporter stopped");
    })
}

fn report(snapshot: &WriteMetricsSnapshot) {
    info!(
        bytes_written = snapshot.bytes_written,
        kilobytes_written = snapshot.kilobytes_written(),
        avg_write_ns = format_args!("{:.2}", snapshot.average_write_ns()),
        avg_write_ms = format_args!("{:.2}", snapshot.average_write_ms()),
        write_count = snapshot.write_count,
        "buffered client write metrics"
    );
}
