use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Write counters for buffered clients.
///
/// Counters only ever grow. A single instance may be shared by every client
/// in the process; readers tolerate values that are slightly out of step
/// with each other.
#[derive(Debug, Default)]
pub struct WriteMetrics {
    bytes_written: AtomicU64,
    write_time_ns: AtomicU64,
    write_count: AtomicU64,
}

impl WriteMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_write(&self, bytes: usize, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
        self.write_time_ns.fetch_add(nanos, Ordering::Relaxed);
        self.write_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WriteMetricsSnapshot {
        WriteMetricsSnapshot {
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            total_write_time_ns: self.write_time_ns.load(Ordering::Relaxed),
            write_count: self.write_count.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteMetricsSnapshot {
    pub bytes_written: u64,
    pub total_write_time_ns: u64,
    pub write_count: u64,
}

impl WriteMetricsSnapshot {
    pub fn kilobytes_written(&self) -> u64 {
        self.bytes_written / 1024
    }

    pub fn average_write_ns(&self) -> f64 {
        if self.write_count == 0 {
            return 0.0;
        }
        self.total_write_time_ns as f64 / self.write_count as f64
    }

    pub fn average_write_ms(&self) -> f64 {
        self.average_write_ns() / 1_000_000.0
    }

    pub fn average_write_time(&self) -> Duration {
        if self.write_count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.total_write_time_ns / self.write_count)
    }
}
