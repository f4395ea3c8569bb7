pub mod scheduler;
pub mod writer;

pub use scheduler::{FlushScheduler, PendingStop, SchedulerState};
pub use writer::{BufferedWriter, Transport};

use std::time::Duration;

/// Default write buffer capacity: 1 MiB.
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Default interval between scheduled flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);
