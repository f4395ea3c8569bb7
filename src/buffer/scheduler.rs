use crate::domain::{ClientError, SchedulerError};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Lifecycle of a [`FlushScheduler`]. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Background task that flushes on a fixed interval.
///
/// Stopping is a two-step rendezvous: [`disarm`](Self::disarm) signals the
/// task and [`PendingStop::wait`] blocks until the task has acknowledged
/// termination. Once the wait returns no further flush can run.
///
/// Dropping a running scheduler closes the stop channel, which the task
/// treats like an explicit stop.
#[derive(Debug)]
pub struct FlushScheduler {
    interval: Duration,
    state: Arc<Mutex<SchedulerState>>,
    stop_tx: Option<oneshot::Sender<()>>,
    done_rx: Option<oneshot::Receiver<()>>,
}

impl FlushScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Arc::new(Mutex::new(SchedulerState::Idle)),
            stop_tx: None,
            done_rx: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    /// Spawns the flush task. The first tick fires one interval from now.
    ///
    /// Flush errors are logged and the task keeps running: the connection
    /// may recover, or a higher layer may reconnect it.
    pub fn start<F, Fut>(&mut self, mut flush: F) -> Result<(), SchedulerError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ClientError>> + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            match *state {
                SchedulerState::Idle => *state = SchedulerState::Running,
                SchedulerState::Running => return Err(SchedulerError::AlreadyStarted),
                SchedulerState::Stopping | SchedulerState::Stopped => {
                    return Err(SchedulerError::AlreadyStopped);
                }
            }
        }

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let interval = self.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(?interval, "flush scheduler running");

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        if let Err(e) = flush().await {
                            warn!(error = %e, "scheduled flush failed");
                        }
                    }
                }
            }

            debug!("flush scheduler exited");
            let _ = done_tx.send(());
        });

        self.stop_tx = Some(stop_tx);
        self.done_rx = Some(done_rx);
        Ok(())
    }

    /// Signals the task to stop without waiting for it.
    ///
    /// No new tick is accepted after this returns; a flush that is already
    /// running completes. Call [`PendingStop::wait`] to block until the task
    /// is gone.
    pub fn disarm(&mut self) -> Result<PendingStop, SchedulerError> {
        let mut state = self.state.lock();
        match *state {
            SchedulerState::Idle => {
                *state = SchedulerState::Stopped;
                Ok(PendingStop {
                    done_rx: None,
                    state: self.state.clone(),
                })
            }
            SchedulerState::Running => {
                *state = SchedulerState::Stopping;
                if let Some(stop_tx) = self.stop_tx.take() {
                    let _ = stop_tx.send(());
                }
                Ok(PendingStop {
                    done_rx: self.done_rx.take(),
                    state: self.state.clone(),
                })
            }
            SchedulerState::Stopping | SchedulerState::Stopped => {
                Err(SchedulerError::AlreadyStopped)
            }
        }
    }

    /// Disarms the scheduler and waits for the task to exit.
    pub async fn stop(&mut self) -> Result<(), SchedulerError> {
        let pending = self.disarm()?;
        pending.wait().await;
        Ok(())
    }
}

/// Completion half of a scheduler stop.
#[derive(Debug)]
#[must_use = "the scheduler task may still be running until `wait` returns"]
pub struct PendingStop {
    done_rx: Option<oneshot::Receiver<()>>,
    state: Arc<Mutex<SchedulerState>>,
}

impl PendingStop {
    pub async fn wait(self) {
        if let Some(done_rx) = self.done_rx {
            // A dropped sender means the task is gone as well.
            let _ = done_rx.await;
        }
        *self.state.lock() = SchedulerState::Stopped;
    }
}
