use super::client::{ClientOptions, ForwardClient, Session};
use super::connection::Connection;
use super::metrics::WriteMetrics;
use crate::buffer::{
    BufferedWriter, DEFAULT_BUFFER_SIZE, DEFAULT_FLUSH_INTERVAL, FlushScheduler, SchedulerState,
};
use crate::domain::{ClientError, SchedulerError};
use crate::protocol::{ChunkEncoder, EntryList};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLockReadGuard};
use tracing::{info, warn};

type SharedWriter = Arc<Mutex<Option<BufferedWriter<Arc<Connection>>>>>;

#[derive(Debug, Clone)]
pub struct BufferedClientOptions {
    pub client: ClientOptions,
    /// Write buffer capacity in bytes.
    pub buffer_size: usize,
    pub flush_interval: Duration,
}

impl Default for BufferedClientOptions {
    fn default() -> Self {
        Self {
            client: ClientOptions::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

/// Forward client that batches records in memory.
///
/// Records are written into a [`BufferedWriter`] and reach the forwarder
/// when the buffer fills, when the flush scheduler ticks, or on
/// [`sync`](Self::sync). Every access to the buffer, from callers and from
/// the scheduler alike, goes through one mutex.
///
/// A clean shutdown is [`stop`](Self::stop), [`sync`](Self::sync), then
/// [`disconnect`](Self::disconnect); [`shutdown`](Self::shutdown) runs all
/// three.
pub struct BufferedClient {
    client: ForwardClient,
    writer: SharedWriter,
    scheduler: Mutex<FlushScheduler>,
    buffer_size: usize,
    flush_interval: Duration,
    metrics: Arc<WriteMetrics>,
}

impl std::fmt::Debug for BufferedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedClient")
            .field("client", &self.client)
            .field("buffer_size", &self.buffer_size)
            .field("flush_interval", &self.flush_interval)
            .finish_non_exhaustive()
    }
}

impl BufferedClient {
    pub fn new(options: BufferedClientOptions) -> Self {
        let buffer_size = if options.buffer_size == 0 {
            DEFAULT_BUFFER_SIZE
        } else {
            options.buffer_size
        };
        let flush_interval = if options.flush_interval.is_zero() {
            DEFAULT_FLUSH_INTERVAL
        } else {
            options.flush_interval
        };

        Self {
            client: ForwardClient::new(options.client),
            writer: Arc::new(Mutex::new(None)),
            scheduler: Mutex::new(FlushScheduler::new(flush_interval)),
            buffer_size,
            flush_interval,
            metrics: Arc::new(WriteMetrics::new()),
        }
    }

    /// Replaces the client's private counters with a shared instance.
    pub fn with_metrics(mut self, metrics: Arc<WriteMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<WriteMetrics> {
        &self.metrics
    }

    pub fn require_ack(&self) -> bool {
        self.client.require_ack()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    pub async fn is_connected(&self) -> bool {
        self.client.is_connected().await
    }

    /// True once the handshake, if any, has completed on the current session.
    pub async fn transport_phase(&self) -> bool {
        self.client.transport_phase().await
    }

    /// Bytes currently held in the write buffer.
    pub async fn buffered_bytes(&self) -> usize {
        self.writer
            .lock()
            .await
            .as_ref()
            .map_or(0, BufferedWriter::buffered)
    }

    pub async fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.lock().await.state()
    }

    /// Connects, wraps the connection in the write buffer and starts the
    /// flush scheduler.
    ///
    /// The session lock is held throughout so concurrent connects cannot
    /// both succeed.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut session = self.client.session.write().await;
        if session.is_some() {
            return Err(ClientError::AlreadyConnected);
        }
        self.client.establish(&mut session).await?;

        let connection = match session.as_ref() {
            Some(session) => session.connection.clone(),
            None => return Err(ClientError::NoActiveSession),
        };
        *self.writer.lock().await = Some(BufferedWriter::new(connection, self.buffer_size));

        let mut scheduler = self.scheduler.lock().await;
        if scheduler.state() != SchedulerState::Idle {
            *scheduler = FlushScheduler::new(self.flush_interval);
        }
        scheduler.start(self.flush_task())?;

        info!(
            buffer_size = self.buffer_size,
            flush_interval = ?self.flush_interval,
            "buffered client connected"
        );
        Ok(())
    }

    /// Stops the scheduler, discards the write buffer and closes the
    /// connection.
    ///
    /// Buffered bytes are not flushed; use [`shutdown`](Self::shutdown) to
    /// drain them first.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.halt_scheduler().await;

        let discarded = self.writer.lock().await.take();
        if let Some(writer) = discarded
            && writer.buffered() > 0
        {
            warn!(
                bytes = writer.buffered(),
                "discarding unflushed bytes on disconnect"
            );
        }

        self.client.disconnect().await
    }

    pub async fn reconnect(&self) -> Result<(), ClientError> {
        if let Err(e) = self.disconnect().await {
            warn!(error = %e, "error while closing previous connection");
        }
        self.connect().await
    }

    /// Halts the flush scheduler and waits for its task to exit.
    ///
    /// Only future ticks are prevented; a flush already running completes
    /// before this returns. Stopping twice is
    /// [`SchedulerError::AlreadyStopped`].
    pub async fn stop(&self) -> Result<(), ClientError> {
        let pending = {
            let _writer = self.writer.lock().await;
            self.scheduler.lock().await.disarm()?
        };
        // The task may be waiting for the buffer lock; wait outside of it.
        pending.wait().await;
        info!("flush scheduler stopped");
        Ok(())
    }

    /// Sends every buffered byte to the forwarder.
    pub async fn sync(&self) -> Result<(), ClientError> {
        flush_shared(&self.writer).await
    }

    /// Graceful shutdown: stop the scheduler, drain the buffer, disconnect.
    ///
    /// Every step runs; the first error is returned.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        let mut first_error = None;

        match self.stop().await {
            Ok(()) | Err(ClientError::Scheduler(SchedulerError::AlreadyStopped)) => {}
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
        match self.sync().await {
            Ok(()) | Err(ClientError::NoActiveSession) => {}
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.disconnect().await {
            first_error.get_or_insert(e);
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Writes pre-encoded bytes into the buffer.
    pub async fn send_raw(&self, bytes: &[u8]) -> Result<(), ClientError> {
        let _session = self.client.active_session().await?;
        self.write_buffered(bytes, false).await
    }

    /// Encodes `record` into the buffer.
    ///
    /// Without acknowledgments this returns once the bytes are buffered.
    /// With acknowledgments the buffer is flushed and the call waits for the
    /// forwarder to acknowledge the record's chunk; on failure the bytes
    /// have still been sent.
    pub async fn send<E: ChunkEncoder>(&self, mut record: E) -> Result<(), ClientError> {
        let session = self.client.active_session().await?;

        if !self.client.require_ack() {
            let bytes = record.encode()?;
            return self.write_buffered(&bytes, false).await;
        }

        let chunk = record.chunk()?;
        let bytes = record.encode()?;

        let mut abandoned = self.client.ack_lock.lock().await;
        self.write_buffered(&bytes, true).await?;
        self.client
            .check_ack(&mut abandoned, &session.connection, &chunk)
            .await
    }

    pub async fn send_message<T: Serialize>(&self, tag: &str, record: T) -> Result<(), ClientError> {
        let session = self.pass_through_session().await?;
        self.client.send_message_on(&session, tag, record).await
    }

    pub async fn send_message_ext<T: Serialize>(
        &self,
        tag: &str,
        record: T,
    ) -> Result<(), ClientError> {
        let session = self.pass_through_session().await?;
        self.client.send_message_ext_on(&session, tag, record).await
    }

    pub async fn send_forward(&self, tag: &str, entries: EntryList) -> Result<(), ClientError> {
        let session = self.pass_through_session().await?;
        self.client.send_forward_on(&session, tag, entries).await
    }

    pub async fn send_packed(&self, tag: &str, entries: &EntryList) -> Result<(), ClientError> {
        let session = self.pass_through_session().await?;
        self.client.send_packed_on(&session, tag, entries).await
    }

    pub async fn send_packed_from_bytes(
        &self,
        tag: &str,
        entry_stream: Vec<u8>,
    ) -> Result<(), ClientError> {
        let session = self.pass_through_session().await?;
        self.client
            .send_packed_from_bytes_on(&session, tag, entry_stream)
            .await
    }

    pub async fn send_compressed(&self, tag: &str, entries: &EntryList) -> Result<(), ClientError> {
        let session = self.pass_through_session().await?;
        self.client.send_compressed_on(&session, tag, entries).await
    }

    pub async fn send_compressed_from_bytes(
        &self,
        tag: &str,
        entry_stream: &[u8],
    ) -> Result<(), ClientError> {
        let session = self.pass_through_session().await?;
        self.client
            .send_compressed_from_bytes_on(&session, tag, entry_stream)
            .await
    }

    /// Checks the session, then drains the buffer so an unbuffered write
    /// cannot overtake earlier records.
    async fn pass_through_session(&self) -> Result<RwLockReadGuard<'_, Session>, ClientError> {
        let session = self.client.active_session().await?;
        self.sync().await?;
        Ok(session)
    }

    async fn write_buffered(&self, bytes: &[u8], flush: bool) -> Result<(), ClientError> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(ClientError::NoActiveSession);
        };

        let start = Instant::now();
        let result = writer.write(bytes).await;
        self.metrics
            .record_write(*result.as_ref().unwrap_or(&0), start.elapsed());
        result.map_err(ClientError::WriteFailure)?;

        if flush {
            writer.flush().await.map_err(ClientError::WriteFailure)?;
        }
        Ok(())
    }

    async fn halt_scheduler(&self) {
        match self.stop().await {
            Ok(()) | Err(ClientError::Scheduler(SchedulerError::AlreadyStopped)) => {}
            Err(e) => warn!(error = %e, "failed to stop flush scheduler"),
        }
    }

    fn flush_task(&self) -> impl FnMut() -> BoxFuture<'static, Result<(), ClientError>> + Send + 'static {
        let writer = self.writer.clone();
        move || {
            let writer = writer.clone();
            async move { flush_shared(&writer).await }.boxed()
        }
    }
}

async fn flush_shared(writer: &Mutex<Option<BufferedWriter<Arc<Connection>>>>) -> Result<(), ClientError> {
    let mut guard = writer.lock().await;
    match guard.as_mut() {
        Some(writer) => writer.flush().await.map_err(ClientError::WriteFailure),
        None => Err(ClientError::NoActiveSession),
    }
}
