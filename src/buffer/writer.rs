use std::future::Future;
use std::io;
use std::sync::Arc;
use tracing::debug;

/// Destination of flushed bytes.
///
/// Each call must either put the whole slice on the wire or fail.
pub trait Transport: Send + Sync {
    fn write_all(&self, bytes: &[u8]) -> impl Future<Output = io::Result<()>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn write_all(&self, bytes: &[u8]) -> impl Future<Output = io::Result<()>> + Send {
        (**self).write_all(bytes)
    }
}

/// In-memory write buffer in front of a [`Transport`].
///
/// Bytes passed to [`write`](Self::write) are either held in the buffer or
/// already transmitted. A payload is never split across transport writes.
#[derive(Debug)]
pub struct BufferedWriter<T> {
    transport: T,
    buf: Vec<u8>,
    capacity: usize,
}

impl<T: Transport> BufferedWriter<T> {
    pub fn new(transport: T, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            transport,
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Accepts `bytes` into the buffer, sending the buffered data first
    /// when it would not fit.
    ///
    /// Returns the number of bytes accepted.
    pub async fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        if bytes.is_empty() {
            return Ok(0);
        }

        if bytes.len() > self.available() {
            self.flush().await?;
        }

        if bytes.len() >= self.capacity {
            // Too large to ever be buffered: send it as is.
            self.transport.write_all(bytes).await?;
            return Ok(bytes.len());
        }

        self.buf.extend_from_slice(bytes);
        if self.buf.len() == self.capacity {
            self.flush().await?;
        }
        Ok(bytes.len())
    }

    /// Sends every buffered byte. No I/O happens when the buffer is empty.
    pub async fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }

        self.transport.write_all(&self.buf).await?;
        debug!(bytes = self.buf.len(), "flushed write buffer");
        self.buf.clear();
        Ok(())
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn available(&self) -> usize {
        self.capacity - self.buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingTransport {
        writes: Mutex<Vec<Vec<u8>>>,
        fail: AtomicBool,
    }

    impl Transport for RecordingTransport {
        async fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "forwarder gone"));
            }
            self.writes.lock().push(bytes.to_vec());
            Ok(())
        }
    }

    fn writes(writer: &BufferedWriter<Arc<RecordingTransport>>) -> Vec<Vec<u8>> {
        writer.transport().writes.lock().clone()
    }

    #[tokio::test]
    async fn test_small_writes_stay_buffered() {
        let mut writer = BufferedWriter::new(Arc::new(RecordingTransport::default()), 64);

        assert_eq!(writer.write(b"hello").await.unwrap(), 5);
        assert_eq!(writer.write(b" world").await.unwrap(), 6);

        assert!(writes(&writer).is_empty());
        assert_eq!(writer.buffered(), 11);
        assert_eq!(writer.available(), 53);
    }

    #[tokio::test]
    async fn test_overflowing_write_flushes_previous_bytes_first() {
        let mut writer = BufferedWriter::new(Arc::new(RecordingTransport::default()), 16);

        for _ in 0..3 {
            writer.write(b"abcde").await.unwrap();
        }
        assert!(writes(&writer).is_empty());

        writer.write(b"fghij").await.unwrap();
        assert_eq!(writes(&writer), vec![b"abcdeabcdeabcde".to_vec()]);
        assert_eq!(writer.buffered(), 5);

        writer.flush().await.unwrap();
        assert_eq!(writes(&writer).last().unwrap(), b"fghij");
        assert_eq!(writer.buffered(), 0);
    }

    #[tokio::test]
    async fn test_exactly_full_buffer_is_sent() {
        let mut writer = BufferedWriter::new(Arc::new(RecordingTransport::default()), 8);

        writer.write(b"1234").await.unwrap();
        writer.write(b"5678").await.unwrap();

        assert_eq!(writes(&writer), vec![b"12345678".to_vec()]);
        assert_eq!(writer.buffered(), 0);
    }

    #[tokio::test]
    async fn test_oversized_payload_bypasses_buffer() {
        let mut writer = BufferedWriter::new(Arc::new(RecordingTransport::default()), 4);

        writer.write(b"ab").await.unwrap();
        writer.write(b"0123456789").await.unwrap();

        assert_eq!(
            writes(&writer),
            vec![b"ab".to_vec(), b"0123456789".to_vec()]
        );
        assert_eq!(writer.buffered(), 0);
    }

    #[tokio::test]
    async fn test_flush_on_empty_buffer_does_no_io() {
        let transport = Arc::new(RecordingTransport::default());
        transport.fail.store(true, Ordering::SeqCst);
        let mut writer = BufferedWriter::new(transport, 32);

        // Would fail if it touched the transport.
        writer.flush().await.unwrap();
        writer.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_transport_failure_is_reported() {
        let transport = Arc::new(RecordingTransport::default());
        let mut writer = BufferedWriter::new(transport.clone(), 32);

        writer.write(b"pending").await.unwrap();
        transport.fail.store(true, Ordering::SeqCst);

        let err = writer.flush().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let writer = BufferedWriter::new(Arc::new(RecordingTransport::default()), 0);
        assert_eq!(writer.capacity(), 1);
    }
}
