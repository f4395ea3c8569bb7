use crate::buffer::Transport;
use crate::protocol::{FrameError, FrameReader};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

#[cfg(test)]
use mockall::automock;

/// Default forwarder address.
pub const DEFAULT_ADDRESS: &str = "localhost:24224";

pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Produces the raw transport for a new session.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self) -> io::Result<BoxedStream>;
}

#[derive(Debug, Clone)]
pub struct TcpConnectionFactory {
    pub address: String,
}

impl TcpConnectionFactory {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl Default for TcpConnectionFactory {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS)
    }
}

#[async_trait]
impl ConnectionFactory for TcpConnectionFactory {
    async fn connect(&self) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect(self.address.as_str()).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct UnixConnectionFactory {
    pub path: std::path::PathBuf,
}

#[cfg(unix)]
impl UnixConnectionFactory {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[cfg(unix)]
#[async_trait]
impl ConnectionFactory for UnixConnectionFactory {
    async fn connect(&self) -> io::Result<BoxedStream> {
        let stream = tokio::net::UnixStream::connect(&self.path).await?;
        Ok(Box::new(stream))
    }
}

/// An open connection to the forwarder.
///
/// Reads and writes are independently serialized, so an acknowledgment
/// read never blocks a flush from another task.
pub struct Connection {
    reader: Mutex<FrameReader<ReadHalf<BoxedStream>>>,
    writer: Mutex<WriteHalf<BoxedStream>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(stream: BoxedStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(FrameReader::new(reader)),
            writer: Mutex::new(writer),
        }
    }

    /// Writes `bytes` and flushes the socket.
    pub async fn write_bytes(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    pub async fn read_frame<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        let mut reader = self.reader.lock().await;
        reader.next_frame().await
    }

    /// Closes the write side; the forwarder sees end of stream.
    pub async fn shutdown(&self) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await
    }
}

impl Transport for Connection {
    fn write_all(&self, bytes: &[u8]) -> impl Future<Output = io::Result<()>> + Send {
        self.write_bytes(bytes)
    }
}
