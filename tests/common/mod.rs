#![allow(dead_code)]

use async_trait::async_trait;
use fluent_buffered_client::sender::{BoxedStream, ConnectionFactory};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::{Mutex, mpsc};

pub const DUPLEX_CAPACITY: usize = 256 * 1024;

/// Hands the client one end of an in-memory pipe per connect and delivers
/// the other end to the test, which plays the forwarder.
pub struct DuplexFactory {
    servers: mpsc::UnboundedSender<DuplexStream>,
}

impl DuplexFactory {
    pub fn new() -> (Arc<Self>, ForwarderEnds) {
        let (servers, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { servers }), ForwarderEnds(Mutex::new(rx)))
    }
}

#[async_trait]
impl ConnectionFactory for DuplexFactory {
    async fn connect(&self) -> io::Result<BoxedStream> {
        let (client, server) = tokio::io::duplex(DUPLEX_CAPACITY);
        self.servers
            .send(server)
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "forwarder gone"))?;
        Ok(Box::new(client))
    }
}

pub struct ForwarderEnds(Mutex<mpsc::UnboundedReceiver<DuplexStream>>);

impl ForwarderEnds {
    /// The forwarder side of the next accepted connection.
    pub async fn accept(&self) -> DuplexStream {
        self.0
            .lock()
            .await
            .recv()
            .await
            .expect("client never connected")
    }
}

/// Factory whose connections are always refused.
pub struct RefusingFactory;

#[async_trait]
impl ConnectionFactory for RefusingFactory {
    async fn connect(&self) -> io::Result<BoxedStream> {
        Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
    }
}

/// Reads whatever arrives within `wait`; empty when nothing was written.
pub async fn read_pending(server: &mut DuplexStream, wait: Duration) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    while let Ok(Ok(n)) = tokio::time::timeout(wait, server.read(&mut buf)).await {
        if n == 0 {
            break;
        }
        received.extend_from_slice(&buf[..n]);
    }
    received
}

pub async fn read_exactly(server: &mut DuplexStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    server.read_exact(&mut buf).await.expect("forwarder read failed");
    buf
}
