use bytes::{Buf, BytesMut};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

const INITIAL_CAPACITY: usize = 4096;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("connection closed before a complete frame arrived")]
    Closed,
    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads consecutive JSON values off a byte stream.
///
/// Values are not delimited on the wire; bytes are accumulated until the
/// buffered prefix decodes as one complete value, which is then consumed.
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    pub async fn next_frame<T: DeserializeOwned>(&mut self) -> Result<T, FrameError> {
        loop {
            if let Some(frame) = self.try_decode()? {
                return Ok(frame);
            }

            let read = self.inner.read_buf(&mut self.buf).await?;
            if read == 0 {
                return Err(FrameError::Closed);
            }
        }
    }

    /// Decodes the first buffered value, if complete.
    ///
    /// A value that is well-formed JSON but has the wrong shape for `T` is
    /// still consumed, so the next call starts at the following frame.
    /// Bytes that are not JSON at all cannot be resynchronised and are
    /// dropped.
    fn try_decode<T: DeserializeOwned>(&mut self) -> Result<Option<T>, FrameError> {
        let (result, consumed) = {
            let mut values = serde_json::Deserializer::from_slice(&self.buf).into_iter::<Value>();
            let result = values.next();
            (result, values.byte_offset())
        };

        match result {
            Some(Ok(value)) => {
                self.buf.advance(consumed);
                serde_json::from_value(value)
                    .map(Some)
                    .map_err(FrameError::Decode)
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => {
                self.buf.clear();
                Err(FrameError::Decode(e))
            }
            None => {
                // Only whitespace was buffered.
                self.buf.clear();
                Ok(None)
            }
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AckMessage;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_reads_back_to_back_frames() {
        let (mut client, server) = tokio::io::duplex(64);
        client
            .write_all(br#"{"ack":"a"} {"ack":"b"}["PONG",true]"#)
            .await
            .unwrap();
        drop(client);

        let mut reader = FrameReader::new(server);
        let first: Value = reader.next_frame().await.unwrap();
        let second: Value = reader.next_frame().await.unwrap();
        let third: Value = reader.next_frame().await.unwrap();

        assert_eq!(first, json!({"ack": "a"}));
        assert_eq!(second, json!({"ack": "b"}));
        assert_eq!(third, json!(["PONG", true]));
        assert!(matches!(
            reader.next_frame::<Value>().await,
            Err(FrameError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_waits_for_split_frame() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server);

        let writer = tokio::spawn(async move {
            client.write_all(br#"{"ack":"#).await.unwrap();
            tokio::task::yield_now().await;
            client.write_all(br#""late"}"#).await.unwrap();
            client
        });

        let frame: Value = reader.next_frame().await.unwrap();
        assert_eq!(frame, json!({"ack": "late"}));
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_garbage() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"}not json").await.unwrap();

        let mut reader = FrameReader::new(server);
        assert!(matches!(
            reader.next_frame::<Value>().await,
            Err(FrameError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_shape_frame_is_consumed() {
        let (mut client, server) = tokio::io::duplex(64);
        client
            .write_all(br#"{"status":"busy"}{"ack":"next"}"#)
            .await
            .unwrap();

        let mut reader = FrameReader::new(server);
        assert!(matches!(
            reader.next_frame::<AckMessage>().await,
            Err(FrameError::Decode(_))
        ));
        let ack: AckMessage = reader.next_frame().await.unwrap();
        assert_eq!(ack.ack, "next");
    }

    #[tokio::test]
    async fn test_garbage_is_dropped_before_next_frame() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"}}").await.unwrap();

        let mut reader = FrameReader::new(server);
        assert!(reader.next_frame::<Value>().await.is_err());

        client.write_all(br#"{"ack":"fresh"}"#).await.unwrap();
        let frame: Value = reader.next_frame().await.unwrap();
        assert_eq!(frame, json!({"ack": "fresh"}));
    }
}
