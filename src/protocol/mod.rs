//! Forward-protocol records, encoded as JSON frames.
//!
//! Fluentd's `in_forward` accepts JSON arrays alongside MessagePack, so every
//! message mode here serializes to the same array shapes the MessagePack
//! flavour uses: `[tag, time, record, options]` for single messages and
//! `[tag, entries, options]` for batches.

pub mod frame;
pub mod handshake;
pub mod message;

use crate::domain::ClientError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

pub use frame::{FrameError, FrameReader};
pub use handshake::{AuthInfo, Helo, HeloOptions, Ping, Pong};
pub use message::{
    AckMessage, CompressedPackedForwardMessage, ForwardMessage, Message, MessageExt,
    PackedForwardMessage,
};

/// A record that can be written to the forwarder.
///
/// `chunk` is only called when the client requires acknowledgments, and
/// always before `encode`, so implementations that carry the token inside
/// the payload can embed it.
pub trait ChunkEncoder: Send {
    /// Returns the correlation token for this record, assigning one if the
    /// record does not carry it yet.
    fn chunk(&mut self) -> Result<String, ClientError>;

    /// Renders the record into the bytes written on the wire.
    fn encode(&self) -> Result<Vec<u8>, ClientError>;
}

/// Generates a fresh correlation token (a base64-encoded random UUID).
pub fn generate_chunk() -> String {
    STANDARD.encode(Uuid::new_v4().as_bytes())
}

/// Timestamp with nanosecond precision, written as fractional seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventTime {
    pub seconds: i64,
    pub nanoseconds: u32,
}

impl EventTime {
    pub fn new(seconds: i64, nanoseconds: u32) -> Self {
        Self {
            seconds,
            nanoseconds,
        }
    }

    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self::new(now.timestamp(), now.timestamp_subsec_nanos())
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.seconds as f64 + f64::from(self.nanoseconds) / 1_000_000_000.0
    }
}

impl Serialize for EventTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_secs_f64())
    }
}

/// A single `[time, record]` pair inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub time: EventTime,
    pub record: Value,
}

impl Entry {
    pub fn new(time: EventTime, record: Value) -> Self {
        Self { time, record }
    }

    pub fn now(record: Value) -> Self {
        Self::new(EventTime::now(), record)
    }
}

impl Serialize for Entry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(2))?;
        seq.serialize_element(&self.time)?;
        seq.serialize_element(&self.record)?;
        seq.end()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EntryList(pub Vec<Entry>);

impl EntryList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: Entry) {
        self.0.push(entry);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Concatenates the encoded entries into one stream, the payload of
    /// the packed message modes.
    pub fn to_stream(&self) -> Result<Vec<u8>, ClientError> {
        let mut stream = Vec::new();
        for entry in &self.0 {
            serde_json::to_writer(&mut stream, entry)?;
        }
        Ok(stream)
    }
}

impl From<Vec<Entry>> for EntryList {
    fn from(entries: Vec<Entry>) -> Self {
        Self(entries)
    }
}

/// Trailing options element of every message mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed: Option<String>,
}

impl MessageOptions {
    pub fn is_empty(&self) -> bool {
        self.size.is_none() && self.chunk.is_none() && self.compressed.is_none()
    }

    /// Returns the chunk id, generating one on first use.
    pub fn ensure_chunk(&mut self) -> String {
        self.chunk.get_or_insert_with(generate_chunk).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_time_serializes_as_fractional_seconds() {
        let time = EventTime::new(1_700_000_000, 500_000_000);
        let encoded = serde_json::to_string(&time).unwrap();
        assert_eq!(encoded, "1700000000.5");
    }

    #[test]
    fn test_entry_list_stream_is_concatenated_entries() {
        let entries = EntryList::from(vec![
            Entry::new(EventTime::new(1, 0), json!({"a": 1})),
            Entry::new(EventTime::new(2, 0), json!({"b": 2})),
        ]);

        let stream = entries.to_stream().unwrap();
        assert_eq!(stream, br#"[1.0,{"a":1}][2.0,{"b":2}]"#);
    }

    #[test]
    fn test_ensure_chunk_is_stable() {
        let mut options = MessageOptions::default();
        assert!(options.is_empty());

        let first = options.ensure_chunk();
        let second = options.ensure_chunk();
        assert_eq!(first, second);
        assert!(!options.is_empty());
        // 16 random bytes encode to 24 base64 characters
        assert_eq!(first.len(), 24);
    }
}
