use super::{ChunkEncoder, EntryList, EventTime, MessageOptions};
use crate::domain::ClientError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::io::Write;

const GZIP: &str = "gzip";

fn to_record<T: Serialize>(record: T) -> Result<Value, ClientError> {
    Ok(serde_json::to_value(record)?)
}

/// Single event: `[tag, unix_seconds, record, options]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub tag: String,
    pub time: i64,
    pub record: Value,
    pub options: MessageOptions,
}

impl Message {
    pub fn new<T: Serialize>(tag: impl Into<String>, record: T) -> Result<Self, ClientError> {
        Ok(Self {
            tag: tag.into(),
            time: chrono::Utc::now().timestamp(),
            record: to_record(record)?,
            options: MessageOptions::default(),
        })
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let with_options = !self.options.is_empty();
        let mut seq = serializer.serialize_seq(Some(if with_options { 4 } else { 3 }))?;
        seq.serialize_element(&self.tag)?;
        seq.serialize_element(&self.time)?;
        seq.serialize_element(&self.record)?;
        if with_options {
            seq.serialize_element(&self.options)?;
        }
        seq.end()
    }
}

impl ChunkEncoder for Message {
    fn chunk(&mut self) -> Result<String, ClientError> {
        Ok(self.options.ensure_chunk())
    }

    fn encode(&self) -> Result<Vec<u8>, ClientError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Single event carrying a nanosecond-precision timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageExt {
    pub tag: String,
    pub time: EventTime,
    pub record: Value,
    pub options: MessageOptions,
}

impl MessageExt {
    pub fn new<T: Serialize>(tag: impl Into<String>, record: T) -> Result<Self, ClientError> {
        Ok(Self {
            tag: tag.into(),
            time: EventTime::now(),
            record: to_record(record)?,
            options: MessageOptions::default(),
        })
    }
}

impl Serialize for MessageExt {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let with_options = !self.options.is_empty();
        let mut seq = serializer.serialize_seq(Some(if with_options { 4 } else { 3 }))?;
        seq.serialize_element(&self.tag)?;
        seq.serialize_element(&self.time)?;
        seq.serialize_element(&self.record)?;
        if with_options {
            seq.serialize_element(&self.options)?;
        }
        seq.end()
    }
}

impl ChunkEncoder for MessageExt {
    fn chunk(&mut self) -> Result<String, ClientError> {
        Ok(self.options.ensure_chunk())
    }

    fn encode(&self) -> Result<Vec<u8>, ClientError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Batch of entries: `[tag, [[time, record], ...], options]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardMessage {
    pub tag: String,
    pub entries: EntryList,
    pub options: MessageOptions,
}

impl ForwardMessage {
    pub fn new(tag: impl Into<String>, entries: EntryList) -> Self {
        let options = MessageOptions {
            size: Some(entries.len()),
            ..MessageOptions::default()
        };
        Self {
            tag: tag.into(),
            entries,
            options,
        }
    }
}

impl Serialize for ForwardMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(3))?;
        seq.serialize_element(&self.tag)?;
        seq.serialize_element(&self.entries)?;
        seq.serialize_element(&self.options)?;
        seq.end()
    }
}

impl ChunkEncoder for ForwardMessage {
    fn chunk(&mut self) -> Result<String, ClientError> {
        Ok(self.options.ensure_chunk())
    }

    fn encode(&self) -> Result<Vec<u8>, ClientError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Batch whose entries were already rendered into one stream.
///
/// The stream travels base64-encoded in the second array slot.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedForwardMessage {
    pub tag: String,
    pub entry_stream: Vec<u8>,
    pub options: MessageOptions,
}

impl PackedForwardMessage {
    pub fn new(tag: impl Into<String>, entries: &EntryList) -> Result<Self, ClientError> {
        let mut message = Self::from_bytes(tag, entries.to_stream()?);
        message.options.size = Some(entries.len());
        Ok(message)
    }

    pub fn from_bytes(tag: impl Into<String>, entry_stream: Vec<u8>) -> Self {
        Self {
            tag: tag.into(),
            entry_stream,
            options: MessageOptions::default(),
        }
    }
}

impl Serialize for PackedForwardMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(3))?;
        seq.serialize_element(&self.tag)?;
        seq.serialize_element(&STANDARD.encode(&self.entry_stream))?;
        seq.serialize_element(&self.options)?;
        seq.end()
    }
}

impl ChunkEncoder for PackedForwardMessage {
    fn chunk(&mut self) -> Result<String, ClientError> {
        Ok(self.options.ensure_chunk())
    }

    fn encode(&self) -> Result<Vec<u8>, ClientError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Packed batch compressed with gzip, flagged by `compressed: "gzip"`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedPackedForwardMessage {
    pub tag: String,
    pub compressed_entries: Vec<u8>,
    pub options: MessageOptions,
}

impl CompressedPackedForwardMessage {
    pub fn new(tag: impl Into<String>, entries: &EntryList) -> Result<Self, ClientError> {
        let mut message = Self::from_bytes(tag, &entries.to_stream()?)?;
        message.options.size = Some(entries.len());
        Ok(message)
    }

    /// Compresses an already rendered entry stream.
    pub fn from_bytes(tag: impl Into<String>, entry_stream: &[u8]) -> Result<Self, ClientError> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(entry_stream)
            .map_err(|e| ClientError::EncodingFailure(format!("gzip: {e}")))?;
        let compressed_entries = encoder
            .finish()
            .map_err(|e| ClientError::EncodingFailure(format!("gzip: {e}")))?;

        Ok(Self {
            tag: tag.into(),
            compressed_entries,
            options: MessageOptions {
                compressed: Some(GZIP.to_string()),
                ..MessageOptions::default()
            },
        })
    }
}

impl Serialize for CompressedPackedForwardMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(3))?;
        seq.serialize_element(&self.tag)?;
        seq.serialize_element(&STANDARD.encode(&self.compressed_entries))?;
        seq.serialize_element(&self.options)?;
        seq.end()
    }
}

impl ChunkEncoder for CompressedPackedForwardMessage {
    fn chunk(&mut self) -> Result<String, ClientError> {
        Ok(self.options.ensure_chunk())
    }

    fn encode(&self) -> Result<Vec<u8>, ClientError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Acknowledgment sent back by the forwarder: `{"ack": "<chunk>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMessage {
    pub ack: String,
}
