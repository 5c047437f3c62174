use crate::buffer::{Batch, BatchFraming};
use crate::domain::{EnrichedRecord, SerializedPayload};
use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::Write;
use thiserror::Error;

pub const MESSAGE_FIELD: &str = "message";
pub const RAW_MESSAGE_FIELD: &str = "raw_message";
pub const SEVERITY_FIELD: &str = "severity";
/// Prepended to a context field whose name collides with a reserved key.
pub const CONTEXT_FIELD_PREFIX: &str = "field_";

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("Message is not valid UTF-8: {0}")]
    InvalidEncoding(#[from] std::str::Utf8Error),
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("IO error during serialization: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Batch is empty")]
    EmptyBatch,
}

#[derive(Serialize)]
struct HecEvent<'a> {
    time: f64,
    event: &'a Map<String, Value>,
}

/// Turns an enriched record into one HEC event envelope:
/// `{"time": <epoch seconds>, "event": {...}}`.
///
/// A raw message holding a JSON object is merged into `event` as structured
/// fields; any other message goes under `message`. The raw text is added as
/// `raw_message` only when the record asks for it. Context fields are written
/// last and win on key conflicts with message fields; a context field named
/// `message`, `raw_message` or `severity` is sent as `field_<name>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordFormatter;

impl RecordFormatter {
    pub fn new() -> Self {
        Self
    }

    pub fn format(&self, record: &EnrichedRecord) -> Result<SerializedPayload, SerializationError> {
        let event = &record.event;
        let text = std::str::from_utf8(event.raw_message())?;

        let mut body = Map::new();
        body.insert(
            SEVERITY_FIELD.to_string(),
            Value::String(event.severity().as_str().to_string()),
        );

        match parse_structured(text) {
            Some(structured) => body.extend(structured),
            None => {
                body.insert(MESSAGE_FIELD.to_string(), Value::String(text.to_string()));
            }
        }

        if record.include_raw_message {
            body.insert(RAW_MESSAGE_FIELD.to_string(), Value::String(text.to_string()));
        }

        if let Some(source) = event.source() {
            body.insert("file".to_string(), Value::String(source.file.clone()));
            body.insert("function".to_string(), Value::String(source.function.clone()));
            body.insert("line".to_string(), Value::from(source.line));
        }

        for (key, value) in &record.fields {
            let key = if is_reserved(key) {
                format!("{CONTEXT_FIELD_PREFIX}{key}")
            } else {
                key.clone()
            };
            body.insert(key, Value::String(value.clone()));
        }

        let envelope = HecEvent {
            time: event.timestamp().timestamp_millis() as f64 / 1000.0,
            event: &body,
        };

        Ok(SerializedPayload::from(serde_json::to_vec(&envelope)?))
    }
}

fn is_reserved(key: &str) -> bool {
    matches!(key, MESSAGE_FIELD | RAW_MESSAGE_FIELD | SEVERITY_FIELD)
}

fn parse_structured(text: &str) -> Option<Map<String, Value>> {
    if !text.trim_start().starts_with('{') {
        return None;
    }
    serde_json::from_str::<Map<String, Value>>(text).ok()
}

/// Frames drained records into request bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchSerializer {
    framing: BatchFraming,
}

impl BatchSerializer {
    pub fn new(framing: BatchFraming) -> Self {
        Self { framing }
    }

    pub fn framing(&self) -> BatchFraming {
        self.framing
    }

    pub fn encode_body(&self, batch: &Batch) -> Result<Bytes, SerializationError> {
        if batch.is_empty() {
            return Err(SerializationError::EmptyBatch);
        }

        let mut body = BytesMut::with_capacity(batch.body_len(self.framing));
        match self.framing {
            BatchFraming::Ndjson => {
                for record in batch.records() {
                    body.put_slice(record.payload.as_bytes());
                    body.put_u8(b'\n');
                }
            }
            BatchFraming::JsonArray => {
                body.put_u8(b'[');
                for (i, record) in batch.records().iter().enumerate() {
                    if i > 0 {
                        body.put_u8(b',');
                    }
                    body.put_slice(record.payload.as_bytes());
                }
                body.put_u8(b']');
            }
        }

        Ok(body.freeze())
    }

    pub fn compress(&self, body: &[u8]) -> Result<Vec<u8>, SerializationError> {
        use flate2::{Compression, write::GzEncoder};

        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(body)?;
        Ok(encoder.finish()?)
    }
}
