use super::fields::ContextFields;
use super::log_event::LogEvent;
use bytes::Bytes;

/// A log event joined with the context fields that were current when it was
/// enriched.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord {
    pub event: LogEvent,
    pub fields: ContextFields,
    pub include_raw_message: bool,
}

/// One serialized record, ready to be framed into a request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedPayload(Bytes);

impl SerializedPayload {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Vec<u8>> for SerializedPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<&'static str> for SerializedPayload {
    fn from(value: &'static str) -> Self {
        Self(Bytes::from_static(value.as_bytes()))
    }
}
