use super::log_level::Severity;
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Where in the application a log event was emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceContext {
    pub file: String,
    pub function: String,
    pub line: u32,
}

impl SourceContext {
    pub fn new(file: impl Into<String>, function: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            function: function.into(),
            line,
        }
    }
}

/// A single application log event.
///
/// The raw message is kept as bytes rather than `String` so the pipeline can
/// accept whatever the front-end hands over and reject undecodable input at
/// formatting time instead of at the call site.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    timestamp: DateTime<Utc>,
    severity: Severity,
    raw_message: Bytes,
    source: Option<SourceContext>,
}

impl LogEvent {
    pub fn new(severity: Severity, raw_message: impl Into<Bytes>) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            raw_message: raw_message.into(),
            source: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_source(mut self, source: SourceContext) -> Self {
        self.source = Some(source);
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn raw_message(&self) -> &Bytes {
        &self.raw_message
    }

    pub fn source(&self) -> Option<&SourceContext> {
        self.source.as_ref()
    }
}
