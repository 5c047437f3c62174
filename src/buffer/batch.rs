use crate::domain::SerializedPayload;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

/// How serialized records are joined into one request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BatchFraming {
    /// One record per line, each terminated by `\n`.
    #[default]
    Ndjson,
    /// A JSON array, records separated by commas.
    JsonArray,
}

impl BatchFraming {
    /// Size of the framed body for `count` records totalling `payload_bytes`.
    pub fn body_len(&self, count: usize, payload_bytes: usize) -> usize {
        match self {
            BatchFraming::Ndjson => payload_bytes + count,
            BatchFraming::JsonArray => payload_bytes + 2 + count.saturating_sub(1),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            BatchFraming::Ndjson => "application/x-ndjson",
            BatchFraming::JsonArray => "application/json",
        }
    }
}

/// Limits applied when cutting a batch off the head of the buffer.
#[derive(Debug, Clone, Copy)]
pub struct BatchLimits {
    pub max_count: usize,
    pub max_bytes: usize,
    pub framing: BatchFraming,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_count: 100,
            max_bytes: 1024 * 1024,
            framing: BatchFraming::Ndjson,
        }
    }
}

/// A serialized record while it sits in the delivery buffer.
#[derive(Debug, Clone)]
pub struct QueuedRecord {
    pub sequence: u64,
    pub enqueued_at: Instant,
    pub payload: SerializedPayload,
}

/// Records drained together and sent in one request.
#[derive(Debug, Clone)]
pub struct Batch {
    id: String,
    records: Vec<QueuedRecord>,
    payload_bytes: usize,
}

impl Batch {
    pub fn new(records: Vec<QueuedRecord>) -> Self {
        let payload_bytes = records.iter().map(|r| r.payload.len()).sum();
        Self {
            id: Uuid::new_v4().to_string(),
            records,
            payload_bytes,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn size(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[QueuedRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<QueuedRecord> {
        self.records
    }

    pub fn payload_bytes(&self) -> usize {
        self.payload_bytes
    }

    pub fn body_len(&self, framing: BatchFraming) -> usize {
        framing.body_len(self.records.len(), self.payload_bytes)
    }

    pub fn first_sequence(&self) -> Option<u64> {
        self.records.first().map(|r| r.sequence)
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.records.last().map(|r| r.sequence)
    }
}
