use serde::{Deserialize, Serialize};

/// Point-in-time view of the delivery buffer's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferMetrics {
    pub capacity: Option<usize>,
    pub len: usize,
    pub peak_len: usize,
    pub enqueued: u64,
    pub drained: u64,
    pub requeued: u64,
    pub dropped_overflow: u64,
    pub dropped_expired: u64,
}

impl BufferMetrics {
    /// Share of the bound currently in use; always 0 when unbounded.
    pub fn fill_ratio(&self) -> f64 {
        match self.capacity {
            Some(capacity) if capacity > 0 => self.len as f64 / capacity as f64,
            _ => 0.0,
        }
    }
}
