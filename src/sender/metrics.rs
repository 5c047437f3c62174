use crate::buffer::BufferMetrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Why a record never reached the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Could not be serialized (e.g. invalid UTF-8).
    Serialization,
    /// Its payload alone is larger than the batch byte limit.
    Oversized,
    /// The collector rejected the batch with a non-retryable status.
    Fatal,
    /// Retries ran out.
    RetryExhausted,
    /// Still buffered when the shutdown flush ended.
    Shutdown,
    /// Submitted after shutdown started.
    Closed,
}

/// Delivery-side counters shared by producers and the delivery worker.
#[derive(Clone, Default)]
pub struct DeliveryMetrics {
    inner: Arc<DeliveryCounters>,
}

#[derive(Default)]
struct DeliveryCounters {
    submitted: AtomicU64,
    http_requests: AtomicU64,
    batches_delivered: AtomicU64,
    records_delivered: AtomicU64,
    retries: AtomicU64,
    dropped_serialization: AtomicU64,
    dropped_oversized: AtomicU64,
    dropped_fatal: AtomicU64,
    dropped_retry_exhausted: AtomicU64,
    dropped_on_shutdown: AtomicU64,
    rejected_closed: AtomicU64,
}

impl DeliveryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request(&self) {
        self.inner.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, records: usize) {
        self.inner.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.inner
            .records_delivered
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, reason: DropReason, records: usize) {
        let counter = match reason {
            DropReason::Serialization => &self.inner.dropped_serialization,
            DropReason::Oversized => &self.inner.dropped_oversized,
            DropReason::Fatal => &self.inner.dropped_fatal,
            DropReason::RetryExhausted => &self.inner.dropped_retry_exhausted,
            DropReason::Shutdown => &self.inner.dropped_on_shutdown,
            DropReason::Closed => &self.inner.rejected_closed,
        };
        counter.fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self, buffer: BufferMetrics) -> MetricsSnapshot {
        let c = &self.inner;
        MetricsSnapshot {
            submitted: c.submitted.load(Ordering::Relaxed),
            http_requests: c.http_requests.load(Ordering::Relaxed),
            batches_delivered: c.batches_delivered.load(Ordering::Relaxed),
            records_delivered: c.records_delivered.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            dropped_overflow: buffer.dropped_overflow,
            dropped_expired: buffer.dropped_expired,
            dropped_serialization: c.dropped_serialization.load(Ordering::Relaxed),
            dropped_oversized: c.dropped_oversized.load(Ordering::Relaxed),
            dropped_fatal: c.dropped_fatal.load(Ordering::Relaxed),
            dropped_retry_exhausted: c.dropped_retry_exhausted.load(Ordering::Relaxed),
            dropped_on_shutdown: c.dropped_on_shutdown.load(Ordering::Relaxed),
            rejected_closed: c.rejected_closed.load(Ordering::Relaxed),
            buffer,
        }
    }
}

impl std::fmt::Debug for DeliveryMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryMetrics")
            .field(
                "records_delivered",
                &self.inner.records_delivered.load(Ordering::Relaxed),
            )
            .field("retries", &self.inner.retries.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Every counter the pipeline keeps, at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub http_requests: u64,
    pub batches_delivered: u64,
    pub records_delivered: u64,
    pub retries: u64,
    pub dropped_overflow: u64,
    pub dropped_expired: u64,
    pub dropped_serialization: u64,
    pub dropped_oversized: u64,
    pub dropped_fatal: u64,
    pub dropped_retry_exhausted: u64,
    pub dropped_on_shutdown: u64,
    pub rejected_closed: u64,
    pub buffer: BufferMetrics,
}

impl MetricsSnapshot {
    pub fn total_dropped(&self) -> u64 {
        self.dropped_overflow
            + self.dropped_expired
            + self.dropped_serialization
            + self.dropped_oversized
            + self.dropped_fatal
            + self.dropped_retry_exhausted
            + self.dropped_on_shutdown
            + self.rejected_closed
    }
}
