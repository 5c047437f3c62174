use super::batch::{Batch, BatchLimits, QueuedRecord};
use super::metrics::BufferMetrics;
use crate::domain::SerializedPayload;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

// Prevent excessive memory reservation from a misconfigured bound
const MAX_CAPACITY: usize = 100_000_000;

#[derive(Error, Debug)]
pub enum BufferError {
    #[error("Invalid buffer capacity: {0}")]
    InvalidCapacity(usize),
}

/// Result of a single enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    /// The buffer was full; its oldest record was discarded to make room.
    AcceptedDroppedOldest,
}

struct BufferInner {
    queue: VecDeque<QueuedRecord>,
    next_sequence: u64,
}

/// FIFO queue between producers and the delivery worker.
///
/// Producers call [`enqueue`](Self::enqueue) from any thread; it takes a short
/// lock and never waits for the consumer. When bounded and full, the oldest
/// record is dropped so application logging never stalls.
pub struct DeliveryBuffer {
    inner: Mutex<BufferInner>,
    // 0 = unbounded
    capacity: usize,
    enqueued: AtomicU64,
    drained: AtomicU64,
    requeued: AtomicU64,
    dropped_overflow: AtomicU64,
    dropped_expired: AtomicU64,
    current_len: AtomicUsize,
    peak_size: AtomicUsize,
}

impl DeliveryBuffer {
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        if capacity > MAX_CAPACITY {
            return Err(BufferError::InvalidCapacity(capacity));
        }

        Ok(Self {
            inner: Mutex::new(BufferInner {
                queue: VecDeque::with_capacity(capacity.min(1024)),
                next_sequence: 0,
            }),
            capacity,
            enqueued: AtomicU64::new(0),
            drained: AtomicU64::new(0),
            requeued: AtomicU64::new(0),
            dropped_overflow: AtomicU64::new(0),
            dropped_expired: AtomicU64::new(0),
            current_len: AtomicUsize::new(0),
            peak_size: AtomicUsize::new(0),
        })
    }

    pub fn unbounded() -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                queue: VecDeque::new(),
                next_sequence: 0,
            }),
            capacity: 0,
            enqueued: AtomicU64::new(0),
            drained: AtomicU64::new(0),
            requeued: AtomicU64::new(0),
            dropped_overflow: AtomicU64::new(0),
            dropped_expired: AtomicU64::new(0),
            current_len: AtomicUsize::new(0),
            peak_size: AtomicUsize::new(0),
        }
    }

    /// Maximum number of buffered records, or `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        (self.capacity > 0).then_some(self.capacity)
    }

    pub fn len(&self) -> usize {
        self.current_len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn enqueue(&self, payload: SerializedPayload) -> EnqueueOutcome {
        let mut outcome = EnqueueOutcome::Accepted;
        let len = {
            let mut inner = self.inner.lock();
            if self.capacity > 0 && inner.queue.len() >= self.capacity {
                inner.queue.pop_front();
                self.dropped_overflow.fetch_add(1, Ordering::Relaxed);
                outcome = EnqueueOutcome::AcceptedDroppedOldest;
            }

            let sequence = inner.next_sequence;
            inner.next_sequence += 1;
            inner.queue.push_back(QueuedRecord {
                sequence,
                enqueued_at: Instant::now(),
                payload,
            });

            let len = inner.queue.len();
            self.current_len.store(len, Ordering::Release);
            len
        };

        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.update_peak_size(len);
        outcome
    }

    /// Removes records from the head until the next one would break `limits`.
    ///
    /// At least one record is taken whenever the buffer is non-empty, so a
    /// single oversized head cannot wedge the queue.
    pub fn drain_batch(&self, limits: BatchLimits) -> Batch {
        let max_count = limits.max_count.max(1);
        let mut records = Vec::new();
        let mut payload_bytes = 0usize;

        {
            let mut inner = self.inner.lock();
            while let Some(front) = inner.queue.front() {
                if records.len() >= max_count {
                    break;
                }
                let candidate = payload_bytes + front.payload.len();
                if !records.is_empty()
                    && limits.framing.body_len(records.len() + 1, candidate) > limits.max_bytes
                {
                    break;
                }
                let Some(record) = inner.queue.pop_front() else {
                    break;
                };
                payload_bytes = candidate;
                records.push(record);
            }
            self.current_len.store(inner.queue.len(), Ordering::Release);
        }

        self.drained.fetch_add(records.len() as u64, Ordering::Relaxed);
        Batch::new(records)
    }

    /// Puts a batch back at the head, in its original order.
    ///
    /// If that overflows the bound, the oldest records (the head) are dropped
    /// and counted like any other overflow.
    pub fn requeue_front(&self, batch: Batch) -> usize {
        if batch.is_empty() {
            return 0;
        }

        let count = batch.size() as u64;
        let mut dropped = 0usize;
        let len = {
            let mut inner = self.inner.lock();
            for record in batch.into_records().into_iter().rev() {
                inner.queue.push_front(record);
            }
            if self.capacity > 0 {
                while inner.queue.len() > self.capacity {
                    inner.queue.pop_front();
                    dropped += 1;
                }
            }
            let len = inner.queue.len();
            self.current_len.store(len, Ordering::Release);
            len
        };

        self.requeued.fetch_add(count, Ordering::Relaxed);
        self.dropped_overflow
            .fetch_add(dropped as u64, Ordering::Relaxed);
        self.update_peak_size(len);
        dropped
    }

    /// Drops records that have waited longer than `max_age`.
    pub fn drain_expired(&self, max_age: Duration) -> usize {
        if max_age.is_zero() {
            return 0;
        }

        let now = Instant::now();
        let mut expired = 0usize;
        {
            let mut inner = self.inner.lock();
            // Enqueue times only grow towards the tail, requeued records included.
            while inner
                .queue
                .front()
                .is_some_and(|r| now.duration_since(r.enqueued_at) > max_age)
            {
                inner.queue.pop_front();
                expired += 1;
            }
            self.current_len.store(inner.queue.len(), Ordering::Release);
        }

        self.dropped_expired
            .fetch_add(expired as u64, Ordering::Relaxed);
        expired
    }

    /// Discards everything still buffered and returns how many records that was.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.queue.len();
        inner.queue.clear();
        self.current_len.store(0, Ordering::Release);
        count
    }

    /// Sequence number of the most recently enqueued record.
    pub fn last_sequence(&self) -> Option<u64> {
        self.inner.lock().next_sequence.checked_sub(1)
    }

    pub fn front_sequence(&self) -> Option<u64> {
        self.inner.lock().queue.front().map(|r| r.sequence)
    }

    pub fn metrics(&self) -> BufferMetrics {
        BufferMetrics {
            capacity: self.capacity(),
            len: self.len(),
            peak_len: self.peak_size.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dropped_overflow: self.dropped_overflow.load(Ordering::Relaxed),
            dropped_expired: self.dropped_expired.load(Ordering::Relaxed),
        }
    }

    fn update_peak_size(&self, current_size: usize) {
        let mut peak = self.peak_size.load(Ordering::Relaxed);
        while current_size > peak {
            match self.peak_size.compare_exchange_weak(
                peak,
                current_size,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => peak = x,
            }
        }
    }
}

impl std::fmt::Debug for DeliveryBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("enqueued", &self.enqueued.load(Ordering::Relaxed))
            .field("dropped_overflow", &self.dropped_overflow.load(Ordering::Relaxed))
            .field("peak_size", &self.peak_size.load(Ordering::Relaxed))
            .finish()
    }
}
