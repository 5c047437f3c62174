pub mod batch;
pub mod metrics;
pub mod queue;

pub use batch::{Batch, BatchFraming, BatchLimits, QueuedRecord};
pub use metrics::BufferMetrics;
pub use queue::{BufferError, DeliveryBuffer, EnqueueOutcome};
