#[cfg(feature = "metrics")]
pub mod metrics;
pub mod retry;

#[cfg(feature = "metrics")]
pub use metrics::{MetricsError, PrometheusExporter};
pub use retry::{RetryConfig, RetryDecision, RetryPolicy, RetryStrategy};
