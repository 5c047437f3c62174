use std::time::Duration;

/// Result of submitting one batch to the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Success,
    /// Network error, timeout, 429 or 5xx. `retry_after` carries the server's
    /// `Retry-After` hint when one was sent.
    RetryableFailure {
        reason: String,
        retry_after: Option<Duration>,
    },
    /// 4xx other than 429, or anything else that resending cannot fix.
    FatalFailure { reason: String },
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Success)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryOutcome::RetryableFailure { .. })
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_retryable()
    }

    pub fn retryable(reason: impl Into<String>) -> Self {
        DeliveryOutcome::RetryableFailure {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        DeliveryOutcome::FatalFailure {
            reason: reason.into(),
        }
    }
}
