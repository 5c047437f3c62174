use super::{Config, ConfigError};
use crate::sender::expand_endpoint;

const MAX_FLUSH_INTERVAL_SECS: f64 = 86_400.0;
const MAX_SHUTDOWN_TIMEOUT_SECS: f64 = 3_600.0;

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // The template must still be a URL once tenant and key are filled in
        let url = expand_endpoint(&self.endpoint_url_template, &self.tenant, &self.api_key)
            .map_err(|e| ConfigError::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!(
                "Endpoint must use http or https, got '{}'",
                url.scheme()
            )));
        }

        if self.max_batch_count == 0 {
            return Err(ConfigError::InvalidConfig(
                "Max batch count must be greater than 0".to_string(),
            ));
        }

        if self.max_batch_bytes == 0 {
            return Err(ConfigError::InvalidConfig(
                "Max batch bytes must be greater than 0".to_string(),
            ));
        }

        // 0 means unbounded
        if self.max_buffered_records != 0 && self.max_buffered_records < self.max_batch_count {
            return Err(ConfigError::InvalidConfig(format!(
                "Max buffered records ({}) must be at least as large as max batch count ({})",
                self.max_buffered_records, self.max_batch_count
            )));
        }

        if self.flush_threshold == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "Flush threshold must be greater than 0".to_string(),
            ));
        }

        if !(self.flush_interval_secs > 0.0 && self.flush_interval_secs <= MAX_FLUSH_INTERVAL_SECS)
        {
            return Err(ConfigError::InvalidConfig(format!(
                "Flush interval must be between 0 and {} seconds, got {}",
                MAX_FLUSH_INTERVAL_SECS, self.flush_interval_secs
            )));
        }

        if !(self.shutdown_timeout_secs >= 0.0
            && self.shutdown_timeout_secs <= MAX_SHUTDOWN_TIMEOUT_SECS)
        {
            return Err(ConfigError::InvalidConfig(format!(
                "Shutdown timeout must be between 0 and {} seconds, got {}",
                MAX_SHUTDOWN_TIMEOUT_SECS, self.shutdown_timeout_secs
            )));
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        if self.retry_max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "Retry max attempts must be greater than 0".to_string(),
            ));
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "Retry base delay ({}ms) exceeds max delay ({}ms)",
                self.retry_base_delay_ms, self.retry_max_delay_ms
            )));
        }

        Ok(())
    }
}
