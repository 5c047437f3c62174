use super::HttpClient;
use super::serialization::{BatchSerializer, SerializationError};
use crate::buffer::{Batch, BatchFraming};
use crate::domain::DeliveryOutcome;
use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::{
    AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue,
    RETRY_AFTER,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Bodies smaller than this are sent uncompressed even when compression is on.
const COMPRESSION_THRESHOLD: usize = 1024;
/// Longest response body excerpt kept in failure reasons.
const MAX_REASON_BODY: usize = 512;

#[derive(Error, Debug)]
pub enum TransmissionError {
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] SerializationError),
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(String),
}

/// The first response the collector sent, kept for operators debugging a
/// misconfigured endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstResponse {
    pub status: u16,
    pub body: String,
}

/// Anything that can deliver a batch. The delivery worker only talks to
/// this seam, which keeps it testable without a network.
pub trait BatchShipper: Send + Sync + 'static {
    fn send(&self, batch: &Batch) -> impl Future<Output = DeliveryOutcome> + Send;
}

/// Sends batches to the collector over HTTP and classifies the response.
#[derive(Debug, Clone)]
pub struct HttpShipper {
    client: HttpClient,
    serializer: BatchSerializer,
    output_first_response: bool,
    first_response: Arc<Mutex<Option<FirstResponse>>>,
}

impl HttpShipper {
    pub fn new(client: HttpClient, framing: BatchFraming, output_first_response: bool) -> Self {
        Self {
            client,
            serializer: BatchSerializer::new(framing),
            output_first_response,
            first_response: Arc::new(Mutex::new(None)),
        }
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// Shared slot holding the first response, filled only when
    /// `output_first_response` is enabled.
    pub fn first_response_slot(&self) -> Arc<Mutex<Option<FirstResponse>>> {
        Arc::clone(&self.first_response)
    }

    pub fn first_response(&self) -> Option<FirstResponse> {
        self.first_response.lock().clone()
    }

    pub async fn send_batch(&self, batch: &Batch) -> DeliveryOutcome {
        let batch_id = batch.id().to_string();
        let batch_size = batch.size();

        let (payload, compressed) = match self.prepare_payload(batch) {
            Ok(prepared) => prepared,
            Err(e) => {
                error!("Dropping batch {}: {}", batch_id, e);
                return DeliveryOutcome::fatal(e.to_string());
            }
        };
        let headers = match self.build_headers(batch, compressed) {
            Ok(headers) => headers,
            Err(e) => {
                error!("Dropping batch {}: {}", batch_id, e);
                return DeliveryOutcome::fatal(e.to_string());
            }
        };

        let bytes_sent = payload.len();
        debug!(
            "Sending batch {} with {} records ({} bytes)",
            batch_id, batch_size, bytes_sent
        );

        let start = Instant::now();
        let result = self
            .client
            .client
            .post(self.client.endpoint_url().clone())
            .headers(headers)
            .body(payload)
            .send()
            .await;
        let latency = start.elapsed();

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.client.stats.record_request(false, latency);
                let reason = if e.is_timeout() {
                    format!("request timed out after {latency:?}")
                } else {
                    format!("network error: {e}")
                };
                warn!("Failed to send batch {}: {}", batch_id, reason);
                return DeliveryOutcome::retryable(reason);
            }
        };

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        self.client
            .stats
            .record_request(status.is_success(), latency);

        let wants_first = self.output_first_response && self.first_response.lock().is_none();
        let body = if wants_first || !status.is_success() {
            response.text().await.unwrap_or_default()
        } else {
            String::new()
        };

        if wants_first {
            let mut slot = self.first_response.lock();
            if slot.is_none() {
                info!(
                    "First response from collector: HTTP {} {}",
                    status.as_u16(),
                    body
                );
                *slot = Some(FirstResponse {
                    status: status.as_u16(),
                    body: body.clone(),
                });
            }
        }

        let outcome = classify_response(status, retry_after, &body);
        match &outcome {
            DeliveryOutcome::Success => info!(
                "Sent batch {} ({} records, {} bytes) in {:?}",
                batch_id, batch_size, bytes_sent, latency
            ),
            DeliveryOutcome::RetryableFailure { reason, .. } => {
                warn!("Batch {} rejected, will retry: {}", batch_id, reason);
            }
            DeliveryOutcome::FatalFailure { reason } => {
                error!("Batch {} rejected permanently: {}", batch_id, reason);
            }
        }
        outcome
    }

    /// Frames the batch, gzip-compressing it when enabled and worthwhile.
    pub fn prepare_payload(&self, batch: &Batch) -> Result<(Vec<u8>, bool), SerializationError> {
        let body = self.serializer.encode_body(batch)?;
        if self.client.config.enable_compression && body.len() > COMPRESSION_THRESHOLD {
            Ok((self.serializer.compress(&body)?, true))
        } else {
            Ok((body.to_vec(), false))
        }
    }

    pub fn build_headers(
        &self,
        batch: &Batch,
        compressed: bool,
    ) -> Result<HeaderMap, TransmissionError> {
        let mut headers = HeaderMap::new();

        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(self.serializer.framing().content_type()),
        );

        if compressed {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }

        if let Some(auth) = self.client.authorization() {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth).map_err(|e| {
                    TransmissionError::InvalidHeaderValue(format!("Invalid API key: {e}"))
                })?,
            );
        }

        headers.insert(
            HeaderName::from_static("x-batch-id"),
            HeaderValue::from_str(batch.id()).map_err(|e| {
                TransmissionError::InvalidHeaderValue(format!("Invalid batch ID: {e}"))
            })?,
        );

        headers.insert(
            HeaderName::from_static("x-batch-size"),
            HeaderValue::from(batch.size() as u64),
        );

        Ok(headers)
    }
}

impl BatchShipper for HttpShipper {
    async fn send(&self, batch: &Batch) -> DeliveryOutcome {
        self.send_batch(batch).await
    }
}

/// Maps an HTTP status to a delivery outcome.
///
/// 2xx succeeds; 429 and 5xx are retryable; every other status is fatal
/// because resending the same request cannot change the answer.
pub fn classify_response(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> DeliveryOutcome {
    if status.is_success() {
        return DeliveryOutcome::Success;
    }

    let reason = describe(status, body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        DeliveryOutcome::RetryableFailure {
            reason,
            retry_after,
        }
    } else {
        DeliveryOutcome::FatalFailure { reason }
    }
}

fn describe(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return format!("HTTP {status}");
    }
    let excerpt: String = body.chars().take(MAX_REASON_BODY).collect();
    format!("HTTP {status}: {excerpt}")
}

/// Reads `Retry-After` as delta-seconds or an HTTP date.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}
