use crate::sender::MetricsSnapshot;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),
    #[error("Encoded metrics are not UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Mirrors pipeline counters into a Prometheus registry.
///
/// Snapshots carry running totals, so each update only adds the difference
/// since the previous one.
pub struct PrometheusExporter {
    registry: Registry,
    submitted: IntCounter,
    http_requests: IntCounter,
    batches_delivered: IntCounter,
    records_delivered: IntCounter,
    retries: IntCounter,
    dropped: IntCounterVec,
    buffered: IntGauge,
}

impl PrometheusExporter {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let submitted = IntCounter::new("hec_records_submitted_total", "Records handed to the pipeline")?;
        let http_requests = IntCounter::new("hec_http_requests_total", "HTTP requests sent to the collector")?;
        let batches_delivered = IntCounter::new("hec_batches_delivered_total", "Batches accepted by the collector")?;
        let records_delivered = IntCounter::new("hec_records_delivered_total", "Records accepted by the collector")?;
        let retries = IntCounter::new("hec_retries_total", "Batch send retries")?;
        let dropped = IntCounterVec::new(
            Opts::new("hec_records_dropped_total", "Records that were never delivered"),
            &["reason"],
        )?;
        let buffered = IntGauge::new("hec_buffered_records", "Records waiting in the delivery buffer")?;

        registry.register(Box::new(submitted.clone()))?;
        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(batches_delivered.clone()))?;
        registry.register(Box::new(records_delivered.clone()))?;
        registry.register(Box::new(retries.clone()))?;
        registry.register(Box::new(dropped.clone()))?;
        registry.register(Box::new(buffered.clone()))?;

        Ok(Self {
            registry,
            submitted,
            http_requests,
            batches_delivered,
            records_delivered,
            retries,
            dropped,
            buffered,
        })
    }

    pub fn update(&self, snapshot: &MetricsSnapshot) {
        advance(&self.submitted, snapshot.submitted);
        advance(&self.http_requests, snapshot.http_requests);
        advance(&self.batches_delivered, snapshot.batches_delivered);
        advance(&self.records_delivered, snapshot.records_delivered);
        advance(&self.retries, snapshot.retries);

        let drops = [
            ("overflow", snapshot.dropped_overflow),
            ("expired", snapshot.dropped_expired),
            ("serialization", snapshot.dropped_serialization),
            ("oversized", snapshot.dropped_oversized),
            ("fatal", snapshot.dropped_fatal),
            ("retry_exhausted", snapshot.dropped_retry_exhausted),
            ("shutdown", snapshot.dropped_on_shutdown),
            ("closed", snapshot.rejected_closed),
        ];
        for (reason, total) in drops {
            advance(&self.dropped.with_label_values(&[reason]), total);
        }

        self.buffered.set(snapshot.buffer.len as i64);
    }

    pub fn gather_text(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}
