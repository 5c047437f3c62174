//! The producer-facing handle and the background delivery worker behind it.

pub mod scheduler;
pub mod worker;

pub use scheduler::{FlushScheduler, FlushTrigger, TriggerDecision};
pub use worker::{BatchState, Command, DeliveryWorker, FlushReport, WorkerSettings};

use crate::app::Config;
use crate::buffer::{BatchLimits, DeliveryBuffer, EnqueueOutcome};
use crate::domain::{FieldsProvider, LogEvent, ShipperError};
use crate::enrich::FieldEnricher;
use crate::reliability::{RetryConfig, RetryPolicy};
use crate::sender::{
    BatchShipper, DeliveryMetrics, DropReason, FirstResponse, HttpClient, HttpShipper,
    MetricsSnapshot, RecordFormatter,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Everything the pipeline needs besides the shipper and the fields source.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub include_raw_message: bool,
    pub limits: BatchLimits,
    /// 0 means unbounded.
    pub max_buffered_records: usize,
    pub flush_interval: Duration,
    pub flush_threshold: usize,
    pub max_record_age: Duration,
    pub shutdown_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let limits = BatchLimits::default();
        Self {
            include_raw_message: false,
            limits,
            max_buffered_records: 10_000,
            flush_interval: Duration::from_secs(5),
            flush_threshold: limits.max_count,
            max_record_age: Duration::ZERO,
            shutdown_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
        }
    }
}

/// Result of handing one event to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// Accepted, but the buffer was full and its oldest record was dropped.
    AcceptedDroppedOldest,
    Rejected(DropReason),
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, SubmitOutcome::Rejected(_))
    }
}

/// Handle used by producers. `submit` never blocks on the network; all
/// delivery happens on a single background task.
pub struct Pipeline {
    buffer: Arc<DeliveryBuffer>,
    enricher: FieldEnricher,
    formatter: RecordFormatter,
    fields: Arc<dyn FieldsProvider>,
    metrics: DeliveryMetrics,
    limits: BatchLimits,
    flush_threshold: usize,
    commands: mpsc::Sender<Command>,
    threshold: Arc<Notify>,
    cancel: CancellationToken,
    closed: AtomicBool,
    worker: Mutex<Option<JoinHandle<FlushReport>>>,
    first_response: Option<Arc<Mutex<Option<FirstResponse>>>>,
}

impl Pipeline {
    /// Builds the HTTP shipper from `config` and starts the delivery worker
    /// on the current tokio runtime.
    pub fn spawn(config: &Config, fields: Arc<dyn FieldsProvider>) -> Result<Self, ShipperError> {
        let client = HttpClient::new(config.client_config())?;
        let shipper = HttpShipper::new(client, config.batch_framing, config.output_first_response);
        let slot = shipper.first_response_slot();

        let mut pipeline = Self::spawn_with_shipper(config.pipeline_settings(), shipper, fields)?;
        pipeline.first_response = Some(slot);
        Ok(pipeline)
    }

    pub fn spawn_with_shipper<S: BatchShipper>(
        settings: PipelineSettings,
        shipper: S,
        fields: Arc<dyn FieldsProvider>,
    ) -> Result<Self, ShipperError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ShipperError::Worker(format!("no tokio runtime: {e}")))?;

        let buffer = Arc::new(DeliveryBuffer::new(settings.max_buffered_records)?);
        let metrics = DeliveryMetrics::new();
        let (commands, receiver) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let threshold = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let flush_threshold = settings.flush_threshold.max(1);

        let worker = DeliveryWorker::new(
            Arc::clone(&buffer),
            shipper,
            RetryPolicy::new(settings.retry.clone()),
            metrics.clone(),
            WorkerSettings {
                limits: settings.limits,
                flush_interval: settings.flush_interval,
                flush_threshold,
                max_record_age: settings.max_record_age,
                shutdown_timeout: settings.shutdown_timeout,
            },
        );
        let handle = runtime.spawn(worker.run(receiver, Arc::clone(&threshold), cancel.clone()));

        Ok(Self {
            buffer,
            enricher: FieldEnricher::new(settings.include_raw_message),
            formatter: RecordFormatter::new(),
            fields,
            metrics,
            limits: settings.limits,
            flush_threshold,
            commands,
            threshold,
            cancel,
            closed: AtomicBool::new(false),
            worker: Mutex::new(Some(handle)),
            first_response: None,
        })
    }

    /// Enriches, formats and buffers `event` on the caller's thread.
    pub fn submit(&self, event: LogEvent) -> SubmitOutcome {
        if self.closed.load(Ordering::Acquire) {
            self.metrics.record_dropped(DropReason::Closed, 1);
            return SubmitOutcome::Rejected(DropReason::Closed);
        }

        let record = self.enricher.enrich(event, self.fields.as_ref());
        let payload = match self.formatter.format(&record) {
            Ok(payload) => payload,
            Err(_) => {
                self.metrics.record_dropped(DropReason::Serialization, 1);
                return SubmitOutcome::Rejected(DropReason::Serialization);
            }
        };

        if self.limits.framing.body_len(1, payload.len()) > self.limits.max_bytes {
            self.metrics.record_dropped(DropReason::Oversized, 1);
            return SubmitOutcome::Rejected(DropReason::Oversized);
        }

        self.metrics.record_submitted();
        let outcome = match self.buffer.enqueue(payload) {
            EnqueueOutcome::Accepted => SubmitOutcome::Accepted,
            EnqueueOutcome::AcceptedDroppedOldest => SubmitOutcome::AcceptedDroppedOldest,
        };

        if self.buffer.len() >= self.flush_threshold {
            self.threshold.notify_one();
        }
        outcome
    }

    /// Asks for a flush without waiting for it.
    pub fn request_flush(&self) {
        let _ = self.commands.try_send(Command::Flush {
            trigger: FlushTrigger::Explicit,
            done: None,
        });
    }

    /// Triggers a flush and waits until a flush cycle covering it completes.
    pub async fn flush(&self) -> Result<FlushReport, ShipperError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ShipperError::ShutDown);
        }
        let (done, wait) = oneshot::channel();
        self.commands
            .send(Command::Flush {
                trigger: FlushTrigger::Explicit,
                done: Some(done),
            })
            .await
            .map_err(|_| ShipperError::ShutDown)?;
        wait.await.map_err(|_| ShipperError::ShutDown)
    }

    /// Stops accepting events, makes one bounded final flush and returns
    /// the final counters. Calling it again just returns the counters.
    pub async fn shutdown(&self) -> Result<MetricsSnapshot, ShipperError> {
        self.closed.store(true, Ordering::Release);
        self.cancel.cancel();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            debug!("Waiting for delivery worker to finish");
            let report = handle
                .await
                .map_err(|e| ShipperError::Worker(e.to_string()))?;
            info!(
                "Pipeline shut down ({} delivered, {} dropped in final flush)",
                report.records_delivered, report.records_dropped
            );
        }
        Ok(self.metrics())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.buffer.metrics())
    }

    /// First collector response, when `output_first_response` is enabled.
    pub fn first_response(&self) -> Option<FirstResponse> {
        self.first_response
            .as_ref()
            .and_then(|slot| slot.lock().clone())
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("buffered", &self.buffer.len())
            .field("closed", &self.is_closed())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}
