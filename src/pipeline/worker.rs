use super::scheduler::{FlushScheduler, FlushTrigger, TriggerDecision, deadline_after};
use crate::buffer::{Batch, BatchLimits, DeliveryBuffer};
use crate::domain::DeliveryOutcome;
use crate::reliability::{RetryDecision, RetryPolicy};
use crate::sender::{BatchShipper, DeliveryMetrics, DropReason};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::time::{Instant, sleep, sleep_until, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Messages from the pipeline handle to the worker.
#[derive(Debug)]
pub enum Command {
    Flush {
        trigger: FlushTrigger,
        done: Option<oneshot::Sender<FlushReport>>,
    },
}

/// What one flush cycle (or the shutdown flush) accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub requests: usize,
    pub records_delivered: usize,
    pub records_dropped: usize,
    pub retries: usize,
    /// Shutdown cut the cycle short.
    pub interrupted: bool,
}

/// Lifecycle of one batch.
///
/// `Pending -> InFlight -> Delivered | Failed | RetryPending -> InFlight ...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    InFlight { attempt: u32 },
    RetryPending { attempt: u32, delay: Duration },
    Delivered,
    Failed { reason: String, exhausted: bool },
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchState::Delivered | BatchState::Failed { .. })
    }

    /// State after the send numbered `attempt` (1-based) came back with
    /// `outcome`. `since_first_failure` feeds the policy's elapsed-time limit.
    pub fn after_send(
        attempt: u32,
        outcome: DeliveryOutcome,
        policy: &RetryPolicy,
        since_first_failure: Duration,
    ) -> BatchState {
        match outcome {
            DeliveryOutcome::Success => BatchState::Delivered,
            DeliveryOutcome::FatalFailure { reason } => BatchState::Failed {
                reason,
                exhausted: false,
            },
            DeliveryOutcome::RetryableFailure {
                reason,
                retry_after,
            } => match policy.next_delay_after(attempt, since_first_failure) {
                RetryDecision::RetryAfter(delay) => BatchState::RetryPending {
                    attempt,
                    delay: policy.effective_delay(delay, retry_after),
                },
                RetryDecision::GiveUp => BatchState::Failed {
                    reason: format!("giving up after {attempt} attempts: {reason}"),
                    exhausted: true,
                },
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub limits: BatchLimits,
    pub flush_interval: Duration,
    pub flush_threshold: usize,
    pub max_record_age: Duration,
    pub shutdown_timeout: Duration,
}

/// Owns all network I/O: drains the buffer, sends batches one at a time and
/// applies the retry policy.
pub struct DeliveryWorker<S: BatchShipper> {
    buffer: Arc<DeliveryBuffer>,
    shipper: S,
    policy: RetryPolicy,
    metrics: DeliveryMetrics,
    settings: WorkerSettings,
}

impl<S: BatchShipper> DeliveryWorker<S> {
    pub fn new(
        buffer: Arc<DeliveryBuffer>,
        shipper: S,
        policy: RetryPolicy,
        metrics: DeliveryMetrics,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            buffer,
            shipper,
            policy,
            metrics,
            settings,
        }
    }

    /// Runs until `cancel` fires or every pipeline handle is gone, then makes
    /// one bounded final flush and discards whatever is left.
    pub async fn run(
        self,
        mut commands: mpsc::Receiver<Command>,
        threshold: Arc<Notify>,
        cancel: CancellationToken,
    ) -> FlushReport {
        let mut scheduler =
            FlushScheduler::new(self.settings.flush_interval, self.settings.flush_threshold);
        let mut waiters: Vec<oneshot::Sender<FlushReport>> = Vec::new();
        let mut next_waiters: Vec<oneshot::Sender<FlushReport>> = Vec::new();
        let mut handles_open = true;

        info!(
            "Delivery worker started (interval={:?}, threshold={}, max_batch_count={}, max_batch_bytes={})",
            self.settings.flush_interval,
            self.settings.flush_threshold,
            self.settings.limits.max_count,
            self.settings.limits.max_bytes
        );

        'idle: while handles_open {
            let trigger = tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'idle,
                command = commands.recv() => match command {
                    Some(Command::Flush { trigger, done }) => {
                        waiters.extend(done);
                        trigger
                    }
                    None => break 'idle,
                },
                _ = threshold.notified() => {
                    if !scheduler.threshold_reached(self.buffer.len()) {
                        continue 'idle;
                    }
                    FlushTrigger::Threshold
                }
                _ = sleep_until(scheduler.next_deadline()) => FlushTrigger::Interval,
            };

            if scheduler.on_trigger(trigger) == TriggerDecision::Coalesced {
                continue;
            }
            debug!("Flush triggered by {:?}", trigger);

            loop {
                let report = {
                    let cycle = self.flush_cycle(&cancel);
                    tokio::pin!(cycle);
                    loop {
                        tokio::select! {
                            report = &mut cycle => break report,
                            command = commands.recv(), if handles_open => match command {
                                Some(Command::Flush { trigger, done }) => {
                                    next_waiters.extend(done);
                                    scheduler.on_trigger(trigger);
                                }
                                None => handles_open = false,
                            },
                            _ = threshold.notified() => {
                                if scheduler.threshold_reached(self.buffer.len()) {
                                    scheduler.on_trigger(FlushTrigger::Threshold);
                                }
                            }
                        }
                    }
                };

                for waiter in waiters.drain(..) {
                    let _ = waiter.send(report.clone());
                }
                waiters.append(&mut next_waiters);

                let again = scheduler.on_flush_complete();
                if report.interrupted || cancel.is_cancelled() {
                    break 'idle;
                }
                if !again {
                    break;
                }
            }
        }

        let report = self.shutdown_flush().await;
        for waiter in waiters.drain(..).chain(next_waiters.drain(..)) {
            let _ = waiter.send(report.clone());
        }
        info!(
            "Delivery worker stopped (delivered={}, dropped={})",
            report.records_delivered, report.records_dropped
        );
        report
    }

    /// Sends everything enqueued up to the moment the cycle starts, retrying
    /// with backoff. Records enqueued later wait for the next cycle.
    pub async fn flush_cycle(&self, cancel: &CancellationToken) -> FlushReport {
        let mut report = FlushReport::default();

        if !self.settings.max_record_age.is_zero() {
            let expired = self.buffer.drain_expired(self.settings.max_record_age);
            if expired > 0 {
                warn!("Dropped {} records older than {:?}", expired, self.settings.max_record_age);
                report.records_dropped += expired;
            }
        }

        let Some(watermark) = self.buffer.last_sequence() else {
            return report;
        };

        let mut attempt = 0u32;
        let mut first_failure: Option<Instant> = None;
        let mut retrying: Option<u64> = None;

        loop {
            let batch = self.buffer.drain_batch(self.settings.limits);
            if batch.is_empty() {
                break;
            }
            let reached_watermark = batch.last_sequence().is_some_and(|seq| seq >= watermark);
            let size = batch.size();

            // A requeued batch may have lost its head to overflow; different
            // records start a fresh attempt count.
            if retrying.is_some() && retrying != batch.first_sequence() {
                attempt = 0;
                first_failure = None;
            }
            retrying = None;

            attempt += 1;
            let state = self.send_once(&batch, attempt, &mut first_failure, &mut report).await;

            match state {
                BatchState::RetryPending { attempt: failed, delay } => {
                    warn!(
                        "Batch {} failed (attempt {}), retrying in {:?}",
                        batch.id(),
                        failed,
                        delay
                    );
                    self.metrics.record_retry();
                    report.retries += 1;
                    retrying = batch.first_sequence();
                    self.buffer.requeue_front(batch);

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            report.interrupted = true;
                            break;
                        }
                        _ = sleep(delay) => {}
                    }
                }
                BatchState::Delivered => {
                    self.metrics.record_delivered(size);
                    report.records_delivered += size;
                    attempt = 0;
                    first_failure = None;
                    if cancel.is_cancelled() {
                        report.interrupted = true;
                        break;
                    }
                    if reached_watermark {
                        break;
                    }
                }
                BatchState::Failed { reason, exhausted } => {
                    let drop_reason = if exhausted {
                        DropReason::RetryExhausted
                    } else {
                        DropReason::Fatal
                    };
                    error!("Dropping batch {} ({} records): {}", batch.id(), size, reason);
                    self.metrics.record_dropped(drop_reason, size);
                    report.records_dropped += size;
                    attempt = 0;
                    first_failure = None;
                    if cancel.is_cancelled() {
                        report.interrupted = true;
                        break;
                    }
                    if reached_watermark {
                        break;
                    }
                }
                BatchState::Pending | BatchState::InFlight { .. } => {
                    self.buffer.requeue_front(batch);
                    break;
                }
            }
        }

        if report.requests > 0 {
            info!(
                "Flush finished: {} requests, {} delivered, {} dropped, {} retries",
                report.requests, report.records_delivered, report.records_dropped, report.retries
            );
        }
        report
    }

    async fn send_once(
        &self,
        batch: &Batch,
        attempt: u32,
        first_failure: &mut Option<Instant>,
        report: &mut FlushReport,
    ) -> BatchState {
        debug!("Batch {} -> {:?}", batch.id(), BatchState::InFlight { attempt });
        self.metrics.record_request();
        report.requests += 1;

        let outcome = self.shipper.send(batch).await;
        if outcome.is_retryable() {
            first_failure.get_or_insert_with(Instant::now);
        }
        let since_first_failure = first_failure.map_or(Duration::ZERO, |t| t.elapsed());
        BatchState::after_send(attempt, outcome, &self.policy, since_first_failure)
    }

    /// Best-effort final flush: no backoff, bounded by the shutdown timeout.
    /// Anything still buffered afterwards is discarded.
    pub async fn shutdown_flush(&self) -> FlushReport {
        let deadline = deadline_after(Instant::now(), self.settings.shutdown_timeout);
        let mut report = FlushReport::default();

        loop {
            let batch = self.buffer.drain_batch(self.settings.limits);
            if batch.is_empty() {
                break;
            }
            let size = batch.size();
            self.metrics.record_request();
            report.requests += 1;

            match timeout_at(deadline, self.shipper.send(&batch)).await {
                Ok(DeliveryOutcome::Success) => {
                    self.metrics.record_delivered(size);
                    report.records_delivered += size;
                }
                Ok(DeliveryOutcome::FatalFailure { reason }) => {
                    error!("Dropping batch {} ({} records): {}", batch.id(), size, reason);
                    self.metrics.record_dropped(DropReason::Fatal, size);
                    report.records_dropped += size;
                }
                Ok(DeliveryOutcome::RetryableFailure { reason, .. }) => {
                    warn!("Final flush failed, discarding the rest: {}", reason);
                    self.buffer.requeue_front(batch);
                    report.interrupted = true;
                    break;
                }
                Err(_) => {
                    warn!(
                        "Final flush did not finish within {:?}, discarding the rest",
                        self.settings.shutdown_timeout
                    );
                    self.buffer.requeue_front(batch);
                    report.interrupted = true;
                    break;
                }
            }
        }

        let discarded = self.buffer.clear();
        if discarded > 0 {
            warn!("Discarded {} unsent records at shutdown", discarded);
            self.metrics.record_dropped(DropReason::Shutdown, discarded);
            report.records_dropped += discarded;
        }
        report
    }
}
