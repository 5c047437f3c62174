use std::time::Duration;
use tokio::time::Instant;

/// Roughly 30 years out; stands in for deadlines too far away to represent.
pub(crate) fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365 * 30)
}

/// `start + delay`, saturating at [`far_future`].
pub(crate) fn deadline_after(start: Instant, delay: Duration) -> Instant {
    start.checked_add(delay).unwrap_or_else(far_future)
}

/// What asked for a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Interval,
    Threshold,
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// No flush was running; start one now.
    Start,
    /// A flush is running; one more will follow when it completes.
    Coalesced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedulerState {
    Idle,
    Flushing { pending: bool },
}

/// Decides when the delivery worker flushes.
///
/// A flush starts on the interval, when the buffer reaches the threshold, or
/// on request. Only one runs at a time; any number of triggers arriving
/// meanwhile collapse into a single follow-up flush.
#[derive(Debug)]
pub struct FlushScheduler {
    interval: Duration,
    threshold: usize,
    last_flush: Instant,
    state: SchedulerState,
}

impl FlushScheduler {
    pub fn new(interval: Duration, threshold: usize) -> Self {
        Self {
            interval,
            threshold: threshold.max(1),
            last_flush: Instant::now(),
            state: SchedulerState::Idle,
        }
    }

    pub fn on_trigger(&mut self, _trigger: FlushTrigger) -> TriggerDecision {
        match self.state {
            SchedulerState::Idle => {
                self.state = SchedulerState::Flushing { pending: false };
                TriggerDecision::Start
            }
            SchedulerState::Flushing { .. } => {
                self.state = SchedulerState::Flushing { pending: true };
                TriggerDecision::Coalesced
            }
        }
    }

    /// Records the end of a flush. Returns `true` when a coalesced trigger
    /// asks for another flush straight away.
    pub fn on_flush_complete(&mut self) -> bool {
        self.last_flush = Instant::now();
        match self.state {
            SchedulerState::Flushing { pending: true } => {
                self.state = SchedulerState::Flushing { pending: false };
                true
            }
            _ => {
                self.state = SchedulerState::Idle;
                false
            }
        }
    }

    pub fn threshold_reached(&self, buffered: usize) -> bool {
        buffered >= self.threshold
    }

    pub fn next_deadline(&self) -> Instant {
        deadline_after(self.last_flush, self.interval)
    }

    pub fn is_flushing(&self) -> bool {
        matches!(self.state, SchedulerState::Flushing { .. })
    }

    pub fn has_pending(&self) -> bool {
        matches!(self.state, SchedulerState::Flushing { pending: true })
    }
}
