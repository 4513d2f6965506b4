//! Retry scheduling after failed cycles.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::RetryConfig;

/// A retry that is waiting to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledRetry {
    /// Delay the timer was armed with.
    pub delay: Duration,
    /// Wall-clock time the retry is due.
    pub due_at: DateTime<Utc>,
    /// Consecutive failures that led to this retry.
    pub failure_count: u32,
}

#[derive(Debug)]
struct PendingRetry {
    generation: u64,
    info: ScheduledRetry,
    handle: JoinHandle<()>,
}

/// Tracks consecutive failures and owns the single retry timer slot.
///
/// Every armed timer carries a generation. A timer only fires if its
/// generation still owns the slot, so a superseded or cancelled timer that
/// wakes up anyway does nothing.
#[derive(Debug)]
pub struct BackoffScheduler {
    config: RetryConfig,
    failures: u32,
    generation: u64,
    pending: Option<PendingRetry>,
}

impl BackoffScheduler {
    /// Creates a scheduler with no failures recorded.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            failures: 0,
            generation: 0,
            pending: None,
        }
    }

    /// Consecutive failures since the last success.
    pub fn failure_count(&self) -> u32 {
        self.failures
    }

    /// Records a failure and returns the delay before the next attempt.
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.config.delay_for_failure(self.failures)
    }

    /// Clears the failure count and any pending retry.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.cancel();
    }

    /// Cancels the pending retry, if any.
    pub fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(pending) = self.pending.take() {
            pending.handle.abort();
        }
    }

    /// Reserves the slot for a new timer, cancelling the previous one.
    ///
    /// Returns the generation the new timer must present in
    /// [`BackoffScheduler::take_if_current`].
    pub fn next_generation(&mut self) -> u64 {
        self.cancel();
        self.generation
    }

    /// Stores the timer armed for `generation`.
    ///
    /// A handle for a stale generation is aborted instead.
    pub fn arm(&mut self, generation: u64, delay: Duration, handle: JoinHandle<()>) {
        if generation != self.generation {
            handle.abort();
            return;
        }
        let due_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        self.pending = Some(PendingRetry {
            generation,
            info: ScheduledRetry {
                delay,
                due_at,
                failure_count: self.failures,
            },
            handle,
        });
    }

    /// Called by a timer when it wakes. Returns true, and frees the slot,
    /// only if `generation` still owns it.
    pub fn take_if_current(&mut self, generation: u64) -> bool {
        let current = self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.generation == generation);
        if current {
            self.pending = None;
        }
        current
    }

    /// The pending retry, if any.
    pub fn scheduled(&self) -> Option<ScheduledRetry> {
        self.pending.as_ref().map(|pending| pending.info)
    }
}
