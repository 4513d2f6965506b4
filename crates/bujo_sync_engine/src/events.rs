//! Bounded log of diagnostic sync events.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Severity of a sync event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    /// Routine progress.
    Info,
    /// Something was skipped or dropped.
    Warning,
    /// A cycle failed.
    Error,
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEventKind {
    /// A cycle entered `Syncing`.
    CycleStarted,
    /// A cycle finished.
    CycleCompleted,
    /// A cycle failed.
    CycleFailed,
    /// A cycle was cancelled.
    CycleCancelled,
    /// A trigger was refused before a cycle started.
    TriggerSkipped,
    /// An outbox entry could not be decoded and was dropped.
    MutationDropped,
    /// A pulled row was skipped.
    RowSkipped,
    /// A pulled page could not be decoded.
    DecodeFailed,
    /// A retry was scheduled.
    RetryScheduled,
    /// Sync state was wiped.
    StateReset,
}

/// One entry of the event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEvent {
    /// When it happened.
    pub at: DateTime<Utc>,
    /// Severity.
    pub level: EventLevel,
    /// What happened.
    pub kind: SyncEventKind,
    /// Human-readable detail.
    pub message: String,
}

/// Ring buffer of the most recent events. The oldest entry is evicted
/// once the capacity is reached.
#[derive(Debug)]
pub struct EventLog {
    entries: VecDeque<SyncEvent>,
    capacity: usize,
}

impl EventLog {
    /// Creates an empty log.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Appends an event.
    pub fn record(&mut self, level: EventLevel, kind: SyncEventKind, message: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(SyncEvent {
            at: Utc::now(),
            level,
            kind,
            message: message.into(),
        });
    }

    /// Events oldest first.
    pub fn snapshot(&self) -> Vec<SyncEvent> {
        self.entries.iter().cloned().collect()
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every event.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
