//! In-memory mutation log.

use crate::operation::{MutationEntry, NewMutation};
use std::collections::VecDeque;

/// An ordered outbox of pending mutations.
///
/// # Invariants
///
/// - Entries are kept in enqueue order
/// - Sequence numbers are never reused, even after [`MutationLog::clear`]
/// - Entries are never coalesced
#[derive(Debug)]
pub struct MutationLog {
    entries: VecDeque<MutationEntry>,
    next_seq: u64,
}

impl MutationLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_seq: 1,
        }
    }

    /// Appends a mutation and returns its sequence number.
    pub fn enqueue(&mut self, mutation: NewMutation) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_back(MutationEntry::from_new(seq, mutation));
        seq
    }

    /// Snapshot of all pending entries in enqueue order.
    pub fn drain(&self) -> Vec<MutationEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Removes the entry with the given sequence number.
    ///
    /// Returns false if no such entry is pending.
    pub fn remove(&mut self, seq: u64) -> bool {
        match self.entries.iter().position(|entry| entry.seq == seq) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Increments the retry counter of an entry.
    ///
    /// Returns the new count, or `None` if no such entry is pending.
    pub fn record_failure(&mut self, seq: u64) -> Option<u32> {
        self.entries
            .iter_mut()
            .find(|entry| entry.seq == seq)
            .map(|entry| {
                entry.retry_count = entry.retry_count.saturating_add(1);
                entry.retry_count
            })
    }

    /// Number of pending entries.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every pending entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for MutationLog {
    fn default() -> Self {
        Self::new()
    }
}
