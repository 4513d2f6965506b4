//! Sync status state machine.

use chrono::{DateTime, Utc};
use std::fmt;
use tokio::sync::watch;

use crate::error::{SyncError, SyncResult};

/// Externally visible status of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// No cycle has run yet, or the state was reset.
    Idle,
    /// A cycle is running.
    Syncing,
    /// The last cycle completed.
    Synced {
        /// Completion time.
        at: DateTime<Utc>,
    },
    /// The last cycle failed.
    Error {
        /// Failure description.
        message: String,
    },
    /// The device has no connectivity.
    Offline,
    /// Sync is switched off for this build. Absorbing.
    Disabled,
    /// No user is signed in.
    AuthRequired,
}

impl SyncStatus {
    /// Returns true while a cycle is running.
    pub fn is_syncing(&self) -> bool {
        matches!(self, SyncStatus::Syncing)
    }

    /// Returns true for the absorbing disabled status.
    pub fn is_disabled(&self) -> bool {
        matches!(self, SyncStatus::Disabled)
    }

    /// Returns true if the machine may move from `self` to `to`.
    ///
    /// Nothing leaves `Disabled`, and `Syncing` cannot be entered twice.
    pub fn can_transition_to(&self, to: &SyncStatus) -> bool {
        match (self, to) {
            (SyncStatus::Disabled, SyncStatus::Disabled) => true,
            (SyncStatus::Disabled, _) => false,
            (SyncStatus::Syncing, SyncStatus::Syncing) => false,
            _ => true,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced { .. } => "synced",
            SyncStatus::Error { .. } => "error",
            SyncStatus::Offline => "offline",
            SyncStatus::Disabled => "disabled",
            SyncStatus::AuthRequired => "auth_required",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Synced { at } => write!(f, "synced at {at}"),
            SyncStatus::Error { message } => write!(f, "error: {message}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Holds the current status and publishes every change to observers.
#[derive(Debug)]
pub struct StatusMachine {
    current: SyncStatus,
    sender: watch::Sender<SyncStatus>,
}

impl StatusMachine {
    /// Creates a machine starting at `initial`.
    pub fn new(initial: SyncStatus) -> Self {
        let (sender, _) = watch::channel(initial.clone());
        Self {
            current: initial,
            sender,
        }
    }

    /// Current status.
    pub fn current(&self) -> &SyncStatus {
        &self.current
    }

    /// Moves to `to`, notifying observers.
    pub fn transition(&mut self, to: SyncStatus) -> SyncResult<()> {
        if !self.current.can_transition_to(&to) {
            return Err(SyncError::InvalidStateTransition {
                from: self.current.name().to_string(),
                to: to.name().to_string(),
            });
        }
        if self.current != to {
            tracing::debug!(from = %self.current, to = %to, "sync status changed");
        }
        self.current = to.clone();
        self.sender.send_replace(to);
        Ok(())
    }

    /// A receiver that sees the current status and every later change.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_is_absorbing() {
        let mut machine = StatusMachine::new(SyncStatus::Disabled);

        for to in [
            SyncStatus::Idle,
            SyncStatus::Syncing,
            SyncStatus::Offline,
            SyncStatus::AuthRequired,
            SyncStatus::Error {
                message: "x".into(),
            },
        ] {
            assert!(matches!(
                machine.transition(to),
                Err(SyncError::InvalidStateTransition { .. })
            ));
        }
        assert_eq!(machine.current(), &SyncStatus::Disabled);
    }

    #[test]
    fn syncing_cannot_be_entered_twice() {
        let mut machine = StatusMachine::new(SyncStatus::Idle);
        machine.transition(SyncStatus::Syncing).unwrap();
        assert!(machine.transition(SyncStatus::Syncing).is_err());

        machine
            .transition(SyncStatus::Synced { at: Utc::now() })
            .unwrap();
        machine.transition(SyncStatus::Syncing).unwrap();
    }

    #[test]
    fn observers_see_changes() {
        let mut machine = StatusMachine::new(SyncStatus::Idle);
        let mut rx = machine.subscribe();
        assert_eq!(*rx.borrow(), SyncStatus::Idle);

        machine.transition(SyncStatus::Offline).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), SyncStatus::Offline);
    }

    #[test]
    fn display() {
        assert_eq!(SyncStatus::AuthRequired.to_string(), "auth_required");
        assert_eq!(
            SyncStatus::Error {
                message: "boom".into()
            }
            .to_string(),
            "error: boom"
        );
    }
}
