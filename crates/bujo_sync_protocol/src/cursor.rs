//! Per-kind pull cursors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;

/// Highest server revision already pulled for one entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionCursor {
    /// Kind this cursor tracks.
    pub entity_type: EntityKind,
    /// Highest applied revision; 0 before the first pull.
    pub last_revision: i64,
    /// When the cursor last moved.
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl RevisionCursor {
    /// A cursor that has seen nothing yet.
    pub fn new(entity_type: EntityKind) -> Self {
        Self {
            entity_type,
            last_revision: 0,
            last_synced_at: None,
        }
    }

    /// Moves the cursor forward to `revision`.
    ///
    /// A revision at or below the current one leaves the cursor untouched
    /// and returns false.
    pub fn advance(&mut self, revision: i64, at: DateTime<Utc>) -> bool {
        if revision <= self.last_revision {
            return false;
        }
        self.last_revision = revision;
        self.last_synced_at = Some(at);
        true
    }
}
