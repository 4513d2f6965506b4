//! The closed set of synchronized entity kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Kind of a synchronized record.
///
/// Standalone kinds come first in [`EntityKind::PUSH_ORDER`]; association
/// kinds reference a standalone parent and must never reach the remote
/// before that parent does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A journal spread (a page for a period and date).
    Spread,
    /// A task.
    Task,
    /// A note.
    Note,
    /// A calendar event.
    Event,
    /// A free-form collection page.
    Collection,
    /// Placement of a task on a spread.
    TaskAssignment,
    /// Placement of a note on a spread.
    NoteAssignment,
}

impl EntityKind {
    /// All kinds in push (and pull) order.
    pub const PUSH_ORDER: [EntityKind; 7] = [
        EntityKind::Spread,
        EntityKind::Task,
        EntityKind::Note,
        EntityKind::Event,
        EntityKind::Collection,
        EntityKind::TaskAssignment,
        EntityKind::NoteAssignment,
    ];

    /// Position of this kind in the push order.
    pub fn push_order(&self) -> usize {
        match self {
            EntityKind::Spread => 0,
            EntityKind::Task => 1,
            EntityKind::Note => 2,
            EntityKind::Event => 3,
            EntityKind::Collection => 4,
            EntityKind::TaskAssignment => 5,
            EntityKind::NoteAssignment => 6,
        }
    }

    /// Name of the remote procedure that merges records of this kind.
    pub fn merge_function(&self) -> &'static str {
        match self {
            EntityKind::Spread => "merge_spread",
            EntityKind::Task => "merge_task",
            EntityKind::Note => "merge_note",
            EntityKind::Event => "merge_event",
            EntityKind::Collection => "merge_collection",
            EntityKind::TaskAssignment => "merge_task_assignment",
            EntityKind::NoteAssignment => "merge_note_assignment",
        }
    }

    /// Remote table that pull queries read from.
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Spread => "spreads",
            EntityKind::Task => "tasks",
            EntityKind::Note => "notes",
            EntityKind::Event => "events",
            EntityKind::Collection => "collections",
            EntityKind::TaskAssignment => "task_assignments",
            EntityKind::NoteAssignment => "note_assignments",
        }
    }

    /// Stable identifier used in the outbox and cursor tables.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Spread => "spread",
            EntityKind::Task => "task",
            EntityKind::Note => "note",
            EntityKind::Event => "event",
            EntityKind::Collection => "collection",
            EntityKind::TaskAssignment => "task_assignment",
            EntityKind::NoteAssignment => "note_assignment",
        }
    }

    /// Returns true for kinds that link a standalone record to a placement.
    pub fn is_association(&self) -> bool {
        self.parent_kind().is_some()
    }

    /// The kind an association record references.
    pub fn parent_kind(&self) -> Option<EntityKind> {
        match self {
            EntityKind::TaskAssignment => Some(EntityKind::Task),
            EntityKind::NoteAssignment => Some(EntityKind::Note),
            _ => None,
        }
    }

    /// Name of the wire field holding the parent id, for association kinds.
    pub fn parent_field(&self) -> Option<&'static str> {
        match self {
            EntityKind::TaskAssignment => Some("task_id"),
            EntityKind::NoteAssignment => Some("note_id"),
            _ => None,
        }
    }

    /// Mutable fields carried with an `<field>_updated_at` companion.
    pub fn mutable_fields(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Spread => &["period", "date", "custom_name", "deleted_at"],
            EntityKind::Task => &["title", "status", "period", "date", "deleted_at"],
            EntityKind::Note => &["title", "content", "period", "date", "deleted_at"],
            EntityKind::Event => &["title", "start_date", "end_date", "all_day", "deleted_at"],
            EntityKind::Collection => &["title", "content", "deleted_at"],
            EntityKind::TaskAssignment | EntityKind::NoteAssignment => {
                &["period", "date", "status", "deleted_at"]
            }
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::PUSH_ORDER
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownValue {
                what: "entity kind",
                value: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_order_puts_standalone_kinds_first() {
        let first_association = EntityKind::PUSH_ORDER
            .iter()
            .position(|kind| kind.is_association())
            .unwrap();

        assert!(EntityKind::PUSH_ORDER[..first_association]
            .iter()
            .all(|kind| !kind.is_association()));
        assert!(EntityKind::PUSH_ORDER[first_association..]
            .iter()
            .all(|kind| kind.is_association()));
    }

    #[test]
    fn push_order_index_matches_table() {
        for (index, kind) in EntityKind::PUSH_ORDER.iter().enumerate() {
            assert_eq!(kind.push_order(), index);
        }
    }

    #[test]
    fn parents_precede_their_associations() {
        for kind in EntityKind::PUSH_ORDER {
            if let Some(parent) = kind.parent_kind() {
                assert!(parent.push_order() < kind.push_order());
            }
        }
    }

    #[test]
    fn string_roundtrip() {
        for kind in EntityKind::PUSH_ORDER {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
        assert!("journal".parse::<EntityKind>().is_err());
    }

    #[test]
    fn merge_functions_are_distinct() {
        let mut names: Vec<_> = EntityKind::PUSH_ORDER
            .iter()
            .map(|kind| kind.merge_function())
            .collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 7);
    }
}
