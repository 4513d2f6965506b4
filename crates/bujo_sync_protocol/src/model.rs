//! Journal entities as they live in the local store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::entity::EntityKind;
use crate::error::ProtocolError;

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $what:literal { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Wire representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ProtocolError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ProtocolError::UnknownValue {
                        what: $what,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum!(
    /// Time span a spread covers.
    Period, "period" {
        /// A whole year.
        Year => "year",
        /// A month.
        Month => "month",
        /// A single day.
        Day => "day",
        /// A custom range of days.
        Multiday => "multiday",
    }
);

string_enum!(
    /// Lifecycle of a task.
    TaskStatus, "task status" {
        /// Not done yet.
        Open => "open",
        /// Done.
        Complete => "complete",
        /// Moved elsewhere.
        Migrated => "migrated",
        /// Dropped.
        Cancelled => "cancelled",
    }
);

string_enum!(
    /// State of one placement of a task or note.
    AssignmentStatus, "assignment status" {
        /// Active on this spread.
        Open => "open",
        /// Completed on this spread.
        Complete => "complete",
        /// Moved to another spread.
        Migrated => "migrated",
        /// Removed from this spread.
        Cancelled => "cancelled",
    }
);

/// A journal page for a period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spread {
    /// Identifier.
    pub id: Uuid,
    /// Period covered.
    pub period: Period,
    /// Anchor date of the period.
    pub date: NaiveDate,
    /// Optional user-chosen title.
    pub custom_name: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Tombstone.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A placement of a task or note on a spread.
///
/// Two assignments denote the same slot when their `(period, date)` match,
/// regardless of which device created them. `id` is the association row
/// that last wrote the slot, so a row moved to another slot replaces its
/// old one instead of adding a second.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Association row id.
    pub id: Uuid,
    /// Period of the target spread.
    pub period: Period,
    /// Date of the target spread.
    pub date: NaiveDate,
    /// State on that spread.
    pub status: AssignmentStatus,
    /// When `status` last changed.
    pub status_updated_at: DateTime<Utc>,
}

impl Assignment {
    /// Returns true if both assignments occupy the same slot.
    pub fn same_slot(&self, period: Period, date: NaiveDate) -> bool {
        self.period == period && self.date == date
    }
}

/// A task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Identifier.
    pub id: Uuid,
    /// Text of the task.
    pub title: String,
    /// Current state.
    pub status: TaskStatus,
    /// Preferred period, if scheduled.
    pub period: Option<Period>,
    /// Preferred date, if scheduled.
    pub date: Option<NaiveDate>,
    /// Placements on spreads.
    pub assignments: Vec<Assignment>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Tombstone.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Identifier.
    pub id: Uuid,
    /// Heading.
    pub title: String,
    /// Body text.
    pub content: String,
    /// Preferred period, if scheduled.
    pub period: Option<Period>,
    /// Preferred date, if scheduled.
    pub date: Option<NaiveDate>,
    /// Placements on spreads.
    pub assignments: Vec<Assignment>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Tombstone.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A calendar event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Identifier.
    pub id: Uuid,
    /// Title.
    pub title: String,
    /// First day.
    pub start_date: NaiveDate,
    /// Last day (inclusive).
    pub end_date: NaiveDate,
    /// Whether the event spans whole days.
    pub all_day: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Tombstone.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A free-form collection page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    /// Identifier.
    pub id: Uuid,
    /// Title.
    pub title: String,
    /// Body text.
    pub content: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Tombstone.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Wire and outbox form of a task or note assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    /// Identifier of the association row.
    pub id: Uuid,
    /// Task or note this assignment belongs to.
    pub parent_id: Uuid,
    /// Period of the target spread.
    pub period: Period,
    /// Date of the target spread.
    pub date: NaiveDate,
    /// State on that spread.
    pub status: AssignmentStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Tombstone.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl AssignmentRecord {
    /// The local sub-record this row folds into.
    pub fn to_assignment(&self, status_updated_at: DateTime<Utc>) -> Assignment {
        Assignment {
            id: self.id,
            period: self.period,
            date: self.date,
            status: self.status,
            status_updated_at,
        }
    }
}

/// A standalone entity held by the local store.
///
/// Association records are not stored on their own: they fold into the
/// `assignments` of their task or note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocalEntity {
    /// A spread.
    Spread(Spread),
    /// A task.
    Task(Task),
    /// A note.
    Note(Note),
    /// An event.
    Event(Event),
    /// A collection.
    Collection(Collection),
}

impl LocalEntity {
    /// Kind of the entity.
    pub fn kind(&self) -> EntityKind {
        match self {
            LocalEntity::Spread(_) => EntityKind::Spread,
            LocalEntity::Task(_) => EntityKind::Task,
            LocalEntity::Note(_) => EntityKind::Note,
            LocalEntity::Event(_) => EntityKind::Event,
            LocalEntity::Collection(_) => EntityKind::Collection,
        }
    }

    /// Identifier of the entity.
    pub fn id(&self) -> Uuid {
        match self {
            LocalEntity::Spread(e) => e.id,
            LocalEntity::Task(e) => e.id,
            LocalEntity::Note(e) => e.id,
            LocalEntity::Event(e) => e.id,
            LocalEntity::Collection(e) => e.id,
        }
    }

    /// Tombstone of the entity.
    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self {
            LocalEntity::Spread(e) => e.deleted_at,
            LocalEntity::Task(e) => e.deleted_at,
            LocalEntity::Note(e) => e.deleted_at,
            LocalEntity::Event(e) => e.deleted_at,
            LocalEntity::Collection(e) => e.deleted_at,
        }
    }

    /// Assignments of a task or note; `None` for other kinds.
    pub fn assignments(&self) -> Option<&[Assignment]> {
        match self {
            LocalEntity::Task(task) => Some(&task.assignments),
            LocalEntity::Note(note) => Some(&note.assignments),
            _ => None,
        }
    }

    /// Mutable assignments of a task or note; `None` for other kinds.
    pub fn assignments_mut(&mut self) -> Option<&mut Vec<Assignment>> {
        match self {
            LocalEntity::Task(task) => Some(&mut task.assignments),
            LocalEntity::Note(note) => Some(&mut note.assignments),
            _ => None,
        }
    }

    /// Folds an association record into this entity's assignments.
    ///
    /// A slot is found by the record's row id first, then by
    /// `(period, date)`. A tombstoned record removes it; anything else
    /// inserts or replaces it, so a row that moved leaves no copy at its
    /// old slot. Returns `None` for kinds without assignments, otherwise
    /// whether the slots changed.
    pub fn fold_assignment(
        &mut self,
        record: &AssignmentRecord,
        status_updated_at: DateTime<Utc>,
    ) -> Option<bool> {
        let slots = self.assignments_mut()?;
        let by_id = slots.iter().position(|slot| slot.id == record.id);
        let by_slot = slots
            .iter()
            .position(|slot| slot.same_slot(record.period, record.date));

        if record.deleted_at.is_some() {
            return Some(match by_id.or(by_slot) {
                Some(index) => {
                    slots.remove(index);
                    true
                }
                None => false,
            });
        }

        let incoming = record.to_assignment(status_updated_at);
        let changed = match (by_id, by_slot) {
            (None, None) => {
                slots.push(incoming);
                true
            }
            (Some(index), None) | (None, Some(index)) => {
                let changed = slots[index] != incoming;
                slots[index] = incoming;
                changed
            }
            (Some(a), Some(b)) if a == b => {
                let changed = slots[a] != incoming;
                slots[a] = incoming;
                changed
            }
            // The row moved onto a slot another row already holds.
            (Some(a), Some(b)) => {
                let (keep, drop) = (a.min(b), a.max(b));
                slots[keep] = incoming;
                slots.remove(drop);
                true
            }
        };
        Some(changed)
    }
}
