//! Pulled rows → local entities.
//!
//! The remote has already merged field by field, so a pulled row is the
//! authoritative state of its record. Resolution only decides how the row
//! lands locally: replace a standalone entity, fold an association into its
//! parent's assignments, or drop a tombstone.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entity::EntityKind;
use crate::error::DecodeError;
use crate::model::{
    AssignmentRecord, Collection, Event, LocalEntity, Note, Period, Spread, Task,
};
use crate::wire::{FieldReader, RemoteRow};

/// A pulled row decoded into its local shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedRow {
    /// A standalone entity.
    Entity(LocalEntity),
    /// A task or note assignment.
    Assignment {
        /// `TaskAssignment` or `NoteAssignment`.
        kind: EntityKind,
        /// The association row.
        record: AssignmentRecord,
        /// Timestamp the remote kept for `status`.
        status_updated_at: DateTime<Utc>,
    },
}

impl DecodedRow {
    /// Decodes a row of the given kind.
    pub fn decode(kind: EntityKind, row: &RemoteRow) -> Result<Self, DecodeError> {
        let reader = row.reader(kind);
        let decoded = match kind {
            EntityKind::Spread => DecodedRow::Entity(LocalEntity::Spread(decode_spread(&reader)?)),
            EntityKind::Task => DecodedRow::Entity(LocalEntity::Task(decode_task(&reader)?)),
            EntityKind::Note => DecodedRow::Entity(LocalEntity::Note(decode_note(&reader)?)),
            EntityKind::Event => DecodedRow::Entity(LocalEntity::Event(decode_event(&reader)?)),
            EntityKind::Collection => {
                DecodedRow::Entity(LocalEntity::Collection(decode_collection(&reader)?))
            }
            EntityKind::TaskAssignment | EntityKind::NoteAssignment => {
                let record = decode_assignment(kind, &reader)?;
                let status_updated_at = reader
                    .optional_timestamp("status_updated_at")?
                    .unwrap_or(record.created_at);
                DecodedRow::Assignment {
                    kind,
                    record,
                    status_updated_at,
                }
            }
        };
        Ok(decoded)
    }

    /// Kind of the row.
    pub fn kind(&self) -> EntityKind {
        match self {
            DecodedRow::Entity(entity) => entity.kind(),
            DecodedRow::Assignment { kind, .. } => *kind,
        }
    }

    /// The local entity this row lands on: itself, or its parent for
    /// association rows.
    pub fn target(&self) -> (EntityKind, Uuid) {
        match self {
            DecodedRow::Entity(entity) => (entity.kind(), entity.id()),
            DecodedRow::Assignment { kind, record, .. } => (
                kind.parent_kind().unwrap_or(EntityKind::Task),
                record.parent_id,
            ),
        }
    }
}

/// Outcome of resolving one pulled row against local state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Write this entity, replacing any local copy.
    Upsert(LocalEntity),
    /// Hard-delete the local entity.
    Delete {
        /// Kind of the entity.
        kind: EntityKind,
        /// Id of the entity.
        id: Uuid,
    },
    /// Nothing to do.
    Ignore,
    /// An association row whose parent is not stored locally.
    MissingParent {
        /// Kind of the association row.
        kind: EntityKind,
        /// Id of the association row.
        id: Uuid,
        /// Kind of the missing parent.
        parent_kind: EntityKind,
        /// Id of the missing parent.
        parent_id: Uuid,
    },
}

/// Resolves a decoded row against the local entity it targets.
///
/// `existing` is the entity returned by [`DecodedRow::target`]: the same
/// record for standalone rows, the parent for association rows.
pub fn resolve(row: DecodedRow, existing: Option<&LocalEntity>) -> Resolution {
    match row {
        DecodedRow::Entity(entity) => resolve_entity(entity, existing),
        DecodedRow::Assignment {
            kind,
            record,
            status_updated_at,
        } => resolve_assignment(kind, record, status_updated_at, existing),
    }
}

fn resolve_entity(mut incoming: LocalEntity, existing: Option<&LocalEntity>) -> Resolution {
    match (existing, incoming.deleted_at().is_some()) {
        (None, true) => Resolution::Ignore,
        (Some(_), true) => Resolution::Delete {
            kind: incoming.kind(),
            id: incoming.id(),
        },
        (existing, false) => {
            // Assignments travel as their own rows.
            if let (Some(local), Some(slots)) = (
                existing.and_then(LocalEntity::assignments),
                incoming.assignments_mut(),
            ) {
                *slots = local.to_vec();
            }
            Resolution::Upsert(incoming)
        }
    }
}

fn resolve_assignment(
    kind: EntityKind,
    record: AssignmentRecord,
    status_updated_at: DateTime<Utc>,
    existing: Option<&LocalEntity>,
) -> Resolution {
    let parent_kind = kind.parent_kind().unwrap_or(EntityKind::Task);
    let mut parent = match existing {
        Some(parent) if parent.kind() == parent_kind => parent.clone(),
        _ => {
            return Resolution::MissingParent {
                kind,
                id: record.id,
                parent_kind,
                parent_id: record.parent_id,
            }
        }
    };

    match parent.fold_assignment(&record, status_updated_at) {
        Some(true) => Resolution::Upsert(parent),
        _ => Resolution::Ignore,
    }
}

fn decode_spread(reader: &FieldReader<'_>) -> Result<Spread, DecodeError> {
    Ok(Spread {
        id: reader.uuid("id")?,
        period: reader.parse("period")?,
        date: reader.date("date")?,
        custom_name: reader.optional_string("custom_name")?,
        created_at: reader.timestamp("created_at")?,
        deleted_at: reader.optional_timestamp("deleted_at")?,
    })
}

fn decode_task(reader: &FieldReader<'_>) -> Result<Task, DecodeError> {
    Ok(Task {
        id: reader.uuid("id")?,
        title: reader.string("title")?,
        status: reader.parse("status")?,
        period: reader.optional_parse::<Period>("period")?,
        date: reader.optional_date("date")?,
        assignments: Vec::new(),
        created_at: reader.timestamp("created_at")?,
        deleted_at: reader.optional_timestamp("deleted_at")?,
    })
}

fn decode_note(reader: &FieldReader<'_>) -> Result<Note, DecodeError> {
    Ok(Note {
        id: reader.uuid("id")?,
        title: reader.string("title")?,
        content: reader.optional_string("content")?.unwrap_or_default(),
        period: reader.optional_parse::<Period>("period")?,
        date: reader.optional_date("date")?,
        assignments: Vec::new(),
        created_at: reader.timestamp("created_at")?,
        deleted_at: reader.optional_timestamp("deleted_at")?,
    })
}

fn decode_event(reader: &FieldReader<'_>) -> Result<Event, DecodeError> {
    Ok(Event {
        id: reader.uuid("id")?,
        title: reader.string("title")?,
        start_date: reader.date("start_date")?,
        end_date: reader.date("end_date")?,
        all_day: reader.boolean("all_day")?,
        created_at: reader.timestamp("created_at")?,
        deleted_at: reader.optional_timestamp("deleted_at")?,
    })
}

fn decode_collection(reader: &FieldReader<'_>) -> Result<Collection, DecodeError> {
    Ok(Collection {
        id: reader.uuid("id")?,
        title: reader.string("title")?,
        content: reader.optional_string("content")?.unwrap_or_default(),
        created_at: reader.timestamp("created_at")?,
        deleted_at: reader.optional_timestamp("deleted_at")?,
    })
}

fn decode_assignment(
    kind: EntityKind,
    reader: &FieldReader<'_>,
) -> Result<AssignmentRecord, DecodeError> {
    let parent_field = kind
        .parent_field()
        .ok_or_else(|| reader.error("id", "row is not an association"))?;
    Ok(AssignmentRecord {
        id: reader.uuid("id")?,
        parent_id: reader.uuid(parent_field)?,
        period: reader.parse("period")?,
        date: reader.date("date")?,
        status: reader.parse("status")?,
        created_at: reader.timestamp("created_at")?,
        deleted_at: reader.optional_timestamp("deleted_at")?,
    })
}
