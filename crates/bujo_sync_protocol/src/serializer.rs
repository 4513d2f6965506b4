//! Local records → wire records.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::model::AssignmentRecord;
use crate::operation::{MutationOperation, MutationPayload};
use crate::wire::{format_date, format_timestamp, updated_at_key, WireRecord};

/// Identity and clock of the write being pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerializeContext {
    /// Signed-in user owning the record.
    pub user_id: Uuid,
    /// Device that made the write.
    pub device_id: Uuid,
    /// Time of the local write.
    pub timestamp: DateTime<Utc>,
}

/// Which mutable fields carry the write timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSelection<'a> {
    /// Every mutable field.
    All,
    /// Only the named fields; the rest are stamped with `created_at`.
    Only(&'a [String]),
}

impl<'a> FieldSelection<'a> {
    /// Selection for a mutation log entry.
    ///
    /// Creates and deletes stamp everything. Updates stamp the changed
    /// fields, or everything when no change list was recorded.
    pub fn for_mutation(operation: MutationOperation, changed_fields: &'a [String]) -> Self {
        match operation {
            MutationOperation::Update if !changed_fields.is_empty() => {
                FieldSelection::Only(changed_fields)
            }
            _ => FieldSelection::All,
        }
    }

    fn contains(&self, field: &str) -> bool {
        match self {
            FieldSelection::All => true,
            FieldSelection::Only(fields) => fields.iter().any(|f| f == field),
        }
    }
}

struct RecordBuilder<'a> {
    record: WireRecord,
    selection: FieldSelection<'a>,
    stamp: String,
    fallback: String,
}

impl<'a> RecordBuilder<'a> {
    fn new(
        id: Uuid,
        created_at: &DateTime<Utc>,
        context: &SerializeContext,
        selection: FieldSelection<'a>,
    ) -> Self {
        let mut record = WireRecord::new();
        record.insert("id".into(), json!(id.to_string()));
        record.insert("user_id".into(), json!(context.user_id.to_string()));
        record.insert("device_id".into(), json!(context.device_id.to_string()));
        record.insert("created_at".into(), json!(format_timestamp(created_at)));
        Self {
            record,
            selection,
            stamp: format_timestamp(&context.timestamp),
            fallback: format_timestamp(created_at),
        }
    }

    fn plain(mut self, key: &str, value: Value) -> Self {
        self.record.insert(key.to_string(), value);
        self
    }

    fn field(mut self, key: &str, value: Value) -> Self {
        let stamp = if self.selection.contains(key) {
            &self.stamp
        } else {
            &self.fallback
        };
        self.record.insert(updated_at_key(key), json!(stamp));
        self.record.insert(key.to_string(), value);
        self
    }

    fn deleted_at(self, deleted_at: &Option<DateTime<Utc>>) -> Self {
        let value = deleted_at
            .as_ref()
            .map_or(Value::Null, |ts| json!(format_timestamp(ts)));
        self.field("deleted_at", value)
    }

    fn finish(self) -> WireRecord {
        self.record
    }
}

fn optional<T>(value: Option<T>, f: impl FnOnce(T) -> String) -> Value {
    value.map_or(Value::Null, |v| json!(f(v)))
}

fn assignment(
    parent_field: &str,
    record: &AssignmentRecord,
    context: &SerializeContext,
    selection: FieldSelection<'_>,
) -> WireRecord {
    RecordBuilder::new(record.id, &record.created_at, context, selection)
        .plain(parent_field, json!(record.parent_id.to_string()))
        .field("period", json!(record.period.as_str()))
        .field("date", json!(format_date(&record.date)))
        .field("status", json!(record.status.as_str()))
        .deleted_at(&record.deleted_at)
        .finish()
}

/// Builds the wire record pushed to the remote merge function.
///
/// The record carries the payload's fields, the user and device ids, and an
/// `<field>_updated_at` companion for every mutable field, `deleted_at`
/// included.
pub fn serialize(
    payload: &MutationPayload,
    context: &SerializeContext,
    selection: FieldSelection<'_>,
) -> WireRecord {
    match payload {
        MutationPayload::Spread(spread) => {
            RecordBuilder::new(spread.id, &spread.created_at, context, selection)
                .field("period", json!(spread.period.as_str()))
                .field("date", json!(format_date(&spread.date)))
                .field("custom_name", optional(spread.custom_name.clone(), |s| s))
                .deleted_at(&spread.deleted_at)
                .finish()
        }
        MutationPayload::Task(task) => {
            RecordBuilder::new(task.id, &task.created_at, context, selection)
                .field("title", json!(task.title))
                .field("status", json!(task.status.as_str()))
                .field("period", optional(task.period, |p| p.as_str().to_string()))
                .field("date", optional(task.date, |d| format_date(&d)))
                .deleted_at(&task.deleted_at)
                .finish()
        }
        MutationPayload::Note(note) => {
            RecordBuilder::new(note.id, &note.created_at, context, selection)
                .field("title", json!(note.title))
                .field("content", json!(note.content))
                .field("period", optional(note.period, |p| p.as_str().to_string()))
                .field("date", optional(note.date, |d| format_date(&d)))
                .deleted_at(&note.deleted_at)
                .finish()
        }
        MutationPayload::Event(event) => {
            RecordBuilder::new(event.id, &event.created_at, context, selection)
                .field("title", json!(event.title))
                .field("start_date", json!(format_date(&event.start_date)))
                .field("end_date", json!(format_date(&event.end_date)))
                .field("all_day", json!(event.all_day))
                .deleted_at(&event.deleted_at)
                .finish()
        }
        MutationPayload::Collection(collection) => {
            RecordBuilder::new(collection.id, &collection.created_at, context, selection)
                .field("title", json!(collection.title))
                .field("content", json!(collection.content))
                .deleted_at(&collection.deleted_at)
                .finish()
        }
        MutationPayload::TaskAssignment(record) => {
            assignment("task_id", record, context, selection)
        }
        MutationPayload::NoteAssignment(record) => {
            assignment("note_id", record, context, selection)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;
    use crate::model::{AssignmentStatus, Period, Task, TaskStatus};
    use chrono::{NaiveDate, TimeZone};
    use pretty_assertions::assert_eq;

    fn context() -> SerializeContext {
        SerializeContext {
            user_id: Uuid::from_u128(1),
            device_id: Uuid::from_u128(2),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        }
    }

    fn task() -> Task {
        Task {
            id: Uuid::from_u128(10),
            title: "buy milk".into(),
            status: TaskStatus::Open,
            period: Some(Period::Day),
            date: NaiveDate::from_ymd_opt(2024, 6, 1),
            assignments: vec![],
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            deleted_at: None,
        }
    }

    #[test]
    fn every_mutable_field_has_a_companion() {
        let record = serialize(&MutationPayload::Task(task()), &context(), FieldSelection::All);

        for field in EntityKind::Task.mutable_fields() {
            assert!(record.contains_key(*field), "missing {field}");
            assert_eq!(
                record[&updated_at_key(field)],
                json!("2024-06-01T12:00:00.000Z")
            );
        }
        assert_eq!(record["user_id"], json!(Uuid::from_u128(1).to_string()));
        assert_eq!(record["device_id"], json!(Uuid::from_u128(2).to_string()));
        assert_eq!(record["date"], json!("2024-06-01"));
        assert_eq!(record["deleted_at"], Value::Null);
    }

    #[test]
    fn update_stamps_only_changed_fields() {
        let changed = vec!["title".to_string()];
        let record = serialize(
            &MutationPayload::Task(task()),
            &context(),
            FieldSelection::for_mutation(MutationOperation::Update, &changed),
        );

        assert_eq!(record["title_updated_at"], json!("2024-06-01T12:00:00.000Z"));
        assert_eq!(record["status_updated_at"], json!("2024-05-01T08:00:00.000Z"));
        assert_eq!(record["deleted_at_updated_at"], json!("2024-05-01T08:00:00.000Z"));
    }

    #[test]
    fn selection_rules() {
        let changed = vec!["title".to_string()];
        assert_eq!(
            FieldSelection::for_mutation(MutationOperation::Create, &changed),
            FieldSelection::All
        );
        assert_eq!(
            FieldSelection::for_mutation(MutationOperation::Delete, &changed),
            FieldSelection::All
        );
        assert_eq!(
            FieldSelection::for_mutation(MutationOperation::Update, &[]),
            FieldSelection::All
        );
    }

    #[test]
    fn assignment_carries_parent_reference() {
        let record = AssignmentRecord {
            id: Uuid::from_u128(20),
            parent_id: Uuid::from_u128(10),
            period: Period::Month,
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            status: AssignmentStatus::Migrated,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            deleted_at: None,
        };
        let wire = serialize(
            &MutationPayload::NoteAssignment(record),
            &context(),
            FieldSelection::All,
        );

        assert_eq!(wire["note_id"], json!(Uuid::from_u128(10).to_string()));
        assert!(!wire.contains_key("note_id_updated_at"));
        assert_eq!(wire["status"], json!("migrated"));
        assert_eq!(wire["period"], json!("month"));
    }
}
