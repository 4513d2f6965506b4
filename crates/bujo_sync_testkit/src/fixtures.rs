//! Entity fixtures and remote row builders.
//!
//! Fixtures are created at [`BASE_TIME`] so that any later write stamps
//! its fields with a strictly newer timestamp.

use bujo_sync_protocol::{
    format_date, AssignmentRecord, AssignmentStatus, Collection, EntityKind, Event, LocalEntity,
    Note, Period, Spread, Task, TaskStatus, WireRecord,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

/// Creation time of every fixture.
pub const BASE_TIME: &str = "2024-01-01T00:00:00.000Z";

/// Parses an RFC 3339 timestamp.
pub fn ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .expect("Invalid timestamp")
        .with_timezone(&Utc)
}

/// Builds a calendar date.
pub fn day(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("Invalid date")
}

/// A day spread.
pub fn spread(date: NaiveDate) -> LocalEntity {
    LocalEntity::Spread(Spread {
        id: Uuid::new_v4(),
        period: Period::Day,
        date,
        custom_name: None,
        created_at: ts(BASE_TIME),
        deleted_at: None,
    })
}

/// An open task without placements.
pub fn task(title: &str) -> LocalEntity {
    LocalEntity::Task(Task {
        id: Uuid::new_v4(),
        title: title.to_string(),
        status: TaskStatus::Open,
        period: None,
        date: None,
        assignments: Vec::new(),
        created_at: ts(BASE_TIME),
        deleted_at: None,
    })
}

/// A note without placements.
pub fn note(title: &str, content: &str) -> LocalEntity {
    LocalEntity::Note(Note {
        id: Uuid::new_v4(),
        title: title.to_string(),
        content: content.to_string(),
        period: None,
        date: None,
        assignments: Vec::new(),
        created_at: ts(BASE_TIME),
        deleted_at: None,
    })
}

/// A single-day, all-day event.
pub fn event(title: &str, date: NaiveDate) -> LocalEntity {
    LocalEntity::Event(Event {
        id: Uuid::new_v4(),
        title: title.to_string(),
        start_date: date,
        end_date: date,
        all_day: true,
        created_at: ts(BASE_TIME),
        deleted_at: None,
    })
}

/// An empty collection.
pub fn collection(title: &str) -> LocalEntity {
    LocalEntity::Collection(Collection {
        id: Uuid::new_v4(),
        title: title.to_string(),
        content: String::new(),
        created_at: ts(BASE_TIME),
        deleted_at: None,
    })
}

/// An open day placement of `parent_id`.
pub fn assignment(parent_id: Uuid, date: NaiveDate) -> AssignmentRecord {
    AssignmentRecord {
        id: Uuid::new_v4(),
        parent_id,
        period: Period::Day,
        date,
        status: AssignmentStatus::Open,
        created_at: ts(BASE_TIME),
        deleted_at: None,
    }
}

/// Returns a copy of `entity` tombstoned at `at`.
pub fn tombstoned(entity: &LocalEntity, at: DateTime<Utc>) -> LocalEntity {
    let mut entity = entity.clone();
    match &mut entity {
        LocalEntity::Spread(e) => e.deleted_at = Some(at),
        LocalEntity::Task(e) => e.deleted_at = Some(at),
        LocalEntity::Note(e) => e.deleted_at = Some(at),
        LocalEntity::Event(e) => e.deleted_at = Some(at),
        LocalEntity::Collection(e) => e.deleted_at = Some(at),
    }
    entity
}

/// Builds a row as the remote pull query returns it.
#[derive(Debug, Clone)]
pub struct RowBuilder {
    record: WireRecord,
}

impl RowBuilder {
    /// A row with only the common columns.
    pub fn new(id: Uuid) -> Self {
        let mut record = WireRecord::new();
        record.insert("id".into(), json!(id.to_string()));
        record.insert("created_at".into(), json!(BASE_TIME));
        record.insert("deleted_at".into(), Value::Null);
        Self { record }
    }

    /// A spread row.
    pub fn spread(id: Uuid, period: Period, date: NaiveDate) -> Self {
        Self::new(id)
            .field("period", period.as_str())
            .field("date", format_date(&date))
            .field("custom_name", Value::Null)
    }

    /// An open task row.
    pub fn task(id: Uuid, title: &str) -> Self {
        Self::new(id)
            .field("title", title)
            .field("status", TaskStatus::Open.as_str())
            .field("period", Value::Null)
            .field("date", Value::Null)
    }

    /// A note row.
    pub fn note(id: Uuid, title: &str, content: &str) -> Self {
        Self::new(id)
            .field("title", title)
            .field("content", content)
            .field("period", Value::Null)
            .field("date", Value::Null)
    }

    /// An all-day event row.
    pub fn event(id: Uuid, title: &str, date: NaiveDate) -> Self {
        Self::new(id)
            .field("title", title)
            .field("start_date", format_date(&date))
            .field("end_date", format_date(&date))
            .field("all_day", true)
    }

    /// A collection row.
    pub fn collection(id: Uuid, title: &str) -> Self {
        Self::new(id).field("title", title).field("content", "")
    }

    /// A task or note assignment row.
    pub fn assignment(
        kind: EntityKind,
        id: Uuid,
        parent_id: Uuid,
        date: NaiveDate,
        status: AssignmentStatus,
    ) -> Self {
        let parent_field = kind.parent_field().expect("Not an association kind");
        Self::new(id)
            .field(parent_field, parent_id.to_string())
            .field("period", Period::Day.as_str())
            .field("date", format_date(&date))
            .field("status", status.as_str())
    }

    /// Sets a column.
    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.record.insert(key.to_string(), value.into());
        self
    }

    /// Removes a column.
    pub fn without(mut self, key: &str) -> Self {
        self.record.remove(key);
        self
    }

    /// Sets the `<field>_updated_at` companion of a column.
    pub fn stamped(self, field: &str, at: &str) -> Self {
        self.field(&format!("{field}_updated_at"), at)
    }

    /// Tombstones the row.
    pub fn deleted(self, at: &str) -> Self {
        self.field("deleted_at", at)
    }

    /// Sets the revision.
    pub fn revision(self, revision: i64) -> Self {
        self.field("revision", revision)
    }

    /// Finishes the row.
    pub fn build(self) -> WireRecord {
        self.record
    }
}
