//! Wire records and their field formats.
//!
//! A wire record is a flat JSON object. Timestamps travel as ISO-8601 with
//! millisecond fractions in UTC, pure dates as `yyyy-MM-dd`. Every mutable
//! field `f` of a pushed record carries a companion `f_updated_at`.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

use crate::entity::EntityKind;
use crate::error::{DecodeError, ProtocolError, ProtocolResult};

/// A flat field → value map exchanged with the remote.
pub type WireRecord = serde_json::Map<String, Value>;

/// Date format for fields without a time of day.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Formats a timestamp for the wire.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses a wire timestamp. Any RFC 3339 offset and fraction length is accepted.
pub fn parse_timestamp(value: &str) -> ProtocolResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| ProtocolError::InvalidFormat {
            what: "timestamp",
            value: value.to_string(),
        })
}

/// Formats a pure date for the wire.
pub fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parses a wire date.
pub fn parse_date(value: &str) -> ProtocolResult<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| ProtocolError::InvalidFormat {
        what: "date",
        value: value.to_string(),
    })
}

/// Key of the timestamp companion for a mutable field.
pub fn updated_at_key(field: &str) -> String {
    format!("{field}_updated_at")
}

/// A row returned by a pull query.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRow {
    /// Monotonic server revision of this row.
    pub revision: i64,
    /// All columns of the row, `revision` included.
    pub record: WireRecord,
}

impl RemoteRow {
    /// Wraps a raw record, reading its `revision` column.
    pub fn from_record(kind: EntityKind, record: WireRecord) -> Result<Self, DecodeError> {
        let revision = FieldReader::new(kind, &record, None).integer("revision")?;
        Ok(Self { revision, record })
    }

    /// The row id as sent by the server.
    pub fn id(&self) -> Option<&str> {
        self.record.get("id").and_then(Value::as_str)
    }

    /// Returns true if the row carries a non-null `deleted_at`.
    pub fn is_tombstone(&self) -> bool {
        self.record
            .get("deleted_at")
            .is_some_and(|value| !value.is_null())
    }

    /// A typed reader over this row's fields.
    pub fn reader(&self, kind: EntityKind) -> FieldReader<'_> {
        FieldReader::new(kind, &self.record, Some(self.revision))
    }
}

/// Typed access to the fields of a wire record.
///
/// Required accessors fail on absent or null fields; `optional_*`
/// accessors accept both as `None`. Every failure is a [`DecodeError`]
/// naming the row, its revision and the fields it did have.
pub struct FieldReader<'a> {
    kind: EntityKind,
    record: &'a WireRecord,
    revision: Option<i64>,
}

impl<'a> FieldReader<'a> {
    /// Creates a reader for a record of the given kind.
    pub fn new(kind: EntityKind, record: &'a WireRecord, revision: Option<i64>) -> Self {
        Self {
            kind,
            record,
            revision,
        }
    }

    /// Builds a decode error for `field`.
    pub fn error(&self, field: &str, reason: impl Into<String>) -> DecodeError {
        DecodeError {
            kind: self.kind,
            row_id: self
                .record
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string),
            revision: self.revision,
            field: field.to_string(),
            reason: reason.into(),
            fields: self.record.keys().cloned().collect(),
        }
    }

    fn present(&self, field: &str) -> Option<&'a Value> {
        self.record.get(field).filter(|value| !value.is_null())
    }

    fn required(&self, field: &str) -> Result<&'a Value, DecodeError> {
        self.present(field)
            .ok_or_else(|| self.error(field, "is missing"))
    }

    fn optional_str(&self, field: &str) -> Result<Option<&'a str>, DecodeError> {
        match self.present(field) {
            None => Ok(None),
            Some(value) => value
                .as_str()
                .map(Some)
                .ok_or_else(|| self.error(field, "is not a string")),
        }
    }

    fn str(&self, field: &str) -> Result<&'a str, DecodeError> {
        self.optional_str(field)?
            .ok_or_else(|| self.error(field, "is missing"))
    }

    /// Reads an integer.
    pub fn integer(&self, field: &str) -> Result<i64, DecodeError> {
        self.required(field)?
            .as_i64()
            .ok_or_else(|| self.error(field, "is not an integer"))
    }

    /// Reads a boolean.
    pub fn boolean(&self, field: &str) -> Result<bool, DecodeError> {
        self.required(field)?
            .as_bool()
            .ok_or_else(|| self.error(field, "is not a boolean"))
    }

    /// Reads a UUID.
    pub fn uuid(&self, field: &str) -> Result<Uuid, DecodeError> {
        let raw = self.str(field)?;
        Uuid::parse_str(raw).map_err(|_| self.error(field, format!("is not a uuid: {raw:?}")))
    }

    /// Reads a string.
    pub fn string(&self, field: &str) -> Result<String, DecodeError> {
        self.str(field).map(str::to_string)
    }

    /// Reads a nullable string.
    pub fn optional_string(&self, field: &str) -> Result<Option<String>, DecodeError> {
        Ok(self.optional_str(field)?.map(str::to_string))
    }

    /// Reads a timestamp.
    pub fn timestamp(&self, field: &str) -> Result<DateTime<Utc>, DecodeError> {
        let raw = self.str(field)?;
        parse_timestamp(raw).map_err(|err| self.error(field, err.to_string()))
    }

    /// Reads a nullable timestamp.
    pub fn optional_timestamp(&self, field: &str) -> Result<Option<DateTime<Utc>>, DecodeError> {
        self.optional_str(field)?
            .map(|raw| parse_timestamp(raw).map_err(|err| self.error(field, err.to_string())))
            .transpose()
    }

    /// Reads a pure date.
    pub fn date(&self, field: &str) -> Result<NaiveDate, DecodeError> {
        let raw = self.str(field)?;
        parse_date(raw).map_err(|err| self.error(field, err.to_string()))
    }

    /// Reads a nullable pure date.
    pub fn optional_date(&self, field: &str) -> Result<Option<NaiveDate>, DecodeError> {
        self.optional_str(field)?
            .map(|raw| parse_date(raw).map_err(|err| self.error(field, err.to_string())))
            .transpose()
    }

    /// Reads a string-encoded enum value.
    pub fn parse<T>(&self, field: &str) -> Result<T, DecodeError>
    where
        T: FromStr<Err = ProtocolError>,
    {
        let raw = self.str(field)?;
        raw.parse().map_err(|err: ProtocolError| self.error(field, err.to_string()))
    }

    /// Reads a nullable string-encoded enum value.
    pub fn optional_parse<T>(&self, field: &str) -> Result<Option<T>, DecodeError>
    where
        T: FromStr<Err = ProtocolError>,
    {
        self.optional_str(field)?
            .map(|raw| raw.parse().map_err(|err: ProtocolError| self.error(field, err.to_string())))
            .transpose()
    }
}
