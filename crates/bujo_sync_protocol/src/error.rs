//! Error types for the sync protocol.

use thiserror::Error;

use crate::entity::EntityKind;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or serializing local records.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A string did not name a known enum value.
    #[error("unknown {what}: {value:?}")]
    UnknownValue {
        /// What was being parsed.
        what: &'static str,
        /// The offending value.
        value: String,
    },

    /// An outbox payload could not be encoded or decoded.
    #[error("payload codec error: {0}")]
    Payload(String),

    /// A payload variant does not match the entry it was stored under.
    #[error("payload kind mismatch: entry is {expected}, payload is {actual}")]
    KindMismatch {
        /// Kind recorded on the mutation entry.
        expected: EntityKind,
        /// Kind of the decoded payload.
        actual: EntityKind,
    },

    /// A timestamp or date could not be parsed.
    #[error("invalid {what}: {value:?}")]
    InvalidFormat {
        /// Format that was expected.
        what: &'static str,
        /// The offending value.
        value: String,
    },
}

/// A pulled row did not have the shape expected for its kind.
///
/// Carries enough context to diagnose schema drift: the row id and
/// revision when present, and the field names the row actually had.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot decode {kind} row {row_id:?} (revision {revision:?}): field `{field}` {reason}; row fields: {fields:?}")]
pub struct DecodeError {
    /// Kind of the row.
    pub kind: EntityKind,
    /// Row id, if it could be read.
    pub row_id: Option<String>,
    /// Row revision, if it could be read.
    pub revision: Option<i64>,
    /// Field that failed.
    pub field: String,
    /// What was wrong with it.
    pub reason: String,
    /// All field names present on the row.
    pub fields: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_display_names_row_and_field() {
        let err = DecodeError {
            kind: EntityKind::Task,
            row_id: Some("abc".into()),
            revision: Some(7),
            field: "title".into(),
            reason: "is missing".into(),
            fields: vec!["id".into(), "revision".into()],
        };
        let text = err.to_string();
        assert!(text.contains("task"));
        assert!(text.contains("abc"));
        assert!(text.contains("title"));
        assert!(text.contains("revision"));
    }
}
