//! # Bujo Sync Protocol
//!
//! Pure data types shared by every part of the sync engine.
//!
//! This crate provides:
//! - The closed set of synchronized entity kinds and their push order
//! - The journal data model (spreads, tasks, notes, events, collections)
//! - Mutation log entries and an in-memory mutation log
//! - Per-kind revision cursors
//! - Wire records, the record serializer and the pull-side resolver
//!
//! ## Key Invariants
//!
//! - Standalone kinds are pushed before association kinds
//! - Every mutable field on the wire carries an `<field>_updated_at` companion
//! - Revision cursors never move backwards
//! - Resolving the same pulled row twice yields the same local state
//!
//! This crate performs no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cursor;
mod entity;
mod error;
mod model;
mod operation;
mod oplog;
mod resolver;
mod serializer;
mod wire;

pub use cursor::RevisionCursor;
pub use entity::EntityKind;
pub use error::{DecodeError, ProtocolError, ProtocolResult};
pub use model::{
    Assignment, AssignmentRecord, AssignmentStatus, Collection, Event, LocalEntity, Note, Period,
    Spread, Task, TaskStatus,
};
pub use operation::{MutationEntry, MutationOperation, MutationPayload, NewMutation};
pub use oplog::MutationLog;
pub use resolver::{resolve, DecodedRow, Resolution};
pub use serializer::{serialize, FieldSelection, SerializeContext};
pub use wire::{
    format_date, format_timestamp, parse_date, parse_timestamp, updated_at_key, FieldReader,
    RemoteRow, WireRecord, DATE_FORMAT,
};
