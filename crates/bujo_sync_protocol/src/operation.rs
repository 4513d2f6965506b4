//! Mutation log entries and their payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::entity::EntityKind;
use crate::error::{ProtocolError, ProtocolResult};
use crate::model::{AssignmentRecord, Collection, Event, LocalEntity, Note, Spread, Task};

/// Kind of local write a mutation records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOperation {
    /// The record was created.
    Create,
    /// The record was edited.
    Update,
    /// The record was tombstoned.
    Delete,
}

impl MutationOperation {
    /// Stable identifier used in the outbox table.
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationOperation::Create => "create",
            MutationOperation::Update => "update",
            MutationOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationOperation {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(MutationOperation::Create),
            "update" => Ok(MutationOperation::Update),
            "delete" => Ok(MutationOperation::Delete),
            other => Err(ProtocolError::UnknownValue {
                what: "mutation operation",
                value: other.to_string(),
            }),
        }
    }
}

/// The record captured by a mutation, one variant per entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutationPayload {
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
    /// A task assignment.
    TaskAssignment(AssignmentRecord),
    /// A note assignment.
    NoteAssignment(AssignmentRecord),
}

impl MutationPayload {
    /// Kind of the captured record.
    pub fn kind(&self) -> EntityKind {
        match self {
            MutationPayload::Spread(_) => EntityKind::Spread,
            MutationPayload::Task(_) => EntityKind::Task,
            MutationPayload::Note(_) => EntityKind::Note,
            MutationPayload::Event(_) => EntityKind::Event,
            MutationPayload::Collection(_) => EntityKind::Collection,
            MutationPayload::TaskAssignment(_) => EntityKind::TaskAssignment,
            MutationPayload::NoteAssignment(_) => EntityKind::NoteAssignment,
        }
    }

    /// Identifier of the captured record.
    pub fn id(&self) -> Uuid {
        match self {
            MutationPayload::Spread(e) => e.id,
            MutationPayload::Task(e) => e.id,
            MutationPayload::Note(e) => e.id,
            MutationPayload::Event(e) => e.id,
            MutationPayload::Collection(e) => e.id,
            MutationPayload::TaskAssignment(e) | MutationPayload::NoteAssignment(e) => e.id,
        }
    }

    /// Builds an association payload for an assignment of `parent_kind`.
    pub fn assignment(parent_kind: EntityKind, record: AssignmentRecord) -> ProtocolResult<Self> {
        match parent_kind {
            EntityKind::Task => Ok(MutationPayload::TaskAssignment(record)),
            EntityKind::Note => Ok(MutationPayload::NoteAssignment(record)),
            other => Err(ProtocolError::UnknownValue {
                what: "assignment parent kind",
                value: other.to_string(),
            }),
        }
    }

    /// Encodes the payload as CBOR for the outbox.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| ProtocolError::Payload(e.to_string()))?;
        Ok(bytes)
    }

    /// Decodes an outbox payload.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::Payload(e.to_string()))
    }
}

impl From<LocalEntity> for MutationPayload {
    fn from(entity: LocalEntity) -> Self {
        match entity {
            LocalEntity::Spread(e) => MutationPayload::Spread(e),
            LocalEntity::Task(e) => MutationPayload::Task(e),
            LocalEntity::Note(e) => MutationPayload::Note(e),
            LocalEntity::Event(e) => MutationPayload::Event(e),
            LocalEntity::Collection(e) => MutationPayload::Collection(e),
        }
    }
}

/// A mutation about to be appended to the outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMutation {
    /// Kind of the written record.
    pub entity_type: EntityKind,
    /// Id of the written record.
    pub entity_id: Uuid,
    /// Kind of write.
    pub operation: MutationOperation,
    /// Encoded record.
    pub payload: Vec<u8>,
    /// Fields touched by the write.
    pub changed_fields: Vec<String>,
    /// Time of the local write.
    pub enqueued_at: DateTime<Utc>,
}

impl NewMutation {
    /// Captures `payload` as a mutation written now.
    pub fn new(
        operation: MutationOperation,
        payload: &MutationPayload,
        changed_fields: Vec<String>,
    ) -> ProtocolResult<Self> {
        Ok(Self {
            entity_type: payload.kind(),
            entity_id: payload.id(),
            operation,
            payload: payload.encode()?,
            changed_fields,
            enqueued_at: Utc::now(),
        })
    }

    /// Overrides the write time.
    pub fn at(mut self, enqueued_at: DateTime<Utc>) -> Self {
        self.enqueued_at = enqueued_at;
        self
    }
}

/// A pending entry of the mutation log.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationEntry {
    /// Store-assigned sequence; gives enqueue order.
    pub seq: u64,
    /// Kind of the written record.
    pub entity_type: EntityKind,
    /// Id of the written record.
    pub entity_id: Uuid,
    /// Kind of write.
    pub operation: MutationOperation,
    /// Encoded record.
    pub payload: Vec<u8>,
    /// Fields touched by the write.
    pub changed_fields: Vec<String>,
    /// Failed push attempts so far.
    pub retry_count: u32,
    /// Time of the local write.
    pub enqueued_at: DateTime<Utc>,
}

impl MutationEntry {
    /// Materializes a new mutation under the given sequence number.
    pub fn from_new(seq: u64, mutation: NewMutation) -> Self {
        Self {
            seq,
            entity_type: mutation.entity_type,
            entity_id: mutation.entity_id,
            operation: mutation.operation,
            payload: mutation.payload,
            changed_fields: mutation.changed_fields,
            retry_count: 0,
            enqueued_at: mutation.enqueued_at,
        }
    }

    /// Decodes the payload, checking it matches the entry's kind.
    pub fn decode_payload(&self) -> ProtocolResult<MutationPayload> {
        let payload = MutationPayload::decode(&self.payload)?;
        if payload.kind() != self.entity_type {
            return Err(ProtocolError::KindMismatch {
                expected: self.entity_type,
                actual: payload.kind(),
            });
        }
        Ok(payload)
    }
}
