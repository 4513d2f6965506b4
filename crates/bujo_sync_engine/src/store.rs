//! Local persistence seams used by the engine.
//!
//! A store keeps three things: the outbox of pending mutations, one
//! revision cursor per entity kind, and the local entities themselves.
//! [`LocalWriter`] is the only way application code should change an
//! entity, because it records the outbox entry in the same atomic step.

use bujo_sync_protocol::{
    AssignmentRecord, EntityKind, LocalEntity, MutationEntry, MutationLog, MutationOperation,
    MutationPayload, NewMutation, RevisionCursor,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

/// The pending-mutation outbox.
pub trait MutationStore: Send + Sync {
    /// Appends a mutation; returns its sequence number.
    fn enqueue(&self, mutation: NewMutation) -> SyncResult<u64>;

    /// All pending entries in enqueue order.
    fn drain(&self) -> SyncResult<Vec<MutationEntry>>;

    /// Removes an entry after a successful push.
    fn remove(&self, seq: u64) -> SyncResult<()>;

    /// Increments an entry's retry counter.
    fn record_failure(&self, seq: u64) -> SyncResult<()>;

    /// Number of pending entries.
    fn count(&self) -> SyncResult<usize>;

    /// Deletes entries that can no longer be read back; returns how many.
    /// Stores that cannot hold such entries keep the default.
    fn purge_corrupt(&self) -> SyncResult<usize> {
        Ok(0)
    }
}

/// Per-kind pull cursors.
pub trait CursorStore: Send + Sync {
    /// The cursor for `kind`, created at revision 0 if never stored.
    fn cursor(&self, kind: EntityKind) -> SyncResult<RevisionCursor>;
}

/// A change applied to the local entity table by a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityChange {
    /// Insert or replace.
    Upsert(LocalEntity),
    /// Hard-delete.
    Delete {
        /// Kind of the entity.
        kind: EntityKind,
        /// Id of the entity.
        id: Uuid,
    },
}

/// Local entity table.
pub trait EntityStore: Send + Sync {
    /// Looks up an entity.
    fn get(&self, kind: EntityKind, id: Uuid) -> SyncResult<Option<LocalEntity>>;

    /// All entities of a kind.
    fn list(&self, kind: EntityKind) -> SyncResult<Vec<LocalEntity>>;

    /// Applies one pulled page and stores the advanced cursor, atomically.
    /// Never touches the outbox.
    fn apply_pulled(&self, changes: &[EntityChange], cursor: &RevisionCursor) -> SyncResult<()>;
}

/// Application-facing writes that pair a local change with its outbox entry.
///
/// If either half fails, neither is recorded.
pub trait LocalWriter {
    /// Writes a standalone entity and enqueues the mutation.
    ///
    /// For `Delete`, the entity should already carry its `deleted_at`
    /// tombstone. `changed_fields` is only meaningful for `Update`.
    fn write_entity(
        &self,
        entity: &LocalEntity,
        operation: MutationOperation,
        changed_fields: &[&str],
    ) -> SyncResult<u64>;

    /// Folds an assignment into its task or note and enqueues the
    /// association mutation. The parent must exist locally.
    fn write_assignment(
        &self,
        parent_kind: EntityKind,
        record: &AssignmentRecord,
        operation: MutationOperation,
    ) -> SyncResult<u64>;
}

/// Everything the engine needs from local storage.
pub trait LocalStore: MutationStore + CursorStore + EntityStore + LocalWriter {
    /// Wipes the outbox and every cursor together. Entities are kept.
    fn reset_sync_state(&self) -> SyncResult<()>;
}

/// Builds the outbox entry for an entity write.
pub(crate) fn entity_mutation(
    entity: &LocalEntity,
    operation: MutationOperation,
    changed_fields: &[&str],
) -> SyncResult<NewMutation> {
    let payload = MutationPayload::from(entity.clone());
    let changed = changed_fields.iter().map(|f| f.to_string()).collect();
    Ok(NewMutation::new(operation, &payload, changed)?)
}

/// Builds the outbox entry for an assignment write.
pub(crate) fn assignment_mutation(
    parent_kind: EntityKind,
    record: &AssignmentRecord,
    operation: MutationOperation,
) -> SyncResult<NewMutation> {
    let payload = MutationPayload::assignment(parent_kind, record.clone())?;
    Ok(NewMutation::new(operation, &payload, Vec::new())?)
}

/// Applies an assignment write to its parent's slots.
pub(crate) fn fold_assignment(
    parent: &mut LocalEntity,
    record: &AssignmentRecord,
    stamped_at: chrono::DateTime<chrono::Utc>,
) -> SyncResult<()> {
    let kind = parent.kind();
    parent
        .fold_assignment(record, stamped_at)
        .map(|_| ())
        .ok_or_else(|| SyncError::Store(format!("{kind} entities do not hold assignments")))
}

fn missing_parent(kind: EntityKind, id: Uuid) -> SyncError {
    SyncError::Store(format!("parent {kind} {id} not found"))
}

#[derive(Debug, Default)]
struct MemoryState {
    log: MutationLog,
    cursors: BTreeMap<EntityKind, RevisionCursor>,
    entities: HashMap<(EntityKind, Uuid), LocalEntity>,
}

/// A [`LocalStore`] held in memory. Every operation runs under one lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entity without recording a mutation, as if it had been
    /// pulled earlier.
    pub fn seed(&self, entity: LocalEntity) {
        self.state
            .lock()
            .entities
            .insert((entity.kind(), entity.id()), entity);
    }
}

impl MutationStore for MemoryStore {
    fn enqueue(&self, mutation: NewMutation) -> SyncResult<u64> {
        Ok(self.state.lock().log.enqueue(mutation))
    }

    fn drain(&self) -> SyncResult<Vec<MutationEntry>> {
        Ok(self.state.lock().log.drain())
    }

    fn remove(&self, seq: u64) -> SyncResult<()> {
        self.state.lock().log.remove(seq);
        Ok(())
    }

    fn record_failure(&self, seq: u64) -> SyncResult<()> {
        self.state.lock().log.record_failure(seq);
        Ok(())
    }

    fn count(&self) -> SyncResult<usize> {
        Ok(self.state.lock().log.count())
    }
}

impl CursorStore for MemoryStore {
    fn cursor(&self, kind: EntityKind) -> SyncResult<RevisionCursor> {
        Ok(self
            .state
            .lock()
            .cursors
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| RevisionCursor::new(kind)))
    }
}

impl EntityStore for MemoryStore {
    fn get(&self, kind: EntityKind, id: Uuid) -> SyncResult<Option<LocalEntity>> {
        Ok(self.state.lock().entities.get(&(kind, id)).cloned())
    }

    fn list(&self, kind: EntityKind) -> SyncResult<Vec<LocalEntity>> {
        let state = self.state.lock();
        let mut entities: Vec<_> = state
            .entities
            .values()
            .filter(|entity| entity.kind() == kind)
            .cloned()
            .collect();
        entities.sort_by_key(LocalEntity::id);
        Ok(entities)
    }

    fn apply_pulled(&self, changes: &[EntityChange], cursor: &RevisionCursor) -> SyncResult<()> {
        let mut state = self.state.lock();
        for change in changes {
            match change {
                EntityChange::Upsert(entity) => {
                    state
                        .entities
                        .insert((entity.kind(), entity.id()), entity.clone());
                }
                EntityChange::Delete { kind, id } => {
                    state.entities.remove(&(*kind, *id));
                }
            }
        }
        state.cursors.insert(cursor.entity_type, cursor.clone());
        Ok(())
    }
}

impl LocalWriter for MemoryStore {
    fn write_entity(
        &self,
        entity: &LocalEntity,
        operation: MutationOperation,
        changed_fields: &[&str],
    ) -> SyncResult<u64> {
        let mutation = entity_mutation(entity, operation, changed_fields)?;
        let mut state = self.state.lock();
        state
            .entities
            .insert((entity.kind(), entity.id()), entity.clone());
        Ok(state.log.enqueue(mutation))
    }

    fn write_assignment(
        &self,
        parent_kind: EntityKind,
        record: &AssignmentRecord,
        operation: MutationOperation,
    ) -> SyncResult<u64> {
        let mutation = assignment_mutation(parent_kind, record, operation)?;
        let mut state = self.state.lock();
        let mut parent = state
            .entities
            .get(&(parent_kind, record.parent_id))
            .cloned()
            .ok_or_else(|| missing_parent(parent_kind, record.parent_id))?;
        fold_assignment(&mut parent, record, mutation.enqueued_at)?;
        state.entities.insert((parent_kind, record.parent_id), parent);
        Ok(state.log.enqueue(mutation))
    }
}

impl LocalStore for MemoryStore {
    fn reset_sync_state(&self) -> SyncResult<()> {
        let mut state = self.state.lock();
        state.log.clear();
        state.cursors.clear();
        Ok(())
    }
}
