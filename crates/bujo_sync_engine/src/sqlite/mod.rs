//! SQLite-backed local store.
//!
//! One connection guarded by a mutex. Every write that touches both an
//! entity and the outbox runs inside a single immediate transaction.

pub mod migrations;

use bujo_sync_protocol::{
    parse_timestamp, AssignmentRecord, EntityKind, LocalEntity, MutationEntry, MutationOperation,
    NewMutation, RevisionCursor,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::store::{
    assignment_mutation, entity_mutation, fold_assignment, CursorStore, EntityChange, EntityStore,
    LocalStore, LocalWriter, MutationStore,
};

/// A [`LocalStore`] persisted in a SQLite database.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a database file and applies pending migrations.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::with_connection(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> SyncResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(mut conn: Connection) -> SyncResult<Self> {
        migrations::run(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs `f` inside an immediate transaction; commits only if it succeeds.
    fn write<R>(&self, f: impl FnOnce(&Transaction<'_>) -> SyncResult<R>) -> SyncResult<R> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

fn seq_param(seq: u64) -> SyncResult<i64> {
    i64::try_from(seq).map_err(|_| SyncError::Store(format!("sequence {seq} out of range")))
}

fn insert_mutation(tx: &Transaction<'_>, mutation: &NewMutation) -> SyncResult<u64> {
    let changed = serde_json::to_string(&mutation.changed_fields)?;
    tx.execute(
        "INSERT INTO sync_mutations
            (entity_type, entity_id, operation, payload, changed_fields, retry_count, enqueued_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
        params![
            mutation.entity_type.as_str(),
            mutation.entity_id.to_string(),
            mutation.operation.as_str(),
            mutation.payload,
            changed,
            mutation.enqueued_at.to_rfc3339(),
        ],
    )?;
    u64::try_from(tx.last_insert_rowid())
        .map_err(|_| SyncError::Store("negative mutation sequence".into()))
}

fn upsert_entity(tx: &Transaction<'_>, entity: &LocalEntity) -> SyncResult<()> {
    let body = serde_json::to_string(entity)?;
    tx.execute(
        "INSERT INTO entities (kind, id, body, deleted_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(kind, id) DO UPDATE SET body = excluded.body, deleted_at = excluded.deleted_at",
        params![
            entity.kind().as_str(),
            entity.id().to_string(),
            body,
            entity.deleted_at().map(|ts| ts.to_rfc3339()),
        ],
    )?;
    Ok(())
}

fn load_entity(conn: &Connection, kind: EntityKind, id: Uuid) -> SyncResult<Option<LocalEntity>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM entities WHERE kind = ?1 AND id = ?2",
            params![kind.as_str(), id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    body.map(|body| serde_json::from_str(&body).map_err(SyncError::from))
        .transpose()
}

struct MutationRow {
    seq: i64,
    entity_type: String,
    entity_id: String,
    operation: String,
    payload: Vec<u8>,
    changed_fields: String,
    retry_count: i64,
    enqueued_at: String,
}

impl MutationRow {
    fn into_entry(self) -> SyncResult<MutationEntry> {
        let corrupt = |what: &str| SyncError::Store(format!("corrupt outbox row {}: {what}", self.seq));
        Ok(MutationEntry {
            seq: u64::try_from(self.seq).map_err(|_| corrupt("seq"))?,
            entity_type: self.entity_type.parse()?,
            entity_id: Uuid::parse_str(&self.entity_id).map_err(|_| corrupt("entity_id"))?,
            operation: self.operation.parse::<MutationOperation>()?,
            payload: self.payload,
            changed_fields: serde_json::from_str(&self.changed_fields)?,
            retry_count: u32::try_from(self.retry_count).unwrap_or(u32::MAX),
            enqueued_at: parse_timestamp(&self.enqueued_at)?,
        })
    }
}

fn read_mutations(conn: &Connection) -> SyncResult<Vec<MutationRow>> {
    let mut stmt = conn.prepare(
        "SELECT seq, entity_type, entity_id, operation, payload, changed_fields,
                retry_count, enqueued_at
         FROM sync_mutations ORDER BY seq ASC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(MutationRow {
                seq: row.get(0)?,
                entity_type: row.get(1)?,
                entity_id: row.get(2)?,
                operation: row.get(3)?,
                payload: row.get(4)?,
                changed_fields: row.get(5)?,
                retry_count: row.get(6)?,
                enqueued_at: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

impl MutationStore for SqliteStore {
    fn enqueue(&self, mutation: NewMutation) -> SyncResult<u64> {
        self.write(|tx| insert_mutation(tx, &mutation))
    }

    fn drain(&self) -> SyncResult<Vec<MutationEntry>> {
        let rows = read_mutations(&self.conn.lock())?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let seq = row.seq;
                row.into_entry()
                    .map_err(|err| tracing::warn!(seq, error = %err, "skipping corrupt outbox row"))
                    .ok()
            })
            .collect())
    }

    fn purge_corrupt(&self) -> SyncResult<usize> {
        self.write(|tx| {
            let mut purged = 0;
            for row in read_mutations(tx)? {
                let seq = row.seq;
                if let Err(err) = row.into_entry() {
                    tracing::warn!(seq, error = %err, "deleting corrupt outbox row");
                    tx.execute("DELETE FROM sync_mutations WHERE seq = ?1", [seq])?;
                    purged += 1;
                }
            }
            Ok(purged)
        })
    }

    fn remove(&self, seq: u64) -> SyncResult<()> {
        let seq = seq_param(seq)?;
        self.conn
            .lock()
            .execute("DELETE FROM sync_mutations WHERE seq = ?1", [seq])?;
        Ok(())
    }

    fn record_failure(&self, seq: u64) -> SyncResult<()> {
        let seq = seq_param(seq)?;
        self.conn.lock().execute(
            "UPDATE sync_mutations SET retry_count = retry_count + 1 WHERE seq = ?1",
            [seq],
        )?;
        Ok(())
    }

    fn count(&self) -> SyncResult<usize> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM sync_mutations",
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

impl CursorStore for SqliteStore {
    fn cursor(&self, kind: EntityKind) -> SyncResult<RevisionCursor> {
        let row: Option<(i64, Option<String>)> = self
            .conn
            .lock()
            .query_row(
                "SELECT last_revision, last_synced_at FROM sync_cursors WHERE entity_type = ?1",
                [kind.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((last_revision, last_synced_at)) = row else {
            return Ok(RevisionCursor::new(kind));
        };
        Ok(RevisionCursor {
            entity_type: kind,
            last_revision,
            last_synced_at: last_synced_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
        })
    }
}

impl EntityStore for SqliteStore {
    fn get(&self, kind: EntityKind, id: Uuid) -> SyncResult<Option<LocalEntity>> {
        load_entity(&self.conn.lock(), kind, id)
    }

    fn list(&self, kind: EntityKind) -> SyncResult<Vec<LocalEntity>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT body FROM entities WHERE kind = ?1 ORDER BY id")?;
        let bodies = stmt
            .query_map([kind.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(SyncError::from))
            .collect()
    }

    fn apply_pulled(&self, changes: &[EntityChange], cursor: &RevisionCursor) -> SyncResult<()> {
        self.write(|tx| {
            for change in changes {
                match change {
                    EntityChange::Upsert(entity) => upsert_entity(tx, entity)?,
                    EntityChange::Delete { kind, id } => {
                        tx.execute(
                            "DELETE FROM entities WHERE kind = ?1 AND id = ?2",
                            params![kind.as_str(), id.to_string()],
                        )?;
                    }
                }
            }
            tx.execute(
                "INSERT INTO sync_cursors (entity_type, last_revision, last_synced_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(entity_type) DO UPDATE SET
                    last_revision = MAX(last_revision, excluded.last_revision),
                    last_synced_at = excluded.last_synced_at",
                params![
                    cursor.entity_type.as_str(),
                    cursor.last_revision,
                    cursor.last_synced_at.map(|ts| ts.to_rfc3339()),
                ],
            )?;
            Ok(())
        })
    }
}

impl LocalWriter for SqliteStore {
    fn write_entity(
        &self,
        entity: &LocalEntity,
        operation: MutationOperation,
        changed_fields: &[&str],
    ) -> SyncResult<u64> {
        let mutation = entity_mutation(entity, operation, changed_fields)?;
        self.write(|tx| {
            upsert_entity(tx, entity)?;
            insert_mutation(tx, &mutation)
        })
    }

    fn write_assignment(
        &self,
        parent_kind: EntityKind,
        record: &AssignmentRecord,
        operation: MutationOperation,
    ) -> SyncResult<u64> {
        let mutation = assignment_mutation(parent_kind, record, operation)?;
        self.write(|tx| {
            let mut parent = load_entity(tx, parent_kind, record.parent_id)?.ok_or_else(|| {
                SyncError::Store(format!("parent {parent_kind} {} not found", record.parent_id))
            })?;
            fold_assignment(&mut parent, record, mutation.enqueued_at)?;
            upsert_entity(tx, &parent)?;
            insert_mutation(tx, &mutation)
        })
    }
}

impl LocalStore for SqliteStore {
    fn reset_sync_state(&self) -> SyncResult<()> {
        self.write(|tx| {
            tx.execute("DELETE FROM sync_mutations", [])?;
            tx.execute("DELETE FROM sync_cursors", [])?;
            Ok(())
        })
    }
}
