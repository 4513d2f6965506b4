//! Schema migrations for the SQLite store.

use rusqlite::{Connection, OptionalExtension};

use crate::error::SyncResult;

/// Current schema version.
pub const CURRENT_VERSION: i64 = 2;

/// Runs all pending migrations.
pub fn run(conn: &mut Connection) -> SyncResult<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate(conn, 1, MIGRATION_V1)?;
    }
    if version < 2 {
        migrate(conn, 2, MIGRATION_V2)?;
    }

    Ok(())
}

/// Reads the applied schema version; 0 for a fresh database.
pub fn get_version(conn: &Connection) -> SyncResult<i64> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;
    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i64>>(0)
        })
        .optional()?
        .flatten()
        .unwrap_or(0);
    Ok(version)
}

/// Initial schema: outbox, cursors, entity table.
const MIGRATION_V1: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS sync_mutations (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        operation TEXT NOT NULL,
        payload BLOB NOT NULL,
        changed_fields TEXT NOT NULL DEFAULT '[]',
        retry_count INTEGER NOT NULL DEFAULT 0,
        enqueued_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS sync_cursors (
        entity_type TEXT PRIMARY KEY,
        last_revision INTEGER NOT NULL,
        last_synced_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS entities (
        kind TEXT NOT NULL,
        id TEXT NOT NULL,
        body TEXT NOT NULL,
        deleted_at TEXT,
        PRIMARY KEY (kind, id)
    )",
];

/// Index for per-kind outbox scans.
const MIGRATION_V2: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_sync_mutations_type_seq
        ON sync_mutations(entity_type, seq)",
    "CREATE INDEX IF NOT EXISTS idx_entities_kind ON entities(kind)",
];

fn migrate(conn: &mut Connection, version: i64, statements: &[&str]) -> SyncResult<()> {
    let tx = conn.transaction()?;
    for statement in statements {
        tx.execute(statement, [])?;
    }
    tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    tx.commit()?;

    tracing::info!(version, "migrated sync store schema");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_reaches_current_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_version(&conn).unwrap(), 0);

        run(&mut conn).unwrap();
        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn running_twice_is_a_no_op() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn).unwrap();
        run(&mut conn).unwrap();

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, CURRENT_VERSION);
    }
}
