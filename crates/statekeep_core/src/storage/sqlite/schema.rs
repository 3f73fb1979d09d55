//! Table schema for the SQLite engine.
//!
//! # Responsibility
//! - Register table migrations in strictly increasing order.
//! - Apply pending table migrations atomically.
//!
//! # Invariants
//! - `version` values must remain monotonic.
//! - Applied version is mirrored to `PRAGMA user_version`.

use crate::storage::{StorageError, StorageResult};
use rusqlite::Connection;

#[derive(Debug, Clone, Copy)]
struct TableMigration {
    version: u32,
    sql: &'static str,
}

const TABLE_MIGRATIONS: &[TableMigration] = &[TableMigration {
    version: 1,
    sql: include_str!("0001_kv_items.sql"),
}];

/// Returns the latest table schema version known by this binary.
pub fn latest_schema_version() -> u32 {
    TABLE_MIGRATIONS
        .last()
        .map_or(0, |migration| migration.version)
}

pub(super) fn apply_table_migrations(conn: &mut Connection) -> StorageResult<()> {
    let current_version = current_user_version(conn)?;
    let latest = latest_schema_version();

    if current_version > latest {
        return Err(StorageError::UnsupportedSchemaVersion {
            db_version: current_version,
            latest_supported: latest,
        });
    }

    if current_version == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in TABLE_MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        tx.execute_batch(migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
    }
    tx.commit()?;

    Ok(())
}

fn current_user_version(conn: &Connection) -> StorageResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}
