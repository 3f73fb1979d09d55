//! File-backed storage engine over SQLite.
//!
//! # Responsibility
//! - Persist store records as JSON text in one `kv_items` table.
//! - Keep blocking SQLite calls off the async executor.
//!
//! # Invariants
//! - Every call runs on `spawn_blocking` against one shared connection.
//! - Stored text is always valid JSON produced by `serde_json`.

use super::{StorageEngine, StorageError, StorageResult};
use async_trait::async_trait;
use log::error;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

mod open;
mod schema;

pub use schema::latest_schema_version;

/// SQLite-backed storage engine.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Opens (or creates) a database file.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = open::open_file(path.as_ref())?;
        Ok(Self::from_connection(conn))
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = open::open_memory()?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn run<T, F>(&self, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StorageResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StorageError::Task("sqlite connection lock poisoned".to_string()))?;
            op(&guard)
        })
        .await
        .map_err(|err| StorageError::Task(err.to_string()))?
    }
}

#[async_trait]
impl StorageEngine for SqliteStorage {
    async fn get_item(&self, key: &str) -> StorageResult<Option<Value>> {
        let key = key.to_string();
        let text = self
            .run(move |conn| {
                let text = conn
                    .query_row(
                        "SELECT value FROM kv_items WHERE key = ?1;",
                        [key.as_str()],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(text)
            })
            .await?;

        match text {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn set_item(&self, key: &str, value: Value) -> StorageResult<()> {
        let key = key.to_string();
        let text = serde_json::to_string(&value)?;
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO kv_items (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = (strftime('%s', 'now') * 1000);",
                params![key, text],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove_item(&self, key: &str) {
        let owned_key = key.to_string();
        let result = self
            .run(move |conn| {
                conn.execute("DELETE FROM kv_items WHERE key = ?1;", [owned_key.as_str()])?;
                Ok(())
            })
            .await;

        if let Err(err) = result {
            error!(
                "event=storage_remove module=storage status=error key={} error={}",
                key, err
            );
        }
    }
}
