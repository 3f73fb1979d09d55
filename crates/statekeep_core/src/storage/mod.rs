//! Async key-value storage contracts and reference engines.
//!
//! # Responsibility
//! - Define the `StorageEngine` boundary consumed by persisted stores.
//! - Define the persisted wire record (`{ version, state }`).
//! - Provide in-memory and SQLite-backed engines plus the sequenced write gate.
//!
//! # Invariants
//! - `get_item` on a missing key returns `Ok(None)`, never an error.
//! - `remove_item` is best-effort: failures are logged, never propagated.
//! - Records are replaced wholesale on every write.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

mod gate;
mod memory;
pub mod sqlite;

pub use gate::{WriteGate, WriteOutcome};
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Serializable subset of a store's full state selected for persistence.
pub type Snapshot = Map<String, Value>;

pub type StorageResult<T> = Result<T, StorageError>;

/// Backend failure on read or write.
#[derive(Debug)]
pub enum StorageError {
    Sqlite(rusqlite::Error),
    Serialization(serde_json::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// Blocking worker could not complete (panicked or was cancelled).
    Task(String),
    /// Engine-specific failure (quota, I/O, injected test failures).
    Backend(String),
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "storage value is not valid json: {err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "storage schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::Task(message) => write!(f, "storage worker failed: {message}"),
            Self::Backend(message) => write!(f, "storage backend failure: {message}"),
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Serialization(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } | Self::Task(_) | Self::Backend(_) => None,
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// Async key-value backend used by persisted stores.
///
/// Values are arbitrary JSON structures; keys are store names.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Reads one value. Missing keys yield `Ok(None)`.
    async fn get_item(&self, key: &str) -> StorageResult<Option<Value>>;

    /// Writes one value, replacing any previous value for `key`.
    async fn set_item(&self, key: &str, value: Value) -> StorageResult<()>;

    /// Removes one value. Implementations log failures instead of returning them.
    async fn remove_item(&self, key: &str);
}

/// Persisted unit stored under the store name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRecord {
    pub version: u32,
    pub state: Snapshot,
}

impl StorageRecord {
    pub fn new(version: u32, state: Snapshot) -> Self {
        Self { version, state }
    }

    /// Parses a raw engine value into a record.
    ///
    /// Fails when the value is not an object with integer `version` and
    /// object `state` fields.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
