//! Store-level error taxonomy.
//!
//! # Invariants
//! - Only `DuplicateStore`, `InvalidStoreName`, `Migration` (descriptor
//!   validation) and `RuntimeUnavailable` ever fail store creation.
//! - Every other variant reaches callers through the `on_error` callback.

use crate::migration::MigrationError;
use crate::storage::StorageError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    /// Backend read/write failure.
    Storage(StorageError),
    /// Name already reserved in a production registry.
    DuplicateStore(String),
    InvalidStoreName(String),
    Migration(MigrationError),
    /// Load, parse or merge failure, or a panic, while hydrating.
    Hydration { store: String, reason: String },
    /// Full state or snapshot could not be converted to or from JSON.
    Serialization(serde_json::Error),
    /// No tokio runtime was reachable when creating a store.
    RuntimeUnavailable,
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(err) => write!(f, "{err}"),
            Self::DuplicateStore(name) => write!(f, "duplicate store name detected: `{name}`"),
            Self::InvalidStoreName(name) => write!(f, "store name is invalid: `{name}`"),
            Self::Migration(err) => write!(f, "{err}"),
            Self::Hydration { store, reason } => {
                write!(f, "failed to hydrate store `{store}`: {reason}")
            }
            Self::Serialization(err) => write!(f, "store state is not serializable: {err}"),
            Self::RuntimeUnavailable => {
                write!(f, "persisted stores must be created inside a tokio runtime")
            }
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            Self::Migration(err) => Some(err),
            Self::Serialization(err) => Some(err),
            Self::DuplicateStore(_)
            | Self::InvalidStoreName(_)
            | Self::Hydration { .. }
            | Self::RuntimeUnavailable => None,
        }
    }
}

impl From<StorageError> for StoreError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

impl From<MigrationError> for StoreError {
    fn from(value: MigrationError) -> Self {
        Self::Migration(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}
