//! Versioned persistence for in-memory state containers.
//! This crate is the single source of truth for persistence invariants:
//! migration completeness, write ordering and singleton store naming.

pub mod error;
pub mod logging;
pub mod migration;
pub mod registry;
pub mod schema;
pub mod storage;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use logging::{
    build_mode, default_log_level, init_logging, init_logging_with, logging_status, LogConfig,
};
pub use migration::{MigrationChain, MigrationError, MigrationStep};
pub use registry::{is_valid_store_name, Registration, RegistryMode, StoreRegistry};
pub use schema::{FieldKind, Schema, SchemaMismatch};
pub use storage::{
    MemoryStorage, Snapshot, SqliteStorage, StorageEngine, StorageError, StorageRecord,
    StorageResult, WriteGate, WriteOutcome,
};
pub use store::{
    CreateOptions, HydrationOutcome, PersistedState, PersistedStore, PersistedStoreFactory,
    StoreDescriptor, Subscription,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
