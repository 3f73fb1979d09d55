//! Immutable per-store persistence configuration.

use crate::error::{StoreError, StoreResult};
use crate::migration::{MigrationChain, MigrationStep};
use crate::registry::is_valid_store_name;
use crate::schema::Schema;
use crate::storage::Snapshot;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Selector from full state to the persisted snapshot.
pub type Partialize<S> = Arc<dyn Fn(&S) -> Result<Snapshot, serde_json::Error> + Send + Sync>;

/// Persistence configuration for one store.
///
/// # Invariants
/// - `name` is a valid store name.
/// - `migrations` covers every version in `[0, version)` and nothing beyond.
pub struct StoreDescriptor<S> {
    name: String,
    version: u32,
    migrations: MigrationChain,
    partialize: Partialize<S>,
    schema: Option<Schema>,
}

impl<S: Serialize + 'static> StoreDescriptor<S> {
    pub fn builder(name: impl Into<String>, version: u32) -> StoreDescriptorBuilder<S> {
        StoreDescriptorBuilder {
            name: name.into(),
            version,
            migrations: MigrationChain::new(),
            partialize: None,
            schema: None,
        }
    }
}

impl<S> StoreDescriptor<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current snapshot version written by this binary.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn migrations(&self) -> &MigrationChain {
        &self.migrations
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    /// Computes the persisted snapshot for `state`.
    pub fn partialize(&self, state: &S) -> Result<Snapshot, serde_json::Error> {
        (self.partialize)(state)
    }
}

impl<S> Debug for StoreDescriptor<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreDescriptor")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("migrations", &self.migrations)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

pub struct StoreDescriptorBuilder<S> {
    name: String,
    version: u32,
    migrations: MigrationChain,
    partialize: Option<Partialize<S>>,
    schema: Option<Schema>,
}

impl<S: Serialize + 'static> StoreDescriptorBuilder<S> {
    /// Registers the step upgrading `from_version` to `from_version + 1`.
    pub fn migration<F>(mut self, from_version: u32, step: F) -> Self
    where
        F: Fn(&Snapshot) -> Result<Snapshot, String> + Send + Sync + 'static,
    {
        self.migrations = self.migrations.step(from_version, step);
        self
    }

    pub fn migration_step(mut self, from_version: u32, step: MigrationStep) -> Self {
        self.migrations = self.migrations.shared_step(from_version, step);
        self
    }

    /// Replaces the whole chain.
    pub fn migrations(mut self, chain: MigrationChain) -> Self {
        self.migrations = chain;
        self
    }

    /// Persists only the named top-level fields of the serialized state.
    pub fn persist_fields<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        let fields: BTreeSet<String> = fields.into_iter().map(Into::into).collect();
        let partialize: Partialize<S> =
            Arc::new(move |state: &S| -> Result<Snapshot, serde_json::Error> {
                let mut snapshot = to_snapshot(state)?;
                snapshot.retain(|key, _| fields.contains(key));
                Ok(snapshot)
            });
        self.partialize = Some(partialize);
        self
    }

    /// Uses a custom selector. It must be pure.
    pub fn partialize<F>(mut self, select: F) -> Self
    where
        F: Fn(&S) -> Result<Snapshot, serde_json::Error> + Send + Sync + 'static,
    {
        let partialize: Partialize<S> = Arc::new(select);
        self.partialize = Some(partialize);
        self
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Validates the name and the migration chain.
    ///
    /// Without an explicit selector the whole serialized state is persisted.
    pub fn build(self) -> StoreResult<StoreDescriptor<S>> {
        if !is_valid_store_name(&self.name) {
            return Err(StoreError::InvalidStoreName(self.name));
        }
        self.migrations.validate(self.version)?;

        let partialize: Partialize<S> = match self.partialize {
            Some(partialize) => partialize,
            None => Arc::new(|state: &S| to_snapshot(state)),
        };
        Ok(StoreDescriptor {
            name: self.name,
            version: self.version,
            migrations: self.migrations,
            partialize,
            schema: self.schema,
        })
    }
}

/// Serializes `state` into a JSON object.
pub fn to_snapshot<S: Serialize>(state: &S) -> Result<Snapshot, serde_json::Error> {
    match serde_json::to_value(state)? {
        Value::Object(snapshot) => Ok(snapshot),
        _ => Err(serde::ser::Error::custom(
            "store state must serialize to a JSON object",
        )),
    }
}
