//! Persisted store construction.

use super::descriptor::StoreDescriptor;
use super::handle::{ErrorCallback, PersistedStore, StoreParts};
use super::PersistedState;
use crate::error::{StoreError, StoreResult};
use crate::registry::StoreRegistry;
use crate::storage::StorageEngine;
use log::info;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Per-store overrides for [`PersistedStoreFactory::create`].
#[derive(Default, Clone)]
pub struct CreateOptions {
    storage: Option<Arc<dyn StorageEngine>>,
    on_error: Option<ErrorCallback>,
    runtime: Option<Handle>,
}

impl CreateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `storage` instead of the factory's engine.
    pub fn storage(mut self, storage: Arc<dyn StorageEngine>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Uses `on_error` instead of the factory's error callback.
    pub fn on_error(mut self, on_error: impl Fn(&StoreError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    /// Spawns hydration and writes on `runtime` instead of the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }
}

/// Creates persisted stores bound to one registry and storage engine.
#[derive(Clone)]
pub struct PersistedStoreFactory {
    registry: Arc<StoreRegistry>,
    storage: Arc<dyn StorageEngine>,
    on_error: Option<ErrorCallback>,
}

impl PersistedStoreFactory {
    pub fn new(registry: Arc<StoreRegistry>, storage: Arc<dyn StorageEngine>) -> Self {
        Self {
            registry,
            storage,
            on_error: None,
        }
    }

    /// Default error callback for stores created by this factory.
    pub fn with_error_handler(
        mut self,
        on_error: impl Fn(&StoreError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    pub fn registry(&self) -> &Arc<StoreRegistry> {
        &self.registry
    }

    /// Reserves the descriptor's name and returns a store holding defaults.
    ///
    /// Hydration continues on a spawned task; the returned store reports it
    /// through `is_hydrated`, `on_hydrated` and `hydrated`.
    ///
    /// # Errors
    /// - `RuntimeUnavailable` when no tokio runtime is reachable.
    /// - `DuplicateStore` when the name is taken in a production registry.
    pub fn create<S, F>(
        &self,
        descriptor: StoreDescriptor<S>,
        default_state: F,
        options: CreateOptions,
    ) -> StoreResult<PersistedStore<S>>
    where
        S: PersistedState,
        F: Fn() -> S + Send + Sync + 'static,
    {
        let runtime = match options.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| StoreError::RuntimeUnavailable)?,
        };

        let registration = self.registry.reserve(descriptor.name())?;
        info!(
            "event=store_create module=store status=ok store={} version={} id={}",
            registration.name,
            descriptor.version(),
            registration.id
        );

        Ok(PersistedStore::spawn(StoreParts {
            descriptor,
            registration,
            default_state: Arc::new(default_state),
            storage: options
                .storage
                .unwrap_or_else(|| Arc::clone(&self.storage)),
            on_error: options.on_error.or_else(|| self.on_error.clone()),
            runtime,
        }))
    }
}
