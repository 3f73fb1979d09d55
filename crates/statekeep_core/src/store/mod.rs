//! Persisted store factory and live store handles.
//!
//! # Responsibility
//! - Orchestrate registry check, load, migrate, validate, merge, hydrate.
//! - Wire every later mutation to a sequenced asynchronous write.
//!
//! # Invariants
//! - Hydration never fails past the factory; failures fall back to defaults
//!   and are reported through the outcome and the error callback.
//! - Mutations issued before hydration are kept and persisted after it.
//! - A mutation never fails because of a downstream persistence failure.
//! - The most recently issued mutation's snapshot always wins in storage.

use serde::de::DeserializeOwned;
use serde::Serialize;

mod descriptor;
mod factory;
mod handle;
mod hydration;

pub use descriptor::{to_snapshot, Partialize, StoreDescriptor, StoreDescriptorBuilder};
pub use factory::{CreateOptions, PersistedStoreFactory};
pub use handle::{DefaultState, ErrorCallback, PersistedStore, Subscription};
pub use hydration::{merge_snapshot, HydrationOutcome};

/// Bounds every full store state must satisfy.
pub trait PersistedState: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> PersistedState for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}
