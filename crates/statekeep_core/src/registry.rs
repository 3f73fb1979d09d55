//! Process-scoped registry of persisted store names.
//!
//! # Responsibility
//! - Reserve each store name at most once per registry lifetime.
//! - Allow hot-reload re-registration only in development mode.
//!
//! # Invariants
//! - Names are validated before they are reserved.
//! - The registry is an explicit value owned by the creating scope; there is
//!   no module-level instance.

use crate::error::{StoreError, StoreResult};
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

const MAX_STORE_NAME_CHARS: usize = 128;

static STORE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:\-]*$").expect("valid store name regex"));

/// Duplicate-name policy for a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistryMode {
    /// Duplicate names fail with `StoreError::DuplicateStore`.
    #[default]
    Production,
    /// Duplicate names replace the prior registration with a warning.
    Development,
}

/// One successful reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub name: String,
    pub id: Uuid,
}

#[derive(Debug, Default)]
pub struct StoreRegistry {
    mode: RegistryMode,
    entries: Mutex<BTreeMap<String, Uuid>>,
}

impl StoreRegistry {
    /// Creates a production-mode registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry that tolerates hot-reload re-registration.
    pub fn development() -> Self {
        Self::with_mode(RegistryMode::Development)
    }

    pub fn with_mode(mode: RegistryMode) -> Self {
        Self {
            mode,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn mode(&self) -> RegistryMode {
        self.mode
    }

    pub fn is_development(&self) -> bool {
        self.mode == RegistryMode::Development
    }

    /// Reserves `name` for one persisted store.
    pub fn reserve(&self, name: &str) -> StoreResult<Registration> {
        if !is_valid_store_name(name) {
            return Err(StoreError::InvalidStoreName(name.to_string()));
        }

        let mut entries = self.lock_entries();
        let id = Uuid::new_v4();
        if let Some(previous) = entries.get(name) {
            if self.mode == RegistryMode::Production {
                return Err(StoreError::DuplicateStore(name.to_string()));
            }
            warn!(
                "event=store_reserve module=registry status=replaced store={} previous_id={} id={}",
                name, previous, id
            );
        } else {
            info!(
                "event=store_reserve module=registry status=ok store={} id={}",
                name, id
            );
        }

        entries.insert(name.to_string(), id);
        Ok(Registration {
            name: name.to_string(),
            id,
        })
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.lock_entries().contains_key(name)
    }

    /// Returns the id of the current registration for `name`.
    pub fn registration_id(&self, name: &str) -> Option<Uuid> {
        self.lock_entries().get(name).copied()
    }

    /// Returns sorted reserved names.
    pub fn names(&self) -> Vec<String> {
        self.lock_entries().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    fn lock_entries(&self) -> MutexGuard<'_, BTreeMap<String, Uuid>> {
        // Entries stay consistent even if a holder panicked: every mutation is
        // a single insert.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns whether `name` can be used as a store name and storage key.
pub fn is_valid_store_name(name: &str) -> bool {
    name.chars().count() <= MAX_STORE_NAME_CHARS && STORE_NAME_RE.is_match(name)
}
