//! One-time reconciliation of a persisted record into live state.
//!
//! # Responsibility
//! - Load the record, migrate stale snapshots and validate shape.
//! - Turn every failure into a resolution that keeps the live state.
//!
//! # Invariants
//! - Resolution never fails; errors are carried alongside the outcome.
//! - Future or unmigratable data is discarded whole, never partially applied.
//! - Only an absent record asks for the live state to be written back.

use super::descriptor::{to_snapshot, StoreDescriptor};
use super::PersistedState;
use crate::error::StoreError;
use crate::schema;
use crate::storage::{Snapshot, StorageEngine, StorageRecord};
use log::{error, info, warn};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

/// Reported result of store hydration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HydrationOutcome {
    /// Record loaded (and migrated if stale), or absent and defaults written.
    Ok,
    /// Record could not be migrated; defaults used.
    Reset,
    /// Record was written by a newer version; defaults used.
    ResetFutureData,
    /// Record could not be loaded, parsed or merged; defaults used.
    Error,
}

impl HydrationOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Reset => "reset",
            Self::ResetFutureData => "reset-future-data",
            Self::Error => "error",
        }
    }
}

impl Display for HydrationOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) struct Resolution {
    /// Snapshot to overlay onto the live state; `None` keeps the live state.
    pub snapshot: Option<Snapshot>,
    pub outcome: HydrationOutcome,
    /// Write the live state immediately (first run, no record yet).
    pub write_back: bool,
    pub error: Option<StoreError>,
}

impl Resolution {
    fn loaded(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Some(snapshot),
            outcome: HydrationOutcome::Ok,
            write_back: false,
            error: None,
        }
    }

    fn reset(outcome: HydrationOutcome) -> Self {
        Self {
            snapshot: None,
            outcome,
            write_back: false,
            error: None,
        }
    }

    pub(crate) fn failed(store: &str, reason: impl Display) -> Self {
        Self {
            snapshot: None,
            outcome: HydrationOutcome::Error,
            write_back: false,
            error: Some(StoreError::Hydration {
                store: store.to_string(),
                reason: reason.to_string(),
            }),
        }
    }
}

pub(crate) async fn resolve<S>(
    descriptor: &StoreDescriptor<S>,
    storage: &dyn StorageEngine,
) -> Resolution {
    let name = descriptor.name();
    let current_version = descriptor.version();

    let raw = match storage.get_item(name).await {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            info!(
                "event=store_hydrate module=store status=empty store={} version={}",
                name, current_version
            );
            return Resolution {
                snapshot: None,
                outcome: HydrationOutcome::Ok,
                write_back: true,
                error: None,
            };
        }
        Err(err) => {
            error!(
                "event=store_hydrate module=store status=error store={} error_code=load_failed error={}",
                name, err
            );
            return Resolution::failed(name, err);
        }
    };

    let record = match StorageRecord::from_value(raw) {
        Ok(record) => record,
        Err(err) => {
            error!(
                "event=store_hydrate module=store status=error store={} error_code=record_invalid error={}",
                name, err
            );
            return Resolution::failed(name, err);
        }
    };

    let snapshot = match record.version.cmp(&current_version) {
        Ordering::Equal => record.state,
        Ordering::Less => {
            match descriptor
                .migrations()
                .apply(&record.state, record.version, current_version)
            {
                Ok(migrated) => {
                    info!(
                        "event=store_migrate module=store status=ok store={} from_version={} to_version={}",
                        name, record.version, current_version
                    );
                    migrated
                }
                Err(err) => {
                    error!(
                        "event=store_migrate module=store status=error store={} from_version={} to_version={} error={}",
                        name, record.version, current_version, err
                    );
                    return Resolution::reset(HydrationOutcome::Reset);
                }
            }
        }
        Ordering::Greater => {
            warn!(
                "event=store_hydrate module=store status=reset_future_data store={} record_version={} version={}",
                name, record.version, current_version
            );
            return Resolution::reset(HydrationOutcome::ResetFutureData);
        }
    };

    let snapshot = match descriptor.schema() {
        Some(declared) => {
            let (snapshot, mismatches) = schema::validate(snapshot, declared);
            for mismatch in &mismatches {
                warn!(
                    "event=store_validate module=store status=mismatch store={} detail=\"{}\"",
                    name, mismatch
                );
            }
            snapshot
        }
        None => snapshot,
    };

    Resolution::loaded(snapshot)
}

/// Overlays every field of `snapshot` onto the serialized `base` state.
///
/// Fields missing from the snapshot keep their value from `base`.
pub fn merge_snapshot<S: PersistedState>(
    base: &S,
    snapshot: &Snapshot,
) -> Result<S, serde_json::Error> {
    let mut merged = to_snapshot(base)?;
    for (field, value) in snapshot {
        merged.insert(field.clone(), value.clone());
    }
    serde_json::from_value(Value::Object(merged))
}
