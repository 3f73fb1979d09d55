//! Snapshot migration chain and executor.
//!
//! # Responsibility
//! - Hold one transform per origin version (`N -> N+1`).
//! - Upgrade a stale snapshot across `[from, to)` in increasing order.
//!
//! # Invariants
//! - The chain is validated for completeness when a descriptor is built.
//! - `apply` checks the whole range before running any step.
//! - Input snapshots are borrowed and never mutated; a failure returns no
//!   partially upgraded shape.

use crate::storage::Snapshot;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

pub mod steps;

/// Pure transform from a snapshot at version `N` to version `N + 1`.
pub type MigrationStep = Arc<dyn Fn(&Snapshot) -> Result<Snapshot, String> + Send + Sync>;

/// Migration configuration or execution failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationError {
    /// No step registered for `missing_version -> missing_version + 1`.
    Gap {
        missing_version: u32,
        from: u32,
        to: u32,
    },
    /// A step registered at or beyond the current version can never run.
    UnreachableStep { version: u32, current_version: u32 },
    /// A step rejected the snapshot it was given.
    StepFailed { version: u32, reason: String },
    /// Persisted data is newer than this binary understands.
    FutureVersion { from: u32, to: u32 },
}

impl Display for MigrationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gap {
                missing_version,
                from,
                to,
            } => write!(
                f,
                "missing migration step {missing_version} -> {} while migrating v{from} to v{to}",
                missing_version + 1
            ),
            Self::UnreachableStep {
                version,
                current_version,
            } => write!(
                f,
                "migration step {version} is unreachable with current version {current_version}"
            ),
            Self::StepFailed { version, reason } => write!(
                f,
                "migration step {version} -> {} failed: {reason}",
                version + 1
            ),
            Self::FutureVersion { from, to } => {
                write!(f, "cannot migrate backwards from v{from} to v{to}")
            }
        }
    }
}

impl Error for MigrationError {}

/// Ordered set of migration steps indexed by origin version.
#[derive(Clone, Default)]
pub struct MigrationChain {
    steps: BTreeMap<u32, MigrationStep>,
}

impl MigrationChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the step upgrading `from_version` to `from_version + 1`.
    ///
    /// Registering the same origin twice keeps the later step.
    pub fn step<F>(mut self, from_version: u32, step: F) -> Self
    where
        F: Fn(&Snapshot) -> Result<Snapshot, String> + Send + Sync + 'static,
    {
        self.steps.insert(from_version, Arc::new(step));
        self
    }

    /// Registers an already shared step, e.g. one built by [`steps`] helpers.
    pub fn shared_step(mut self, from_version: u32, step: MigrationStep) -> Self {
        self.steps.insert(from_version, step);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Registered origin versions in increasing order.
    pub fn versions(&self) -> Vec<u32> {
        self.steps.keys().copied().collect()
    }

    /// Checks the chain is total and contiguous over `[0, current_version)`.
    pub fn validate(&self, current_version: u32) -> Result<(), MigrationError> {
        if let Some((&version, _)) = self.steps.range(current_version..).next() {
            return Err(MigrationError::UnreachableStep {
                version,
                current_version,
            });
        }
        self.check_range(0, current_version)
    }

    /// Upgrades `snapshot` from `from` to `to`, applying each step once.
    pub fn apply(&self, snapshot: &Snapshot, from: u32, to: u32) -> Result<Snapshot, MigrationError> {
        if from > to {
            return Err(MigrationError::FutureVersion { from, to });
        }
        self.check_range(from, to)?;

        let mut current = snapshot.clone();
        for version in from..to {
            let step = self.steps.get(&version).ok_or(MigrationError::Gap {
                missing_version: version,
                from,
                to,
            })?;
            current = step(&current)
                .map_err(|reason| MigrationError::StepFailed { version, reason })?;
        }
        Ok(current)
    }

    fn check_range(&self, from: u32, to: u32) -> Result<(), MigrationError> {
        match (from..to).find(|version| !self.steps.contains_key(version)) {
            Some(missing_version) => Err(MigrationError::Gap {
                missing_version,
                from,
                to,
            }),
            None => Ok(()),
        }
    }
}

impl Debug for MigrationChain {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationChain")
            .field("versions", &self.versions())
            .finish()
    }
}
