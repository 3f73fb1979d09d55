//! Live store handle shared with collaborators.
//!
//! # Responsibility
//! - Serve synchronous reads and mutations against in-memory state.
//! - Issue sequenced, fire-and-forget writes after every mutation.
//! - Expose the hydration window (`is_hydrated`, `on_hydrated`, `hydrated`).
//!
//! # Invariants
//! - Sequence numbers are assigned under the state lock, at mutation time.
//! - Mutations before hydration resolves stay in memory and are persisted
//!   once hydration resolves; a loaded snapshot is overlaid onto them.
//! - The hydration outcome is published before any listener or callback runs.
//! - Listeners and callbacks run outside every internal lock.

use super::descriptor::StoreDescriptor;
use super::hydration::{self, merge_snapshot, HydrationOutcome, Resolution};
use super::PersistedState;
use crate::error::StoreError;
use crate::registry::Registration;
use crate::storage::{Snapshot, StorageEngine, StorageRecord, WriteGate, WriteOutcome};
use log::{debug, error, info};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Receives every persistence or hydration error of a store.
pub type ErrorCallback = Arc<dyn Fn(&StoreError) + Send + Sync>;
/// Builds the full default state.
pub type DefaultState<S> = Arc<dyn Fn() -> S + Send + Sync>;

type Listener<S> = Arc<dyn Fn(&S, &S) + Send + Sync>;
type HydrationCallback = Box<dyn FnOnce(HydrationOutcome) + Send>;

#[derive(Default)]
struct HydrationSlot {
    outcome: Option<HydrationOutcome>,
    callbacks: Vec<HydrationCallback>,
}

pub(crate) struct StoreParts<S> {
    pub descriptor: StoreDescriptor<S>,
    pub registration: Registration,
    pub default_state: DefaultState<S>,
    pub storage: Arc<dyn StorageEngine>,
    pub on_error: Option<ErrorCallback>,
    pub runtime: Handle,
}

struct StoreInner<S> {
    descriptor: StoreDescriptor<S>,
    registration: Registration,
    storage: Arc<dyn StorageEngine>,
    on_error: Option<ErrorCallback>,
    runtime: Handle,
    state: RwLock<S>,
    hydrated: AtomicBool,
    /// Set when a mutation was deferred because hydration was pending.
    deferred: AtomicBool,
    hydration: Mutex<HydrationSlot>,
    hydration_tx: watch::Sender<Option<HydrationOutcome>>,
    listeners: Mutex<BTreeMap<u64, Listener<S>>>,
    next_listener_id: AtomicU64,
    sequence: AtomicU64,
    gate: WriteGate,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to one persisted store. Clones share the same store.
pub struct PersistedStore<S> {
    inner: Arc<StoreInner<S>>,
}

impl<S> Clone for PersistedStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Listener registration returned by [`PersistedStore::subscribe`].
#[must_use = "dropping a subscription keeps the listener registered; call unsubscribe to remove it"]
pub struct Subscription<S> {
    store: Weak<StoreInner<S>>,
    id: u64,
}

impl<S> Subscription<S> {
    pub fn unsubscribe(self) {
        if let Some(store) = self.store.upgrade() {
            lock(&store.listeners).remove(&self.id);
        }
    }
}

impl<S: PersistedState> PersistedStore<S> {
    /// Builds the store with default state and spawns its hydration task.
    pub(crate) fn spawn(parts: StoreParts<S>) -> Self {
        let initial = (parts.default_state)();
        let (hydration_tx, _) = watch::channel(None);
        let inner = Arc::new(StoreInner {
            descriptor: parts.descriptor,
            registration: parts.registration,
            storage: parts.storage,
            on_error: parts.on_error,
            runtime: parts.runtime,
            state: RwLock::new(initial),
            hydrated: AtomicBool::new(false),
            deferred: AtomicBool::new(false),
            hydration: Mutex::new(HydrationSlot::default()),
            hydration_tx,
            listeners: Mutex::new(BTreeMap::new()),
            next_listener_id: AtomicU64::new(1),
            sequence: AtomicU64::new(0),
            gate: WriteGate::new(),
            pending: Mutex::new(Vec::new()),
        });

        let task_inner = Arc::clone(&inner);
        let task = inner.runtime.spawn(async move {
            let started_at = Instant::now();
            let resolve_inner = Arc::clone(&task_inner);
            // Runs on its own task so a panicking migration step is contained.
            let resolved = task_inner.runtime.spawn(async move {
                hydration::resolve(&resolve_inner.descriptor, resolve_inner.storage.as_ref())
                    .await
            })
            .await;
            let resolution = match resolved {
                Ok(resolution) => resolution,
                Err(err) => {
                    error!(
                        "event=store_hydrate module=store status=error store={} error_code=resolve_aborted error={}",
                        task_inner.descriptor.name(),
                        err
                    );
                    Resolution::failed(task_inner.descriptor.name(), "hydration task aborted")
                }
            };
            let outcome = task_inner.finish_hydration(resolution);
            info!(
                "event=store_hydrate module=store status=done store={} outcome={} duration_ms={}",
                task_inner.descriptor.name(),
                outcome,
                started_at.elapsed().as_millis()
            );
        });
        inner.track(task);

        Self { inner }
    }

    /// Returns a copy of the full current state.
    ///
    /// Before hydration resolves this is the default state plus every
    /// mutation issued so far.
    pub fn get(&self) -> S {
        self.inner.read_state().clone()
    }

    /// Reads the current state without cloning it.
    pub fn with<R>(&self, read: impl FnOnce(&S) -> R) -> R {
        read(&self.inner.read_state())
    }

    /// Applies `update` synchronously and schedules persistence.
    ///
    /// Never fails: persistence errors go to the store's error callback.
    pub fn set(&self, update: impl FnOnce(&mut S)) {
        let (previous, current, write) = {
            let mut state = self.inner.write_state();
            let previous = state.clone();
            update(&mut state);
            let write = self.inner.issue_write(&state);
            (previous, state.clone(), write)
        };

        if let Some((sequence, snapshot)) = write {
            self.inner.schedule_write(sequence, snapshot);
        }
        self.inner.notify(&current, &previous);
    }

    /// Replaces the full state.
    pub fn replace(&self, state: S) {
        self.set(move |current| *current = state);
    }

    /// Registers `listener(new, previous)` for every state change.
    pub fn subscribe(&self, listener: impl Fn(&S, &S) + Send + Sync + 'static) -> Subscription<S> {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.listeners).insert(id, Arc::new(listener));
        Subscription {
            store: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Runs `callback` once hydration resolves, immediately if it already has.
    pub fn on_hydrated(&self, callback: impl FnOnce(HydrationOutcome) + Send + 'static) {
        let mut slot = lock(&self.inner.hydration);
        match slot.outcome {
            Some(outcome) => {
                drop(slot);
                callback(outcome);
            }
            None => slot.callbacks.push(Box::new(callback)),
        }
    }

    /// Waits until hydration resolves and returns its outcome.
    pub async fn hydrated(&self) -> HydrationOutcome {
        let mut rx = self.inner.hydration_tx.subscribe();
        let resolved = rx.wait_for(Option::is_some).await.map(|outcome| *outcome);
        match resolved {
            Ok(Some(outcome)) => outcome,
            Ok(None) | Err(_) => HydrationOutcome::Error,
        }
    }

    pub fn is_hydrated(&self) -> bool {
        self.inner.hydrated.load(Ordering::Acquire)
    }

    pub fn hydration_outcome(&self) -> Option<HydrationOutcome> {
        lock(&self.inner.hydration).outcome
    }

    /// Waits for hydration and every write issued so far to settle.
    pub async fn flush(&self) {
        loop {
            let tasks = std::mem::take(&mut *lock(&self.inner.pending));
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                if let Err(err) = task.await {
                    error!(
                        "event=store_flush module=store status=error store={} error={}",
                        self.name(),
                        err
                    );
                }
            }
        }
    }

    /// Removes the persisted record. Best-effort.
    pub async fn clear_storage(&self) {
        self.inner.storage.remove_item(self.name()).await;
        info!(
            "event=store_clear module=store status=ok store={}",
            self.name()
        );
    }

    pub fn name(&self) -> &str {
        self.inner.descriptor.name()
    }

    pub fn version(&self) -> u32 {
        self.inner.descriptor.version()
    }

    pub fn registration_id(&self) -> Uuid {
        self.inner.registration.id
    }

    /// Sequence number of the last mutation issued for persistence.
    pub fn last_issued_sequence(&self) -> u64 {
        self.inner.sequence.load(Ordering::Acquire)
    }

    /// Sequence number of the newest write accepted by storage.
    pub async fn last_persisted_sequence(&self) -> u64 {
        self.inner.gate.last_applied().await
    }
}

impl<S: PersistedState> StoreInner<S> {
    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, S> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, S> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assigns the next sequence number; called with the state lock held.
    fn issue_write(&self, state: &S) -> Option<(u64, Result<Snapshot, serde_json::Error>)> {
        if !self.hydrated.load(Ordering::Acquire) {
            self.deferred.store(true, Ordering::Release);
            debug!(
                "event=store_write module=store status=deferred store={} reason=not_hydrated",
                self.descriptor.name()
            );
            return None;
        }
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        Some((sequence, self.descriptor.partialize(state)))
    }

    fn schedule_write(
        self: &Arc<Self>,
        sequence: u64,
        snapshot: Result<Snapshot, serde_json::Error>,
    ) {
        let inner = Arc::clone(self);
        let task = self.runtime.spawn(async move {
            inner.write_record(sequence, snapshot).await;
        });
        self.track(task);
    }

    async fn write_record(&self, sequence: u64, snapshot: Result<Snapshot, serde_json::Error>) {
        let name = self.descriptor.name();
        let value = snapshot
            .and_then(|state| StorageRecord::new(self.descriptor.version(), state).to_value());
        let value = match value {
            Ok(value) => value,
            Err(err) => {
                error!(
                    "event=store_write module=store status=error store={} seq={} error_code=serialize_failed error={}",
                    name, sequence, err
                );
                self.report_error(&StoreError::Serialization(err));
                return;
            }
        };

        match self
            .gate
            .write(self.storage.as_ref(), name, sequence, value)
            .await
        {
            Ok(WriteOutcome::Applied) => {
                debug!(
                    "event=store_write module=store status=ok store={} seq={}",
                    name, sequence
                );
            }
            Ok(WriteOutcome::Superseded { .. }) => {}
            Err(err) => {
                error!(
                    "event=store_write module=store status=error store={} seq={} error_code=write_failed error={}",
                    name, sequence, err
                );
                self.report_error(&StoreError::Storage(err));
            }
        }
    }

    /// Applies the resolution to the live state and returns the final outcome.
    fn finish_hydration(self: &Arc<Self>, resolution: Resolution) -> HydrationOutcome {
        let Resolution {
            snapshot,
            mut outcome,
            write_back,
            mut error,
        } = resolution;
        let name = self.descriptor.name();

        let (previous, current, write, callbacks) = {
            let mut guard = self.write_state();
            let previous = guard.clone();
            if let Some(snapshot) = snapshot {
                match merge_snapshot(&*guard, &snapshot) {
                    Ok(merged) => *guard = merged,
                    Err(err) => {
                        error!(
                            "event=store_hydrate module=store status=error store={} error_code=merge_failed error={}",
                            name, err
                        );
                        outcome = HydrationOutcome::Error;
                        error = Some(StoreError::Hydration {
                            store: name.to_string(),
                            reason: err.to_string(),
                        });
                    }
                }
            }

            self.hydrated.store(true, Ordering::Release);
            let callbacks = {
                let mut slot = lock(&self.hydration);
                slot.outcome = Some(outcome);
                std::mem::take(&mut slot.callbacks)
            };
            self.hydration_tx.send_replace(Some(outcome));

            let deferred = self.deferred.swap(false, Ordering::AcqRel);
            let write = if write_back || deferred {
                self.issue_write(&guard)
            } else {
                None
            };
            (previous, guard.clone(), write, callbacks)
        };

        if let Some((sequence, snapshot)) = write {
            self.schedule_write(sequence, snapshot);
        }
        if let Some(err) = error {
            self.report_error(&err);
        }
        self.notify(&current, &previous);
        for callback in callbacks {
            callback(outcome);
        }
        outcome
    }

    fn notify(&self, current: &S, previous: &S) {
        let listeners: Vec<Listener<S>> = lock(&self.listeners).values().cloned().collect();
        for listener in listeners {
            listener(current, previous);
        }
    }

    fn report_error(&self, err: &StoreError) {
        if let Some(on_error) = &self.on_error {
            on_error(err);
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut pending = lock(&self.pending);
        pending.retain(|task| !task.is_finished());
        pending.push(task);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
