use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use statekeep_core::migration::steps::{add_field, each_in_array, rename_field};
use statekeep_core::{
    CreateOptions, FieldKind, HydrationOutcome, MemoryStorage, PersistedStoreFactory, Schema,
    StorageEngine, StorageError, StorageResult, StoreDescriptor, StoreError, StoreRegistry,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CartItem {
    sku: String,
    quantity: u32,
    note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CartState {
    items: Vec<CartItem>,
    loading: bool,
}

fn empty_cart() -> CartState {
    CartState {
        items: Vec::new(),
        loading: false,
    }
}

fn item(sku: &str, quantity: u32) -> CartItem {
    CartItem {
        sku: sku.to_string(),
        quantity,
        note: String::new(),
    }
}

fn cart_descriptor(version: u32) -> StoreDescriptor<CartState> {
    let mut builder = StoreDescriptor::<CartState>::builder("cart:items", version)
        .persist_fields(["items"]);
    if version >= 1 {
        builder = builder.migration_step(0, each_in_array("items", add_field("note", json!(""))));
    }
    if version >= 2 {
        builder = builder.migration_step(1, each_in_array("items", rename_field("qty", "quantity")));
    }
    builder.build().expect("cart descriptor should build")
}

fn factory(storage: Arc<dyn StorageEngine>) -> PersistedStoreFactory {
    PersistedStoreFactory::new(Arc::new(StoreRegistry::new()), storage)
}

/// Engine whose reads always fail.
struct UnreadableStorage {
    inner: MemoryStorage,
}

#[async_trait]
impl StorageEngine for UnreadableStorage {
    async fn get_item(&self, _key: &str) -> StorageResult<Option<Value>> {
        Err(StorageError::Backend("disk unavailable".to_string()))
    }

    async fn set_item(&self, key: &str, value: Value) -> StorageResult<()> {
        self.inner.set_item(key, value).await
    }

    async fn remove_item(&self, key: &str) {
        self.inner.remove_item(key).await;
    }
}

#[tokio::test]
async fn absent_record_hydrates_defaults_and_writes_them() {
    let storage = Arc::new(MemoryStorage::new());
    let store = factory(storage.clone())
        .create(cart_descriptor(2), empty_cart, CreateOptions::new())
        .expect("store should be created");

    assert_eq!(store.hydrated().await, HydrationOutcome::Ok);
    store.flush().await;

    assert_eq!(store.get(), empty_cart());
    let written = storage
        .get_item("cart:items")
        .await
        .expect("read back")
        .expect("defaults should be written on first run");
    assert_eq!(written, json!({ "version": 2, "state": { "items": [] } }));
}

#[tokio::test]
async fn persisted_state_round_trips_across_restart() {
    let storage = Arc::new(MemoryStorage::new());

    let first = factory(storage.clone())
        .create(cart_descriptor(2), empty_cart, CreateOptions::new())
        .expect("first store");
    first.hydrated().await;
    first.set(|cart| {
        cart.items.push(item("a", 2));
        cart.items.push(item("b", 5));
        cart.loading = true;
    });
    first.flush().await;

    let reloaded = factory(storage)
        .create(cart_descriptor(2), empty_cart, CreateOptions::new())
        .expect("store after restart");
    assert_eq!(reloaded.hydrated().await, HydrationOutcome::Ok);

    let state = reloaded.get();
    assert_eq!(state.items, vec![item("a", 2), item("b", 5)]);
    // `loading` is not selected for persistence and keeps its default.
    assert!(!state.loading);
}

#[tokio::test]
async fn stale_record_is_migrated_through_every_step() {
    let storage = Arc::new(MemoryStorage::with_item(
        "cart:items",
        json!({ "version": 0, "state": { "items": [{ "sku": "a", "qty": 2 }] } }),
    ));

    let store = factory(storage)
        .create(cart_descriptor(2), empty_cart, CreateOptions::new())
        .expect("store should be created");

    assert_eq!(store.hydrated().await, HydrationOutcome::Ok);
    assert_eq!(
        store.get().items,
        vec![CartItem {
            sku: "a".to_string(),
            quantity: 2,
            note: String::new(),
        }]
    );
}

#[tokio::test]
async fn future_record_resets_to_defaults_and_is_left_in_storage() {
    let future = json!({ "version": 3, "state": { "items": [{ "sku": "z" }] } });
    let storage = Arc::new(MemoryStorage::with_item("cart:items", future.clone()));

    let store = factory(storage.clone())
        .create(cart_descriptor(2), empty_cart, CreateOptions::new())
        .expect("store should be created");

    assert_eq!(store.hydrated().await, HydrationOutcome::ResetFutureData);
    store.flush().await;
    assert_eq!(store.get(), empty_cart());
    assert_eq!(
        storage.get_item("cart:items").await.expect("read back"),
        Some(future)
    );
}

#[tokio::test]
async fn failing_migration_step_resets_to_defaults() {
    let storage = Arc::new(MemoryStorage::with_item(
        "cart:items",
        json!({ "version": 0, "state": { "items": "not-a-list" } }),
    ));

    let store = factory(storage)
        .create(cart_descriptor(2), empty_cart, CreateOptions::new())
        .expect("store should be created");

    assert_eq!(store.hydrated().await, HydrationOutcome::Reset);
    assert_eq!(store.get(), empty_cart());
}

#[tokio::test]
async fn unreadable_backend_yields_defaults_and_one_error() {
    let errors = Arc::new(AtomicUsize::new(0));
    let counter = errors.clone();
    let storage = Arc::new(UnreadableStorage {
        inner: MemoryStorage::new(),
    });

    let store = factory(storage)
        .create(
            cart_descriptor(2),
            empty_cart,
            CreateOptions::new().on_error(move |err| {
                assert!(matches!(err, StoreError::Hydration { .. }));
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .expect("create must not fail on backend errors");

    assert_eq!(store.hydrated().await, HydrationOutcome::Error);
    store.flush().await;
    assert_eq!(store.get(), empty_cart());
    assert_eq!(errors.load(Ordering::SeqCst), 1);

    store.set(|cart| cart.items.push(item("a", 1)));
    store.flush().await;
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn malformed_record_reports_hydration_error() {
    let storage = Arc::new(MemoryStorage::with_item(
        "cart:items",
        json!({ "state": { "items": [] } }),
    ));
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();

    let store = factory(storage)
        .create(
            cart_descriptor(2),
            empty_cart,
            CreateOptions::new().on_error(move |err| {
                sink.lock().expect("error sink").push(err.to_string());
            }),
        )
        .expect("store should be created");

    assert_eq!(store.hydrated().await, HydrationOutcome::Error);
    let errors = errors.lock().expect("error sink");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("cart:items"));
}

#[tokio::test]
async fn schema_mismatch_is_diagnostic_only() {
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Prefs {
        theme: String,
        font_size: f64,
    }

    let storage = Arc::new(MemoryStorage::with_item(
        "settings:preferences",
        json!({ "version": 0, "state": { "theme": "dark", "font_size": 14 } }),
    ));
    let descriptor = StoreDescriptor::<Prefs>::builder("settings:preferences", 0)
        .schema(
            Schema::new()
                .field("theme", FieldKind::String)
                .field("font_size", FieldKind::String),
        )
        .build()
        .expect("descriptor should build");

    let store = factory(storage)
        .create(
            descriptor,
            || Prefs {
                theme: "light".to_string(),
                font_size: 12.0,
            },
            CreateOptions::new(),
        )
        .expect("store should be created");

    assert_eq!(store.hydrated().await, HydrationOutcome::Ok);
    assert_eq!(
        store.get(),
        Prefs {
            theme: "dark".to_string(),
            font_size: 14.0,
        }
    );
}

#[tokio::test]
async fn readers_see_defaults_until_hydrated() {
    let storage = Arc::new(MemoryStorage::with_item(
        "cart:items",
        json!({ "version": 2, "state": { "items": [{ "sku": "a", "quantity": 1, "note": "" }] } }),
    ));
    let store = factory(storage.clone())
        .create(cart_descriptor(2), empty_cart, CreateOptions::new())
        .expect("store should be created");

    assert!(!store.is_hydrated());
    assert_eq!(store.hydration_outcome(), None);
    assert_eq!(store.get(), empty_cart());

    store.set(|cart| {
        cart.items.push(item("early", 9));
        cart.loading = true;
    });
    assert_eq!(store.last_issued_sequence(), 0);
    assert_eq!(store.get().items, vec![item("early", 9)]);

    let seen = Arc::new(Mutex::new(None));
    let seen_by_callback = seen.clone();
    store.on_hydrated(move |outcome| {
        *seen_by_callback.lock().expect("outcome slot") = Some(outcome);
    });

    store.hydrated().await;
    store.flush().await;

    assert!(store.is_hydrated());
    assert_eq!(*seen.lock().expect("outcome slot"), Some(HydrationOutcome::Ok));
    // Persisted fields overlay the live state; the rest keeps early mutations.
    let state = store.get();
    assert_eq!(state.items, vec![item("a", 1)]);
    assert!(state.loading);
    assert_eq!(store.last_issued_sequence(), 1);
    assert_eq!(
        storage.get_item("cart:items").await.expect("read back"),
        Some(json!({ "version": 2, "state": { "items": [{ "sku": "a", "quantity": 1, "note": "" }] } }))
    );
}

#[tokio::test]
async fn mutation_before_first_hydration_is_kept_and_persisted() {
    let storage = Arc::new(MemoryStorage::new());
    let store = factory(storage.clone())
        .create(cart_descriptor(2), empty_cart, CreateOptions::new())
        .expect("store should be created");

    store.set(|cart| cart.items.push(item("milk", 1)));

    assert_eq!(store.hydrated().await, HydrationOutcome::Ok);
    store.flush().await;

    assert_eq!(store.get().items, vec![item("milk", 1)]);
    assert_eq!(
        storage.get_item("cart:items").await.expect("read back"),
        Some(json!({ "version": 2, "state": { "items": [{ "sku": "milk", "quantity": 1, "note": "" }] } }))
    );
}

#[tokio::test]
async fn panicking_migration_step_falls_back_to_defaults() {
    let storage = Arc::new(MemoryStorage::with_item(
        "cart:items",
        json!({ "version": 0, "state": { "items": [] } }),
    ));
    let descriptor = StoreDescriptor::<CartState>::builder("cart:items", 1)
        .persist_fields(["items"])
        .migration(0, |_| panic!("step 0 cannot handle this record"))
        .build()
        .expect("descriptor should build");
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();

    let store = factory(storage.clone())
        .create(
            descriptor,
            empty_cart,
            CreateOptions::new().on_error(move |err| {
                let is_hydration = matches!(err, StoreError::Hydration { .. });
                sink.lock().expect("error sink").push(is_hydration);
            }),
        )
        .expect("store should be created");

    assert_eq!(store.hydrated().await, HydrationOutcome::Error);
    assert!(store.is_hydrated());
    assert_eq!(store.get(), empty_cart());
    assert_eq!(*errors.lock().expect("error sink"), vec![true]);

    store.set(|cart| cart.items.push(item("x", 1)));
    store.flush().await;

    assert_eq!(
        storage.get_item("cart:items").await.expect("read back"),
        Some(json!({ "version": 1, "state": { "items": [{ "sku": "x", "quantity": 1, "note": "" }] } }))
    );
}

#[tokio::test]
async fn on_hydrated_after_hydration_runs_immediately() {
    let store = factory(Arc::new(MemoryStorage::new()))
        .create(cart_descriptor(0), empty_cart, CreateOptions::new())
        .expect("store should be created");
    store.hydrated().await;

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    store.on_hydrated(move |outcome| {
        assert_eq!(outcome, HydrationOutcome::Ok);
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.hydration_outcome(), Some(HydrationOutcome::Ok));
}
