//! In-process storage engine.

use super::{StorageEngine, StorageResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// `HashMap`-backed engine for tests and ephemeral stores.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine pre-seeded with one value, e.g. a legacy record.
    pub fn with_item(key: impl Into<String>, value: Value) -> Self {
        let mut items = HashMap::new();
        items.insert(key.into(), value);
        Self {
            items: RwLock::new(items),
        }
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Returns sorted keys.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.items.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl StorageEngine for MemoryStorage {
    async fn get_item(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: Value) -> StorageResult<()> {
        self.items.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_item(&self, key: &str) {
        self.items.write().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStorage;
    use crate::storage::StorageEngine;
    use serde_json::json;

    #[tokio::test]
    async fn missing_key_is_absent_not_error() {
        let storage = MemoryStorage::new();
        let value = storage.get_item("nope").await.expect("get should succeed");
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn set_replaces_and_remove_deletes() {
        let storage = MemoryStorage::new();
        storage.set_item("k", json!(1)).await.expect("first set");
        storage.set_item("k", json!(2)).await.expect("second set");
        assert_eq!(storage.get_item("k").await.expect("get"), Some(json!(2)));
        assert_eq!(storage.len().await, 1);

        storage.remove_item("k").await;
        storage.remove_item("k").await;
        assert!(storage.is_empty().await);
    }
}
