//! Sequence-ordered write boundary.
//!
//! # Invariants
//! - A write is applied only if its sequence exceeds the last applied one.
//! - The comparison and the backend write happen under one lock, so a stale
//!   write can never land after a newer one regardless of task scheduling.
//! - A failed backend write does not advance the last applied sequence.

use super::{StorageEngine, StorageResult};
use log::debug;
use serde_json::Value;
use tokio::sync::Mutex;

/// Result of one gated write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// A write with an equal or newer sequence was already applied.
    Superseded { last_applied: u64 },
}

/// Per-store gate in front of a storage engine.
#[derive(Debug, Default)]
pub struct WriteGate {
    last_applied: Mutex<u64>,
}

impl WriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence of the newest applied write, `0` before the first one.
    pub async fn last_applied(&self) -> u64 {
        *self.last_applied.lock().await
    }

    /// Writes `value` under `key` when `sequence` is newer than anything applied.
    pub async fn write(
        &self,
        engine: &dyn StorageEngine,
        key: &str,
        sequence: u64,
        value: Value,
    ) -> StorageResult<WriteOutcome> {
        let mut last_applied = self.last_applied.lock().await;
        if sequence <= *last_applied {
            debug!(
                "event=store_write module=storage status=superseded key={} seq={} last_applied={}",
                key, sequence, *last_applied
            );
            return Ok(WriteOutcome::Superseded {
                last_applied: *last_applied,
            });
        }

        engine.set_item(key, value).await?;
        *last_applied = sequence;
        Ok(WriteOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::{WriteGate, WriteOutcome};
    use crate::storage::{MemoryStorage, StorageEngine};
    use serde_json::json;

    #[tokio::test]
    async fn newer_write_completing_first_wins() {
        let storage = MemoryStorage::new();
        let gate = WriteGate::new();

        let newer = gate
            .write(&storage, "cart", 2, json!("B"))
            .await
            .expect("newer write");
        let older = gate
            .write(&storage, "cart", 1, json!("A"))
            .await
            .expect("older write");

        assert_eq!(newer, WriteOutcome::Applied);
        assert_eq!(older, WriteOutcome::Superseded { last_applied: 2 });
        assert_eq!(
            storage.get_item("cart").await.expect("get"),
            Some(json!("B"))
        );
    }

    #[tokio::test]
    async fn repeated_sequence_is_dropped() {
        let storage = MemoryStorage::new();
        let gate = WriteGate::new();
        gate.write(&storage, "k", 1, json!(1)).await.expect("first");
        let again = gate.write(&storage, "k", 1, json!(9)).await.expect("again");
        assert!(matches!(again, WriteOutcome::Superseded { .. }));
        assert_eq!(gate.last_applied().await, 1);
    }
}
