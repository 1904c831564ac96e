//! In-process synchronization store.
//!
//! Arbitration is atomic across tasks and threads of one process only.
//! Replicas running in separate processes each see their own map, so this
//! backend provides no cross-process guarantee.

use crate::error::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use metrics::counter;

use super::SyncStore;

/// Process-local synchronization store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    values: DashMap<String, i64>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl SyncStore for InMemoryStore {
    async fn set(&self, key: &str, value: i64) -> Result<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.values.get(key).map(|v| *v))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.values.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.values.contains_key(key))
    }

    async fn set_greater_than(&self, key: &str, value: i64) -> Result<bool> {
        // The entry guard holds the shard write lock, so compare and write
        // happen as one step with respect to other callers.
        let won = match self.values.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if *occupied.get() < value {
                    occupied.insert(value);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(value);
                true
            }
        };

        counter!(
            "apex_sched_store_ops_total",
            "backend" => "in_memory",
            "op" => "set_greater_than",
            "result" => if won { "won" } else { "lost" },
        )
        .increment(1);

        Ok(won)
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = InMemoryStore::new();

        store.set("key", 42).await.unwrap();
        assert_eq!(store.get("key").await.unwrap(), Some(42));
        assert!(store.exists("key").await.unwrap());

        assert!(store.delete("key").await.unwrap());
        assert_eq!(store.get("key").await.unwrap(), None);
        assert!(!store.exists("key").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_absent_key() {
        let store = InMemoryStore::new();
        assert!(!store.delete("missing").await.unwrap());
        assert!(!store.exists("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_greater_than_sequence() {
        let store = InMemoryStore::new();

        assert!(store.set_greater_than("key", 12345).await.unwrap());
        assert!(!store.set_greater_than("key", 12345).await.unwrap());
        assert!(store.set_greater_than("key", 12346).await.unwrap());
        assert!(!store.set_greater_than("key", 12000).await.unwrap());
        assert_eq!(store.get("key").await.unwrap(), Some(12346));
    }

    #[tokio::test]
    async fn test_set_overrides_high_water_mark() {
        let store = InMemoryStore::new();

        store.set_greater_than("key", 100).await.unwrap();
        store.set("key", 10).await.unwrap();
        assert!(store.set_greater_than("key", 50).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_value_has_one_winner() {
        let store = Arc::new(InMemoryStore::new());

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.set_greater_than("race", 1_000).await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(store.len(), 1);
    }
}
