//! Process-local store backed by a concurrent map.

use super::{now_ms, KvStore, PutOptions};
use crate::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Debug, Clone)]
struct StoredValue {
    data: Vec<u8>,
    expires_at_ms: Option<i64>,
}

impl StoredValue {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms.map_or(true, |deadline| now_ms < deadline)
    }
}

/// In-memory key-value store.
///
/// Compare-and-swap is atomic per key through the map's entry API.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = now_ms();
        self.entries.iter().filter(|e| e.value().is_live(now)).count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = now_ms();
        Ok(self
            .entries
            .get(key)
            .filter(|v| v.is_live(now))
            .map(|v| v.data.clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>, options: PutOptions) -> Result<()> {
        let stored = StoredValue {
            data: value,
            expires_at_ms: options.expires_at_ms(now_ms()),
        };
        self.entries.insert(key.to_string(), stored);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let now = now_ms();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && e.value().is_live(now))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Vec<u8>,
        options: PutOptions,
    ) -> Result<bool> {
        let now = now_ms();
        let stored = StoredValue {
            data: value,
            expires_at_ms: options.expires_at_ms(now),
        };

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                let matches = match (current.is_live(now), expected) {
                    (true, Some(expected)) => current.data == expected,
                    (false, None) => true,
                    _ => false,
                };
                if matches {
                    occupied.insert(stored);
                }
                Ok(matches)
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Ok(false);
                }
                vacant.insert(stored);
                Ok(true)
            }
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let now = now_ms();
        let removed = self
            .entries
            .remove_if(key, |_, v| v.is_live(now) && v.data == expected);
        Ok(removed.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_get_put_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store
            .put("k", b"v1".to_vec(), PutOptions::default())
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v1".to_vec()));
        assert_eq!(store.len(), 1);

        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());

        // Deleting again is fine
        store.delete("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_by_prefix_sorted() {
        let store = MemoryStore::new();
        for key in ["p/b", "p/a", "q/a"] {
            store
                .put(key, Vec::new(), PutOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(store.list("p/").await.unwrap(), vec!["p/a", "p/b"]);
        assert!(store.list("z").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .put(
                "lease",
                b"x".to_vec(),
                PutOptions::with_ttl(Duration::from_millis(20)),
            )
            .await
            .unwrap();
        assert!(store.get("lease").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("lease").await.unwrap(), None);
        assert!(store.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = MemoryStore::new();

        // Create only if absent
        assert!(store
            .compare_and_swap("k", None, b"a".to_vec(), PutOptions::default())
            .await
            .unwrap());
        assert!(!store
            .compare_and_swap("k", None, b"b".to_vec(), PutOptions::default())
            .await
            .unwrap());

        // Replace only if matching
        assert!(!store
            .compare_and_swap("k", Some(b"zz"), b"b".to_vec(), PutOptions::default())
            .await
            .unwrap());
        assert!(store
            .compare_and_swap("k", Some(b"a"), b"b".to_vec(), PutOptions::default())
            .await
            .unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(b"b".to_vec()));

        // Expecting a value on a missing key fails
        assert!(!store
            .compare_and_swap("missing", Some(b"a"), b"b".to_vec(), PutOptions::default())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_compare_and_swap_over_expired_value() {
        let store = MemoryStore::new();
        store
            .put("k", b"old".to_vec(), PutOptions::with_ttl(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;

        // An expired value counts as absent
        assert!(!store
            .compare_and_swap("k", Some(b"old"), b"new".to_vec(), PutOptions::default())
            .await
            .unwrap());
        assert!(store
            .compare_and_swap("k", None, b"new".to_vec(), PutOptions::default())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_compare_and_delete() {
        let store = MemoryStore::new();
        store
            .put("k", b"mine".to_vec(), PutOptions::default())
            .await
            .unwrap();

        assert!(!store.compare_and_delete("k", b"theirs").await.unwrap());
        assert!(store.get("k").await.unwrap().is_some());

        assert!(store.compare_and_delete("k", b"mine").await.unwrap());
        assert!(store.get("k").await.unwrap().is_none());
    }
}
