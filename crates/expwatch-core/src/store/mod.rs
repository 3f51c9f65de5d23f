//! Persistent key-value store used for tracker state, leases and the snapshot.
//!
//! The tracker only needs opaque byte values, prefix listing and two atomic
//! primitives (compare-and-swap, compare-and-delete) for its invocation lease.
//! Backends:
//!
//! - [`MemoryStore`]: process-local, used by tests and ephemeral runs
//! - [`FileStore`]: one checksummed file per key under a data directory

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::config::{StoreBackend, StoreConfig};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Options applied to a single write.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PutOptions {
    /// Value is treated as absent once this much time has passed
    pub ttl: Option<Duration>,
}

impl PutOptions {
    /// Write with an expiry.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl: Some(ttl) }
    }

    /// Absolute expiry in unix milliseconds, relative to `now_ms`.
    pub(crate) fn expires_at_ms(&self, now_ms: i64) -> Option<i64> {
        self.ttl
            .map(|ttl| now_ms.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)))
    }
}

/// Key-value store interface.
///
/// No transactions and no secondary indexes. Expired values behave exactly
/// like missing ones.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value, replacing any previous one.
    async fn put(&self, key: &str, value: Vec<u8>, options: PutOptions) -> Result<()>;

    /// Remove a key. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List live keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Write `value` only if the current value equals `expected`
    /// (`None` meaning absent or expired). Returns whether the write happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Vec<u8>,
        options: PutOptions,
    ) -> Result<bool>;

    /// Delete the key only if its current value equals `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool>;
}

#[async_trait]
impl<T: KvStore + ?Sized> KvStore for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>, options: PutOptions) -> Result<()> {
        (**self).put(key, value, options).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list(prefix).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Vec<u8>,
        options: PutOptions,
    ) -> Result<bool> {
        (**self)
            .compare_and_swap(key, expected, value, options)
            .await
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool> {
        (**self).compare_and_delete(key, expected).await
    }
}

/// Layout of the tracker's keys inside one namespace.
#[derive(Debug, Clone)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    /// Create a key space rooted at `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Scan phase plus scan metadata.
    pub fn state(&self) -> String {
        format!("{}/state", self.prefix)
    }

    /// Invocation lease.
    pub fn lease(&self) -> String {
        format!("{}/lease", self.prefix)
    }

    /// Snapshot shard manifest.
    pub fn manifest(&self) -> String {
        format!("{}/snapshot/manifest", self.prefix)
    }

    /// One snapshot shard.
    pub fn shard(&self, index: u32) -> String {
        format!("{}/snapshot/shard/{:03}", self.prefix, index)
    }

    /// Prefix shared by all snapshot shards.
    pub fn shard_prefix(&self) -> String {
        format!("{}/snapshot/shard/", self.prefix)
    }
}

/// Open the configured store backend.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn KvStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store; state is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::File => Ok(Arc::new(FileStore::open(&config.data_dir)?)),
    }
}

/// Current wall-clock time in unix milliseconds.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_space_layout() {
        let keys = KeySpace::new("expwatch");
        assert_eq!(keys.state(), "expwatch/state");
        assert_eq!(keys.lease(), "expwatch/lease");
        assert_eq!(keys.manifest(), "expwatch/snapshot/manifest");
        assert_eq!(keys.shard(7), "expwatch/snapshot/shard/007");
        assert!(keys.shard(7).starts_with(&keys.shard_prefix()));
    }

    #[test]
    fn test_put_options_expiry() {
        assert_eq!(PutOptions::default().expires_at_ms(1_000), None);
        let opts = PutOptions::with_ttl(Duration::from_secs(2));
        assert_eq!(opts.expires_at_ms(1_000), Some(3_000));
    }

    #[tokio::test]
    async fn test_open_memory_store() {
        let config = StoreConfig {
            backend: StoreBackend::Memory,
            ..StoreConfig::default()
        };
        let store = open_store(&config).unwrap();
        store
            .put("a", b"1".to_vec(), PutOptions::default())
            .await
            .unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"1".to_vec()));
    }
}
