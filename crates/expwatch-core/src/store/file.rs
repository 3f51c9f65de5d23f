//! Directory-backed store: one checksummed file per key.
//!
//! ## On-disk layout
//!
//! Key `a/b/c` lives at `<root>/a/b/c.kv`. Each file is
//!
//! ```text
//! magic "EXW1" | flags u8 | expires_at_ms i64 LE | crc32 u32 LE | data
//! ```
//!
//! The CRC covers the expiry field and the data. Writes go to a temporary
//! sibling file that is fsynced and renamed over the target, so readers see
//! either the old or the new value.

use super::{now_ms, KvStore, PutOptions};
use crate::{Error, Result, StoreError};
use async_trait::async_trait;
use crc32fast::Hasher;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

const MAGIC: &[u8; 4] = b"EXW1";
const HEADER_LEN: usize = 4 + 1 + 8 + 4;
const FLAG_HAS_EXPIRY: u8 = 0b0000_0001;
const EXTENSION: &str = "kv";

/// File-per-key store.
///
/// Compare-and-swap is serialized by an in-process mutex shared by clones.
/// It is atomic with respect to other users of the same `FileStore`, not to
/// other processes writing the same directory. Filesystem work runs on the
/// blocking thread pool.
#[derive(Clone)]
pub struct FileStore {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

struct DecodedValue {
    data: Vec<u8>,
    expires_at_ms: Option<i64>,
}

impl DecodedValue {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms.map_or(true, |deadline| now_ms < deadline)
    }
}

impl FileStore {
    /// Open or create a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| {
            Error::Store(StoreError::WriteFailed {
                key: root.display().to_string(),
                message: format!("Failed to create data directory: {}", e),
            })
        })?;

        info!(path = %root.display(), "File store opened");

        Ok(Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn validate_key(key: &str) -> Result<()> {
        let invalid = |reason: &str| {
            Err(Error::Store(StoreError::InvalidKey {
                key: key.to_string(),
                reason: reason.to_string(),
            }))
        };

        if key.is_empty() {
            return invalid("empty key");
        }
        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.'))
        {
            return invalid("only [A-Za-z0-9/._-] are allowed");
        }
        if key
            .split('/')
            .any(|segment| segment.is_empty() || segment.starts_with('.'))
        {
            return invalid("empty, relative or hidden path segment");
        }
        Ok(())
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        Self::validate_key(key)?;
        Ok(self.root.join(format!("{}.{}", key, EXTENSION)))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        if segments.iter().any(|s| s.starts_with('.')) {
            return None;
        }
        let joined = segments.join("/");
        joined
            .strip_suffix(&format!(".{}", EXTENSION))
            .map(str::to_string)
    }

    fn encode(data: &[u8], expires_at_ms: Option<i64>) -> Vec<u8> {
        let (flags, expiry) = match expires_at_ms {
            Some(deadline) => (FLAG_HAS_EXPIRY, deadline),
            None => (0, 0),
        };
        let expiry_bytes = expiry.to_le_bytes();

        let mut hasher = Hasher::new();
        hasher.update(&expiry_bytes);
        hasher.update(data);
        let crc = hasher.finalize();

        let mut buf = Vec::with_capacity(HEADER_LEN + data.len());
        buf.extend_from_slice(MAGIC);
        buf.push(flags);
        buf.extend_from_slice(&expiry_bytes);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(data);
        buf
    }

    fn decode(key: &str, bytes: &[u8]) -> Result<DecodedValue> {
        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(Error::Store(StoreError::Truncated(key.to_string())));
        }

        let flags = bytes[4];
        let mut expiry_bytes = [0u8; 8];
        expiry_bytes.copy_from_slice(&bytes[5..13]);
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&bytes[13..17]);
        let expected = u32::from_le_bytes(crc_bytes);
        let data = &bytes[HEADER_LEN..];

        let mut hasher = Hasher::new();
        hasher.update(&expiry_bytes);
        hasher.update(data);
        let actual = hasher.finalize();
        if actual != expected {
            return Err(Error::Store(StoreError::ChecksumMismatch {
                key: key.to_string(),
                expected,
                actual,
            }));
        }

        let expires_at_ms =
            ((flags & FLAG_HAS_EXPIRY) != 0).then(|| i64::from_le_bytes(expiry_bytes));

        Ok(DecodedValue {
            data: data.to_vec(),
            expires_at_ms,
        })
    }

    fn read_value(&self, key: &str) -> Result<Option<DecodedValue>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Self::decode(key, &bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Store(StoreError::ReadFailed {
                key: key.to_string(),
                message: e.to_string(),
            })),
        }
    }

    fn read_live(&self, key: &str, now_ms: i64) -> Result<Option<Vec<u8>>> {
        Ok(self
            .read_value(key)?
            .filter(|v| v.is_live(now_ms))
            .map(|v| v.data))
    }

    fn write_value(&self, key: &str, data: &[u8], expires_at_ms: Option<i64>) -> Result<()> {
        let path = self.path_for(key)?;
        let write_failed = |e: std::io::Error| {
            Error::Store(StoreError::WriteFailed {
                key: key.to_string(),
                message: e.to_string(),
            })
        };

        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).map_err(write_failed)?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("value");
        let tmp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        let result = (|| {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&Self::encode(data, expires_at_ms))?;
            file.sync_all()?;
            fs::rename(&tmp_path, &path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(write_failed(e));
        }

        debug!(key, bytes = data.len(), "Value written");
        Ok(())
    }

    fn remove_value(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Store(StoreError::WriteFailed {
                key: key.to_string(),
                message: e.to_string(),
            })),
        }
    }

    fn list_live(&self, prefix: &str, now_ms: i64) -> Vec<String> {
        let mut keys = Vec::new();

        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(key) = self.key_for(entry.path()) else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            match self.read_value(&key) {
                Ok(Some(value)) if value.is_live(now_ms) => keys.push(key),
                Ok(_) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unreadable value while listing");
                }
            }
        }

        keys.sort();
        keys
    }

    /// Run `op` against a clone of this store on the blocking pool.
    async fn blocking<T, F>(&self, key: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(FileStore) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(store))
            .await
            .map_err(|e| {
                Error::Store(StoreError::TaskFailed {
                    key: key.to_string(),
                    message: e.to_string(),
                })
            })?
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let owned = key.to_string();
        self.blocking(key, move |store| store.read_live(&owned, now_ms()))
            .await
    }

    async fn put(&self, key: &str, value: Vec<u8>, options: PutOptions) -> Result<()> {
        let owned = key.to_string();
        self.blocking(key, move |store| {
            let _guard = store.write_lock.lock();
            store.write_value(&owned, &value, options.expires_at_ms(now_ms()))
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let owned = key.to_string();
        self.blocking(key, move |store| {
            let _guard = store.write_lock.lock();
            store.remove_value(&owned)
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let owned = prefix.to_string();
        self.blocking(prefix, move |store| Ok(store.list_live(&owned, now_ms())))
            .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Vec<u8>,
        options: PutOptions,
    ) -> Result<bool> {
        let owned = key.to_string();
        let expected = expected.map(<[u8]>::to_vec);
        self.blocking(key, move |store| {
            let _guard = store.write_lock.lock();
            let now = now_ms();
            let current = store.read_live(&owned, now)?;

            if current != expected {
                return Ok(false);
            }

            store.write_value(&owned, &value, options.expires_at_ms(now))?;
            Ok(true)
        })
        .await
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let owned = key.to_string();
        let expected = expected.to_vec();
        self.blocking(key, move |store| {
            let _guard = store.write_lock.lock();
            let current = store.read_live(&owned, now_ms())?;

            if current.as_deref() != Some(expected.as_slice()) {
                return Ok(false);
            }

            store.remove_value(&owned)?;
            Ok(true)
        })
        .await
    }
}
