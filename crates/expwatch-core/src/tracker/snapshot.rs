//! Sharded snapshot index.
//!
//! Records are spread over `shard_count` shards by a CRC32 hash of their
//! name. Each shard is a sorted JSON blob; a manifest keeps per-shard counts
//! and minimum expirations so a merge can skip shards that neither receive
//! incoming records nor hold anything past the grace cutoff. Since a name
//! always lands in the same shard, deduplicating within a shard is enough.
//!
//! A shard that fails its integrity check reads as empty, both when listing
//! and when loading directly, and is overwritten by the next write to it.
//!
//! Shards are written before the manifest. A crash in between leaves a
//! manifest that under-reports, which only delays pruning until the shard is
//! next touched.

use super::merge::{merge, sort_records};
use super::record::TrackedRecord;
use super::window::Windows;
use crate::store::{KeySpace, KvStore, PutOptions};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MANIFEST_VERSION: u32 = 1;

/// Summary of one shard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSummary {
    /// Records in the shard
    pub count: usize,
    /// Smallest expiration in the shard
    pub min_expiration_ms: Option<i64>,
}

impl ShardSummary {
    fn of(records: &[TrackedRecord]) -> Self {
        Self {
            count: records.len(),
            min_expiration_ms: records.iter().map(|r| r.expiration_ms).min(),
        }
    }
}

/// Persisted shard manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardManifest {
    /// Format version
    pub version: u32,
    /// Layout the shards were written with
    pub shard_count: u32,
    /// Per-shard summaries, indexed by shard
    pub shards: Vec<ShardSummary>,
    /// Last write time (unix ms)
    pub updated_at_ms: i64,
}

impl ShardManifest {
    fn empty(shard_count: u32) -> Self {
        Self {
            version: MANIFEST_VERSION,
            shard_count,
            shards: vec![ShardSummary::default(); shard_count as usize],
            updated_at_ms: 0,
        }
    }

    /// Total records across all shards.
    pub fn total_records(&self) -> usize {
        self.shards.iter().map(|s| s.count).sum()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ShardBlob {
    records: Vec<TrackedRecord>,
}

/// Snapshot as loaded from the store, grouped by shard.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    shards: BTreeMap<u32, Vec<TrackedRecord>>,
}

impl Snapshot {
    /// All records sorted by expiration then name.
    pub fn records(&self) -> Vec<TrackedRecord> {
        kway_merge(self.shards.values().map(Vec::as_slice))
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.shards.values().map(Vec::len).sum()
    }

    /// Whether the snapshot holds no records.
    pub fn is_empty(&self) -> bool {
        self.shards.values().all(Vec::is_empty)
    }
}

/// Result of a snapshot write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Shards written or deleted
    pub shards_written: usize,
    /// Records in the snapshot afterwards
    pub total_records: usize,
}

/// Sharded snapshot over a key-value store.
#[derive(Clone)]
pub struct SnapshotIndex {
    store: Arc<dyn KvStore>,
    keys: KeySpace,
    shard_count: u32,
}

impl SnapshotIndex {
    /// Create an index with `shard_count` shards (at least one).
    pub fn new(store: Arc<dyn KvStore>, keys: KeySpace, shard_count: u32) -> Self {
        Self {
            store,
            keys,
            shard_count: shard_count.max(1),
        }
    }

    /// Configured shard count.
    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// Shard a name belongs to.
    pub fn shard_for(&self, name: &str) -> u32 {
        crc32fast::hash(name.as_bytes()) % self.shard_count
    }

    /// Load the manifest, if one was written.
    pub async fn load_manifest(&self) -> Result<Option<ShardManifest>> {
        match self.store.get(&self.keys.manifest()).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn matches_layout(&self, manifest: &ShardManifest) -> bool {
        manifest.version == MANIFEST_VERSION
            && manifest.shard_count == self.shard_count
            && manifest.shards.len() == self.shard_count as usize
    }

    /// Load one shard. A shard that exists but cannot be decoded is treated
    /// as empty; the next write to it replaces the bad value.
    async fn load_shard(&self, index: u32) -> Result<Vec<TrackedRecord>> {
        let key = self.keys.shard(index);
        let decoded: Result<Vec<TrackedRecord>> = match self.store.get(&key).await {
            Ok(Some(bytes)) => serde_json::from_slice::<ShardBlob>(&bytes)
                .map(|blob| blob.records)
                .map_err(Into::into),
            Ok(None) => Ok(Vec::new()),
            Err(e) => Err(e),
        };
        match decoded {
            Err(e) if e.is_corrupt_value() => {
                warn!(key = %key, error = %e, "Unreadable snapshot shard, treating as empty");
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Load every stored shard, whatever layout it was written with.
    pub async fn load(&self) -> Result<Snapshot> {
        let prefix = self.keys.shard_prefix();
        let mut shards = BTreeMap::new();
        for key in self.store.list(&prefix).await? {
            let Some(index) = key
                .strip_prefix(&prefix)
                .and_then(|suffix| suffix.parse::<u32>().ok())
            else {
                warn!(key = %key, "Ignoring unrecognized snapshot key");
                continue;
            };
            let mut records = self.load_shard(index).await?;
            sort_records(&mut records);
            shards.insert(index, records);
        }
        Ok(Snapshot { shards })
    }

    /// Merge `incoming` into the snapshot.
    ///
    /// Only shards that receive incoming records or whose minimum expiration
    /// is past the grace cutoff are read; only shards whose content changed
    /// are written. Without a usable manifest every shard is rewritten.
    pub async fn merge_incoming(
        &self,
        incoming: Vec<TrackedRecord>,
        now_ms: i64,
        windows: &Windows,
    ) -> Result<WriteSummary> {
        let manifest = match self.load_manifest().await? {
            Some(m) if self.matches_layout(&m) => m,
            other => {
                if other.is_some() {
                    info!(
                        shard_count = self.shard_count,
                        "Snapshot layout changed, rewriting all shards"
                    );
                }
                let current = self.load().await?;
                let merged = merge(current.records(), incoming, now_ms, windows);
                return self.replace(&current, merged, now_ms).await;
            }
        };

        let mut by_shard: HashMap<u32, Vec<TrackedRecord>> = HashMap::new();
        for record in incoming {
            by_shard
                .entry(self.shard_for(&record.name))
                .or_default()
                .push(record);
        }

        let cutoff = windows.grace_cutoff(now_ms);
        let mut targets: BTreeSet<u32> = by_shard.keys().copied().collect();
        for (index, summary) in manifest.shards.iter().enumerate() {
            if summary.min_expiration_ms.is_some_and(|min| min <= cutoff) {
                targets.insert(index as u32);
            }
        }

        let mut manifest = manifest;
        let mut shards_written = 0;
        for index in targets {
            let current = self.load_shard(index).await?;
            let additions = by_shard.remove(&index).unwrap_or_default();
            let merged = merge(current.iter().cloned(), additions, now_ms, windows);
            if merged != current {
                self.write_shard(index, &merged).await?;
                shards_written += 1;
            }
            manifest.shards[index as usize] = ShardSummary::of(&merged);
        }

        if shards_written > 0 {
            self.write_manifest(&mut manifest, now_ms).await?;
        }

        let summary = WriteSummary {
            shards_written,
            total_records: manifest.total_records(),
        };
        debug!(
            shards_written = summary.shards_written,
            total_records = summary.total_records,
            "Snapshot merged"
        );
        Ok(summary)
    }

    /// Replace the snapshot contents with `records`.
    ///
    /// `current` is what the caller loaded; shards whose content is
    /// unchanged are not written, and shards left empty are deleted.
    pub async fn replace(
        &self,
        current: &Snapshot,
        records: Vec<TrackedRecord>,
        now_ms: i64,
    ) -> Result<WriteSummary> {
        let mut desired: BTreeMap<u32, Vec<TrackedRecord>> = BTreeMap::new();
        for record in records {
            desired
                .entry(self.shard_for(&record.name))
                .or_default()
                .push(record);
        }
        for shard in desired.values_mut() {
            sort_records(shard);
        }

        let mut indices: BTreeSet<u32> = current.shards.keys().copied().collect();
        indices.extend(desired.keys().copied());

        let mut manifest = ShardManifest::empty(self.shard_count);
        let mut shards_written = 0;
        for index in indices {
            let existing = current.shards.get(&index).map(Vec::as_slice).unwrap_or(&[]);
            let wanted = desired.get(&index).map(Vec::as_slice).unwrap_or(&[]);
            if existing != wanted {
                self.write_shard(index, wanted).await?;
                shards_written += 1;
            }
            if let Some(slot) = manifest.shards.get_mut(index as usize) {
                *slot = ShardSummary::of(wanted);
            }
        }
        self.write_manifest(&mut manifest, now_ms).await?;

        Ok(WriteSummary {
            shards_written,
            total_records: manifest.total_records(),
        })
    }

    async fn write_shard(&self, index: u32, records: &[TrackedRecord]) -> Result<()> {
        let key = self.keys.shard(index);
        if records.is_empty() {
            return self.store.delete(&key).await;
        }
        let blob = ShardBlob {
            records: records.to_vec(),
        };
        self.store
            .put(&key, serde_json::to_vec(&blob)?, PutOptions::default())
            .await
    }

    async fn write_manifest(&self, manifest: &mut ShardManifest, now_ms: i64) -> Result<()> {
        manifest.updated_at_ms = now_ms;
        self.store
            .put(
                &self.keys.manifest(),
                serde_json::to_vec(manifest)?,
                PutOptions::default(),
            )
            .await
    }
}

/// Merge sorted runs into one sorted list.
fn kway_merge<'a>(runs: impl Iterator<Item = &'a [TrackedRecord]>) -> Vec<TrackedRecord> {
    let runs: Vec<&[TrackedRecord]> = runs.collect();
    let total = runs.iter().map(|r| r.len()).sum();
    let mut out = Vec::with_capacity(total);

    let mut heap = BinaryHeap::new();
    for (run, records) in runs.iter().enumerate() {
        if let Some(first) = records.first() {
            heap.push(Reverse((first.expiration_ms, first.name.as_str(), run, 0usize)));
        }
    }
    while let Some(Reverse((_, _, run, pos))) = heap.pop() {
        out.push(runs[run][pos].clone());
        if let Some(next) = runs[run].get(pos + 1) {
            heap.push(Reverse((next.expiration_ms, next.name.as_str(), run, pos + 1)));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::tracker::window::DAY_MS;

    const NOW: i64 = 1_700_000_000_000;

    fn rec(name: &str, offset_days: i64) -> TrackedRecord {
        TrackedRecord::new(name, NOW + offset_days * DAY_MS)
    }

    fn index(shards: u32) -> (Arc<MemoryStore>, SnapshotIndex) {
        let store = Arc::new(MemoryStore::new());
        let index = SnapshotIndex::new(store.clone(), KeySpace::new("t"), shards);
        (store, index)
    }

    #[tokio::test]
    async fn test_empty_snapshot() {
        let (_, index) = index(4);
        let snapshot = index.load().await.unwrap();
        assert!(snapshot.is_empty());
        assert!(index.load_manifest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_merge_and_load_sorted() {
        let (_, index) = index(4);
        let w = Windows::default();
        let summary = index
            .merge_incoming(vec![rec("b", -2), rec("a", -5), rec("c", 0)], NOW, &w)
            .await
            .unwrap();
        assert_eq!(summary.total_records, 3);

        let records = index.load().await.unwrap().records();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let manifest = index.load_manifest().await.unwrap().unwrap();
        assert_eq!(manifest.shard_count, 4);
        assert_eq!(manifest.total_records(), 3);
    }

    #[tokio::test]
    async fn test_merge_dedups_across_batches() {
        let (_, index) = index(8);
        let w = Windows::default();
        index
            .merge_incoming(vec![rec("x", -5)], NOW, &w)
            .await
            .unwrap();
        index
            .merge_incoming(vec![rec("x", -3)], NOW, &w)
            .await
            .unwrap();
        assert_eq!(index.load().await.unwrap().records(), vec![rec("x", -3)]);
    }

    #[tokio::test]
    async fn test_only_touched_shards_are_rewritten() {
        let (_, index) = index(16);
        let w = Windows::default();
        let names: Vec<String> = (0..40).map(|i| format!("name{i}")).collect();
        let initial: Vec<TrackedRecord> = names.iter().map(|n| rec(n, -1)).collect();
        index.merge_incoming(initial, NOW, &w).await.unwrap();

        // Re-merging identical records writes nothing
        let same = vec![rec(&names[0], -1)];
        let summary = index.merge_incoming(same, NOW, &w).await.unwrap();
        assert_eq!(summary.shards_written, 0);

        // One changed record rewrites exactly its shard
        let changed = vec![rec(&names[0], -2)];
        let summary = index.merge_incoming(changed, NOW, &w).await.unwrap();
        assert_eq!(summary.shards_written, 1);
        assert_eq!(summary.total_records, 40);
    }

    #[tokio::test]
    async fn test_stale_shard_pruned_without_incoming() {
        let (_, index) = index(4);
        let w = Windows::default();
        index
            .merge_incoming(vec![rec("old", -29), rec("fresh", -1)], NOW, &w)
            .await
            .unwrap();

        // Two days later "old" is past its grace period
        let later = NOW + 2 * DAY_MS;
        let summary = index.merge_incoming(Vec::new(), later, &w).await.unwrap();
        assert_eq!(summary.shards_written, 1);
        assert_eq!(summary.total_records, 1);
        assert_eq!(index.load().await.unwrap().records(), vec![rec("fresh", -1)]);
    }

    #[tokio::test]
    async fn test_replace_deletes_emptied_shards() {
        let (store, index) = index(4);
        let w = Windows::default();
        index
            .merge_incoming(vec![rec("a", -1), rec("b", -1)], NOW, &w)
            .await
            .unwrap();

        let current = index.load().await.unwrap();
        let summary = index.replace(&current, Vec::new(), NOW).await.unwrap();
        assert_eq!(summary.total_records, 0);
        assert!(summary.shards_written >= 1);
        assert!(store.list("t/snapshot/shard/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reshard_on_layout_change() {
        let store = Arc::new(MemoryStore::new());
        let w = Windows::default();
        let small = SnapshotIndex::new(store.clone(), KeySpace::new("t"), 2);
        let records: Vec<TrackedRecord> = (0..20).map(|i| rec(&format!("n{i}"), -1)).collect();
        small.merge_incoming(records, NOW, &w).await.unwrap();

        let large = SnapshotIndex::new(store.clone(), KeySpace::new("t"), 8);
        let summary = large.merge_incoming(Vec::new(), NOW, &w).await.unwrap();
        assert_eq!(summary.total_records, 20);

        let manifest = large.load_manifest().await.unwrap().unwrap();
        assert_eq!(manifest.shard_count, 8);

        let snapshot = large.load().await.unwrap();
        assert_eq!(snapshot.len(), 20);
        for record in snapshot.records() {
            let key = KeySpace::new("t").shard(large.shard_for(&record.name));
            assert!(store.get(&key).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_unreadable_shard_is_replaced_on_merge() {
        let (store, index) = index(1);
        let w = Windows::default();
        index
            .merge_incoming(vec![rec("a", -1)], NOW, &w)
            .await
            .unwrap();
        store
            .put("t/snapshot/shard/000", b"{not json".to_vec(), PutOptions::default())
            .await
            .unwrap();

        // Both read paths agree the shard is empty
        assert!(index.load().await.unwrap().is_empty());

        let summary = index
            .merge_incoming(vec![rec("b", -2)], NOW, &w)
            .await
            .unwrap();
        assert_eq!(summary.shards_written, 1);
        assert_eq!(summary.total_records, 1);
        assert_eq!(index.load().await.unwrap().records(), vec![rec("b", -2)]);
    }

    #[test]
    fn test_kway_merge() {
        let a = vec![rec("a", -3), rec("d", 0)];
        let b = vec![rec("b", -3), rec("c", -1)];
        let merged = kway_merge([a.as_slice(), b.as_slice(), &[]].into_iter());
        let names: Vec<&str> = merged.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d"]);
    }
}
