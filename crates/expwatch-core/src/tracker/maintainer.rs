//! Incremental maintenance between full scans.
//!
//! A pass prunes records past their grace period and re-verifies expired
//! records whose grace period ends within the expiring window. Lookups run in
//! concurrent batches of `verify_batch_size`, batches one after another, and
//! at most `max_verifications_per_pass` lookups run per pass; the candidates
//! closest to their grace end go first.

use super::merge::merge;
use super::record::{key_labels, parse_expiration, TrackedRecord};
use super::snapshot::SnapshotIndex;
use super::state::{ScanPhase, StateStore, TrackerState};
use super::window::Windows;
use crate::metrics::VerificationOutcome;
use crate::remote::{LookupRequest, RemoteTable};
use crate::Result;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Verification parameters.
#[derive(Debug, Clone)]
pub struct MaintainSettings {
    /// Table object that owns the fields
    pub parent_id: String,
    /// Root label prepended to lookup keys
    pub root_label: String,
    /// Concurrent lookups per batch
    pub verify_batch_size: usize,
    /// Lookup budget per pass
    pub max_verifications_per_pass: usize,
}

/// What one maintenance pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceOutcome {
    /// Records loaded
    pub tracked_before: usize,
    /// Records dropped for being past their grace period
    pub pruned: usize,
    /// Records eligible for verification
    pub candidates: usize,
    /// Candidates left for a later pass because of the lookup budget
    pub deferred: usize,
    /// Dropped because they were renewed
    pub renewed: usize,
    /// Kept with a changed expiration
    pub refreshed: usize,
    /// Kept with the same expiration
    pub unchanged: usize,
    /// Kept because the lookup failed or returned nothing usable
    pub failed: usize,
    /// Whether the snapshot was written
    pub wrote_snapshot: bool,
    /// Snapshot shards rewritten
    pub shards_written: usize,
    /// Records tracked afterwards
    pub snapshot_records: usize,
}

struct Verification {
    record: TrackedRecord,
    outcome: VerificationOutcome,
}

/// Incremental maintainer.
pub struct IncrementalMaintainer {
    remote: Arc<dyn RemoteTable>,
    snapshot: SnapshotIndex,
    states: StateStore,
    windows: Windows,
    settings: MaintainSettings,
}

impl IncrementalMaintainer {
    /// Create a maintainer.
    pub fn new(
        remote: Arc<dyn RemoteTable>,
        snapshot: SnapshotIndex,
        states: StateStore,
        windows: Windows,
        settings: MaintainSettings,
    ) -> Self {
        Self {
            remote,
            snapshot,
            states,
            windows,
            settings,
        }
    }

    /// Run one pass from `state`, which the caller loaded.
    pub async fn run(&self, mut state: TrackerState, now_ms: i64) -> Result<MaintenanceOutcome> {
        let current = self.snapshot.load().await?;
        let mut outcome = MaintenanceOutcome {
            tracked_before: current.len(),
            ..MaintenanceOutcome::default()
        };
        if current.is_empty() {
            debug!("Snapshot empty, nothing to maintain");
            return Ok(outcome);
        }

        state.phase = ScanPhase::Maintaining {
            started_at_ms: now_ms,
        };
        self.states.save(&mut state, now_ms).await?;

        // Records come back sorted by expiration, so candidates are already
        // ordered by grace end.
        let mut passthrough = Vec::new();
        let mut candidates = Vec::new();
        for record in current.records() {
            if self.windows.is_stale(record.expiration_ms, now_ms) {
                outcome.pruned += 1;
            } else if self.windows.needs_verification(record.expiration_ms, now_ms) {
                candidates.push(record);
            } else {
                passthrough.push(record);
            }
        }
        outcome.candidates = candidates.len();

        let budget = self.settings.max_verifications_per_pass;
        if candidates.len() > budget {
            let deferred = candidates.split_off(budget);
            outcome.deferred = deferred.len();
            passthrough.extend(deferred);
        }

        let mut kept = Vec::with_capacity(candidates.len());
        for batch in candidates.chunks(self.settings.verify_batch_size.max(1)) {
            let results = join_all(batch.iter().map(|r| self.verify(r, now_ms))).await;
            for verification in results {
                match verification.outcome {
                    VerificationOutcome::Renewed => outcome.renewed += 1,
                    VerificationOutcome::Refreshed => outcome.refreshed += 1,
                    VerificationOutcome::Unchanged => outcome.unchanged += 1,
                    VerificationOutcome::Failed => outcome.failed += 1,
                }
                if verification.outcome != VerificationOutcome::Renewed {
                    kept.push(verification.record);
                }
            }
        }

        if outcome.pruned > 0 || outcome.renewed > 0 || outcome.refreshed > 0 {
            let merged = merge(passthrough, kept, now_ms, &self.windows);
            let written = self.snapshot.replace(&current, merged, now_ms).await?;
            outcome.wrote_snapshot = true;
            outcome.shards_written = written.shards_written;
            outcome.snapshot_records = written.total_records;
        } else {
            outcome.snapshot_records = outcome.tracked_before;
        }

        state.phase = ScanPhase::Idle;
        self.states.save(&mut state, now_ms).await?;

        info!(
            tracked = outcome.tracked_before,
            pruned = outcome.pruned,
            verified = outcome.candidates - outcome.deferred,
            renewed = outcome.renewed,
            refreshed = outcome.refreshed,
            failed = outcome.failed,
            deferred = outcome.deferred,
            wrote_snapshot = outcome.wrote_snapshot,
            "Maintenance pass complete"
        );
        Ok(outcome)
    }

    async fn verify(&self, record: &TrackedRecord, now_ms: i64) -> Verification {
        let request = LookupRequest {
            parent_id: self.settings.parent_id.clone(),
            key_labels: key_labels(&record.name, &self.settings.root_label),
        };

        let looked_up = match self.remote.lookup(&request).await {
            Ok(result) => result.expiration_raw.as_deref().and_then(parse_expiration),
            Err(e) => {
                warn!(name = %record.name, error = %e, "Lookup failed, keeping record");
                None
            }
        };

        let Some(expiration_ms) = looked_up else {
            return Verification {
                record: record.clone(),
                outcome: VerificationOutcome::Failed,
            };
        };

        if self.windows.is_renewed(expiration_ms, now_ms) {
            debug!(name = %record.name, expiration_ms, "Record renewed");
            return Verification {
                record: record.clone(),
                outcome: VerificationOutcome::Renewed,
            };
        }

        let outcome = if expiration_ms == record.expiration_ms {
            VerificationOutcome::Unchanged
        } else {
            VerificationOutcome::Refreshed
        };
        Verification {
            record: TrackedRecord::new(record.name.clone(), expiration_ms),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::remote::{LookupResult, Page, PageRequest};
    use crate::store::{KeySpace, KvStore, MemoryStore};
    use crate::tracker::window::DAY_MS;
    use crate::Error;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    const NOW: i64 = 1_700_000_000_000;

    /// Answers lookups from a map keyed by the joined key labels.
    #[derive(Default)]
    struct LookupTable {
        answers: HashMap<String, Option<String>>,
        failing: Vec<String>,
        calls: Mutex<usize>,
    }

    impl LookupTable {
        fn answer(mut self, name: &str, expiration_ms: i64) -> Self {
            self.answers
                .insert(name.to_string(), Some(expiration_ms.to_string()));
            self
        }
    }

    #[async_trait]
    impl RemoteTable for LookupTable {
        async fn fetch_page(&self, _request: &PageRequest) -> Result<Page> {
            Ok(Page::default())
        }

        async fn lookup(&self, request: &LookupRequest) -> Result<LookupResult> {
            *self.calls.lock() += 1;
            let name = crate::tracker::record::name_from_labels(&request.key_labels).unwrap();
            if self.failing.contains(&name) {
                return Err(Error::Remote(RemoteError::HttpStatus {
                    status: 502,
                    body: String::new(),
                }));
            }
            Ok(LookupResult {
                expiration_raw: self.answers.get(&name).cloned().flatten(),
            })
        }
    }

    fn rec(name: &str, offset_days: i64) -> TrackedRecord {
        TrackedRecord::new(name, NOW + offset_days * DAY_MS)
    }

    async fn setup(
        table: LookupTable,
        records: Vec<TrackedRecord>,
        max_verifications: usize,
    ) -> (IncrementalMaintainer, SnapshotIndex, StateStore, Arc<LookupTable>) {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let keys = KeySpace::new("t");
        let snapshot = SnapshotIndex::new(store.clone(), keys.clone(), 4);
        let states = StateStore::new(store, &keys);
        // Seed far enough in the past that nothing is pruned on insert
        snapshot
            .merge_incoming(records, NOW - 10 * DAY_MS, &Windows::default())
            .await
            .unwrap();

        let table = Arc::new(table);
        let maintainer = IncrementalMaintainer::new(
            table.clone(),
            snapshot.clone(),
            states.clone(),
            Windows::default(),
            MaintainSettings {
                parent_id: "0xtable".into(),
                root_label: "sui".into(),
                verify_batch_size: 2,
                max_verifications_per_pass: max_verifications,
            },
        );
        (maintainer, snapshot, states, table)
    }

    #[tokio::test]
    async fn test_prunes_past_grace() {
        let (maintainer, snapshot, _, table) =
            setup(LookupTable::default(), vec![rec("old", -31)], 10).await;

        let outcome = maintainer.run(TrackerState::default(), NOW).await.unwrap();
        assert_eq!(outcome.pruned, 1);
        assert!(outcome.wrote_snapshot);
        assert!(snapshot.load().await.unwrap().is_empty());
        assert_eq!(*table.calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_renewed_record_dropped() {
        let table = LookupTable::default().answer("a", NOW + 365 * DAY_MS);
        let (maintainer, snapshot, _, _) = setup(table, vec![rec("a", -28)], 10).await;

        let outcome = maintainer.run(TrackerState::default(), NOW).await.unwrap();
        assert_eq!(outcome.renewed, 1);
        assert!(outcome.wrote_snapshot);
        assert!(snapshot.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_skips_write() {
        let table = LookupTable::default().answer("a", NOW - 28 * DAY_MS);
        let (maintainer, _, states, _) =
            setup(table, vec![rec("a", -28), rec("fresh", -1)], 10).await;

        let outcome = maintainer.run(TrackerState::default(), NOW).await.unwrap();
        assert_eq!(outcome.unchanged, 1);
        assert!(!outcome.wrote_snapshot);
        assert_eq!(outcome.snapshot_records, 2);
        assert_eq!(states.load().await.unwrap().phase, ScanPhase::Idle);
    }

    #[tokio::test]
    async fn test_failed_lookup_keeps_record() {
        let table = LookupTable {
            failing: vec!["a".into()],
            ..LookupTable::default()
        };
        let (maintainer, snapshot, _, _) = setup(table, vec![rec("a", -28), rec("b", -27)], 10).await;

        let outcome = maintainer.run(TrackerState::default(), NOW).await.unwrap();
        // "a" failed, "b" has no answer at all
        assert_eq!(outcome.failed, 2);
        assert!(!outcome.wrote_snapshot);
        assert_eq!(snapshot.load().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_refreshed_expiration_is_written() {
        let table = LookupTable::default().answer("a", NOW - 25 * DAY_MS);
        let (maintainer, snapshot, _, _) = setup(table, vec![rec("a", -28)], 10).await;

        let outcome = maintainer.run(TrackerState::default(), NOW).await.unwrap();
        assert_eq!(outcome.refreshed, 1);
        assert!(outcome.wrote_snapshot);
        assert_eq!(snapshot.load().await.unwrap().records(), vec![rec("a", -25)]);
    }

    #[tokio::test]
    async fn test_verification_budget() {
        let records: Vec<TrackedRecord> = (0..5).map(|i| rec(&format!("n{i}"), -29 + i)).collect();
        let (maintainer, snapshot, _, table) = setup(LookupTable::default(), records, 3).await;

        let outcome = maintainer.run(TrackerState::default(), NOW).await.unwrap();
        assert_eq!(outcome.candidates, 5);
        assert_eq!(outcome.deferred, 2);
        assert_eq!(*table.calls.lock(), 3);
        assert_eq!(snapshot.load().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_empty_snapshot_is_noop() {
        let (maintainer, _, states, _) = setup(LookupTable::default(), Vec::new(), 10).await;
        let outcome = maintainer.run(TrackerState::default(), NOW).await.unwrap();
        assert_eq!(outcome, MaintenanceOutcome::default());
        assert_eq!(states.load().await.unwrap(), TrackerState::default());
    }
}
