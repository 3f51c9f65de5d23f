//! Scan phase and scan metadata, persisted together under one key.
//!
//! Every phase transition rewrites the whole [`TrackerState`] in a single
//! put, so the cursor and the metadata it implies can never diverge.

use crate::store::{KeySpace, KvStore, PutOptions};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Where the tracker is in its scan/maintain cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ScanPhase {
    /// No work in flight
    Idle,
    /// A full scan is in progress and resumes at `cursor`
    Scanning {
        /// Continuation token, absent before the first page
        cursor: Option<String>,
        /// Nodes seen by this scan so far
        total_processed: u64,
        /// When the scan started (unix ms)
        started_at_ms: i64,
    },
    /// An incremental maintenance pass is running
    Maintaining {
        /// When the pass started (unix ms)
        started_at_ms: i64,
    },
}

impl ScanPhase {
    /// Short label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanPhase::Idle => "idle",
            ScanPhase::Scanning { .. } => "scanning",
            ScanPhase::Maintaining { .. } => "maintaining",
        }
    }

    /// Whether a full scan is in progress.
    pub fn is_scanning(&self) -> bool {
        matches!(self, ScanPhase::Scanning { .. })
    }
}

/// Facts about past scans used for staleness and progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanMetadata {
    /// When the last full scan finished (unix ms)
    pub last_scan_completed_at_ms: Option<i64>,
    /// Table size estimate from the largest scan seen
    pub total_fields_observed: u64,
}

/// Persisted tracker state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerState {
    /// Current phase
    pub phase: ScanPhase,
    /// Scan metadata
    #[serde(default)]
    pub metadata: ScanMetadata,
    /// Last write time (unix ms)
    #[serde(default)]
    pub updated_at_ms: i64,
}

impl Default for TrackerState {
    fn default() -> Self {
        Self {
            phase: ScanPhase::Idle,
            metadata: ScanMetadata::default(),
            updated_at_ms: 0,
        }
    }
}

impl TrackerState {
    /// Estimated progress in percent.
    ///
    /// While scanning this is capped at 99 so a running scan never reads as
    /// done; otherwise 100 once any scan has completed, else 0.
    pub fn scan_progress_percent(&self) -> u8 {
        match &self.phase {
            ScanPhase::Scanning {
                total_processed, ..
            } => {
                let observed = self.metadata.total_fields_observed;
                if observed == 0 {
                    return 0;
                }
                let percent = total_processed.saturating_mul(100) / observed;
                percent.min(99) as u8
            }
            _ if self.metadata.last_scan_completed_at_ms.is_some() => 100,
            _ => 0,
        }
    }
}

/// Loads and saves [`TrackerState`].
#[derive(Clone)]
pub struct StateStore {
    store: Arc<dyn KvStore>,
    key: String,
}

impl StateStore {
    /// Create a state store over `store`.
    pub fn new(store: Arc<dyn KvStore>, keys: &KeySpace) -> Self {
        Self {
            store,
            key: keys.state(),
        }
    }

    /// Load the state; a missing key is a fresh `Idle` state.
    pub async fn load(&self) -> Result<TrackerState> {
        match self.store.get(&self.key).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(TrackerState::default()),
        }
    }

    /// Persist the state, stamping `updated_at_ms`.
    pub async fn save(&self, state: &mut TrackerState, now_ms: i64) -> Result<()> {
        state.updated_at_ms = now_ms;
        let bytes = serde_json::to_vec(state)?;
        self.store
            .put(&self.key, bytes, PutOptions::default())
            .await?;
        debug!(phase = state.phase.as_str(), "Tracker state saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn scanning(processed: u64, observed: u64) -> TrackerState {
        TrackerState {
            phase: ScanPhase::Scanning {
                cursor: Some("c".into()),
                total_processed: processed,
                started_at_ms: 0,
            },
            metadata: ScanMetadata {
                last_scan_completed_at_ms: None,
                total_fields_observed: observed,
            },
            updated_at_ms: 0,
        }
    }

    #[test]
    fn test_progress() {
        assert_eq!(TrackerState::default().scan_progress_percent(), 0);
        assert_eq!(scanning(10, 0).scan_progress_percent(), 0);
        assert_eq!(scanning(50, 200).scan_progress_percent(), 25);
        // A rescan larger than the previous estimate stays below 100
        assert_eq!(scanning(300, 200).scan_progress_percent(), 99);

        let done = TrackerState {
            metadata: ScanMetadata {
                last_scan_completed_at_ms: Some(5),
                total_fields_observed: 10,
            },
            ..TrackerState::default()
        };
        assert_eq!(done.scan_progress_percent(), 100);
    }

    #[test]
    fn test_phase_serialization() {
        let state = scanning(3, 9);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["phase"]["phase"], "scanning");
        assert_eq!(json["phase"]["cursor"], "c");
        assert_eq!(json["metadata"]["total_fields_observed"], 9);

        let back: TrackerState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }

    #[tokio::test]
    async fn test_load_missing_is_idle() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let states = StateStore::new(store, &KeySpace::new("t"));
        let state = states.load().await.unwrap();
        assert_eq!(state.phase, ScanPhase::Idle);
        assert_eq!(state.metadata, ScanMetadata::default());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let states = StateStore::new(store.clone(), &KeySpace::new("t"));

        let mut state = scanning(7, 7);
        states.save(&mut state, 1_234).await.unwrap();
        assert_eq!(state.updated_at_ms, 1_234);

        let loaded = states.load().await.unwrap();
        assert_eq!(loaded, state);
        assert!(store.get("t/state").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_corrupt_state_is_an_error() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        store
            .put("t/state", b"not json".to_vec(), PutOptions::default())
            .await
            .unwrap();
        let states = StateStore::new(store, &KeySpace::new("t"));
        assert!(states.load().await.is_err());
    }
}
