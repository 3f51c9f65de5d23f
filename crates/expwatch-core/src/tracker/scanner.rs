//! Resumable full-table scanner.
//!
//! Each invocation fetches at most `pages_per_invocation` pages starting at
//! the persisted cursor, keeps the records inside the capture window, merges
//! them into the snapshot and then advances the scan state. The snapshot is
//! written before the state, so a failure between the two replays the same
//! pages next time, which the merge absorbs.

use super::record::{extract, TrackedRecord};
use super::snapshot::SnapshotIndex;
use super::state::{ScanPhase, StateStore, TrackerState};
use super::window::Windows;
use crate::error::RemoteError;
use crate::remote::{PageRequest, RemoteTable};
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Paging parameters.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// Table object that owns the fields
    pub parent_id: String,
    /// Nodes requested per page
    pub page_size: usize,
    /// Page budget per invocation
    pub pages_per_invocation: usize,
}

/// What one scanner batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanOutcome {
    /// Whether this batch resumed an earlier scan
    pub resumed: bool,
    /// Pages fetched successfully
    pub pages_fetched: usize,
    /// Nodes on those pages
    pub nodes_observed: u64,
    /// Nodes that could not be parsed
    pub nodes_skipped: u64,
    /// Records inside the capture window
    pub records_captured: usize,
    /// Whether pagination was exhausted
    pub completed: bool,
    /// Nodes seen by the whole scan so far
    pub total_processed: u64,
    /// Fetch error that ended the batch early
    pub fetch_error: Option<String>,
    /// Snapshot shards rewritten
    pub shards_written: usize,
    /// Records tracked after the merge
    pub snapshot_records: usize,
    /// Progress estimate after the batch
    pub progress_percent: u8,
}

/// Full scanner.
pub struct FullScanner {
    remote: Arc<dyn RemoteTable>,
    snapshot: SnapshotIndex,
    states: StateStore,
    windows: Windows,
    settings: ScanSettings,
}

impl FullScanner {
    /// Create a scanner.
    pub fn new(
        remote: Arc<dyn RemoteTable>,
        snapshot: SnapshotIndex,
        states: StateStore,
        windows: Windows,
        settings: ScanSettings,
    ) -> Self {
        Self {
            remote,
            snapshot,
            states,
            windows,
            settings,
        }
    }

    /// Run one batch from `state`, which the caller loaded.
    pub async fn run(&self, mut state: TrackerState, now_ms: i64) -> Result<ScanOutcome> {
        let (mut cursor, mut total_processed, started_at_ms, resumed) = match &state.phase {
            ScanPhase::Scanning {
                cursor,
                total_processed,
                started_at_ms,
            } => (cursor.clone(), *total_processed, *started_at_ms, true),
            _ => (None, 0, now_ms, false),
        };

        let mut outcome = ScanOutcome {
            resumed,
            ..ScanOutcome::default()
        };
        info!(
            resumed,
            total_processed,
            page_budget = self.settings.pages_per_invocation,
            "Full scan batch starting"
        );

        let mut captured: Vec<TrackedRecord> = Vec::new();
        for _ in 0..self.settings.pages_per_invocation {
            let request = PageRequest {
                parent_id: self.settings.parent_id.clone(),
                cursor: cursor.clone(),
                page_size: self.settings.page_size,
            };

            let page = match self.remote.fetch_page(&request).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(error = %e, cursor = ?cursor, "Page fetch failed, keeping partial progress");
                    outcome.fetch_error = Some(e.to_string());
                    break;
                }
            };
            if page.has_next_page && page.end_cursor.is_none() {
                let e = RemoteError::MissingCursor;
                warn!(error = %e, cursor = ?cursor, "Cannot advance scan");
                outcome.fetch_error = Some(e.to_string());
                break;
            }

            let nodes = page.nodes.len() as u64;
            outcome.pages_fetched += 1;
            outcome.nodes_observed += nodes;
            total_processed += nodes;

            for node in &page.nodes {
                match extract(node) {
                    Some(record) if self.windows.is_in_capture_window(record.expiration_ms, now_ms) => {
                        captured.push(record)
                    }
                    Some(_) => {}
                    None => outcome.nodes_skipped += 1,
                }
            }
            debug!(nodes, captured = captured.len(), "Page processed");

            if !page.has_next_page {
                outcome.completed = true;
                break;
            }
            cursor = page.end_cursor;
        }

        outcome.records_captured = captured.len();
        let written = self
            .snapshot
            .merge_incoming(captured, now_ms, &self.windows)
            .await?;
        outcome.shards_written = written.shards_written;
        outcome.snapshot_records = written.total_records;

        if outcome.completed {
            state.phase = ScanPhase::Idle;
            state.metadata.last_scan_completed_at_ms = Some(now_ms);
            state.metadata.total_fields_observed = total_processed;
        } else {
            state.phase = ScanPhase::Scanning {
                cursor,
                total_processed,
                started_at_ms,
            };
            state.metadata.total_fields_observed =
                state.metadata.total_fields_observed.max(total_processed);
        }
        self.states.save(&mut state, now_ms).await?;

        outcome.total_processed = total_processed;
        outcome.progress_percent = state.scan_progress_percent();
        if outcome.completed {
            info!(
                total_processed,
                snapshot_records = outcome.snapshot_records,
                duration_ms = now_ms - started_at_ms,
                "Full scan complete"
            );
        } else {
            info!(
                pages = outcome.pages_fetched,
                total_processed,
                progress_percent = outcome.progress_percent,
                "Full scan batch saved"
            );
        }
        Ok(outcome)
    }
}
