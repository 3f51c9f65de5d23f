//! Read-only view of records whose grace period is about to end.

use super::snapshot::SnapshotIndex;
use super::state::{StateStore, TrackerState};
use super::window::{days_until, Windows};
use crate::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One listed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiringEntry {
    /// Dotted name
    pub name: String,
    /// Expiration (unix ms)
    pub expiration_ms: i64,
    /// End of the grace period (unix ms)
    pub grace_period_end_ms: i64,
    /// Whole days left in the grace period, rounded up
    pub days_left: i64,
}

/// Query response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiringView {
    /// Records ordered by grace end, soonest first
    pub records: Vec<ExpiringEntry>,
    /// When the last full scan finished (unix ms)
    pub last_scan_completed_at: Option<i64>,
    /// Estimated progress of the current or last scan
    pub scan_progress_percent: u8,
    /// Number of listed records
    pub total_tracked: usize,
}

/// Builds [`ExpiringView`]s from the stored snapshot and state.
#[derive(Clone)]
pub struct QueryHandler {
    snapshot: SnapshotIndex,
    states: StateStore,
    windows: Windows,
    display_window_ms: i64,
}

impl QueryHandler {
    /// Create a handler listing records whose grace ends within
    /// `display_window_ms`.
    pub fn new(
        snapshot: SnapshotIndex,
        states: StateStore,
        windows: Windows,
        display_window_ms: i64,
    ) -> Self {
        Self {
            snapshot,
            states,
            windows,
            display_window_ms,
        }
    }

    /// Build the view at `now_ms`. Store errors yield an empty view.
    pub async fn query(&self, now_ms: i64) -> ExpiringView {
        match self.try_query(now_ms).await {
            Ok(view) => view,
            Err(e) => {
                warn!(error = %e, "Query failed, returning empty view");
                ExpiringView::default()
            }
        }
    }

    async fn try_query(&self, now_ms: i64) -> Result<ExpiringView> {
        let state = self.states.load().await?;
        let snapshot = self.snapshot.load().await?;

        // Sorting by expiration also sorts by grace end
        let records: Vec<ExpiringEntry> = snapshot
            .records()
            .into_iter()
            .filter(|r| r.expiration_ms < now_ms)
            .filter_map(|r| {
                let grace_end = self.windows.grace_end(r.expiration_ms);
                let remaining = grace_end - now_ms;
                (remaining > 0 && remaining <= self.display_window_ms).then(|| ExpiringEntry {
                    days_left: days_until(grace_end, now_ms),
                    name: r.name,
                    expiration_ms: r.expiration_ms,
                    grace_period_end_ms: grace_end,
                })
            })
            .collect();

        Ok(build_view(records, &state))
    }
}

fn build_view(records: Vec<ExpiringEntry>, state: &TrackerState) -> ExpiringView {
    ExpiringView {
        total_tracked: records.len(),
        records,
        last_scan_completed_at: state.metadata.last_scan_completed_at_ms,
        scan_progress_percent: state.scan_progress_percent(),
    }
}
