//! Chooses between scanning and maintenance for one invocation.

use super::state::TrackerState;
use super::window::Windows;
use serde::Serialize;

/// What an invocation should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Continue a full scan from its persisted cursor
    ResumeScan,
    /// Start a new full scan; the last one is stale or never happened
    StartScan,
    /// Re-verify records near the end of their grace period
    Maintain,
}

impl Decision {
    /// Label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::ResumeScan => "resume_scan",
            Decision::StartScan => "start_scan",
            Decision::Maintain => "maintain",
        }
    }

    /// Whether the full scanner runs.
    pub fn is_scan(&self) -> bool {
        !matches!(self, Decision::Maintain)
    }
}

/// Decide from persisted state alone.
pub fn decide(state: &TrackerState, now_ms: i64, windows: &Windows) -> Decision {
    if state.phase.is_scanning() {
        Decision::ResumeScan
    } else if windows.scan_is_stale(state.metadata.last_scan_completed_at_ms, now_ms) {
        Decision::StartScan
    } else {
        Decision::Maintain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::state::{ScanMetadata, ScanPhase};

    const NOW: i64 = 1_700_000_000_000;
    const HOUR_MS: i64 = 3_600_000;

    fn state(phase: ScanPhase, last_completed: Option<i64>) -> TrackerState {
        TrackerState {
            phase,
            metadata: ScanMetadata {
                last_scan_completed_at_ms: last_completed,
                total_fields_observed: 0,
            },
            updated_at_ms: 0,
        }
    }

    #[test]
    fn test_never_scanned_starts_scan() {
        let w = Windows::default();
        assert_eq!(decide(&TrackerState::default(), NOW, &w), Decision::StartScan);
    }

    #[test]
    fn test_in_progress_scan_resumes() {
        let w = Windows::default();
        let scanning = ScanPhase::Scanning {
            cursor: Some("c".into()),
            total_processed: 10,
            started_at_ms: NOW,
        };
        // Resumes even when the last completed scan is fresh
        let s = state(scanning, Some(NOW - HOUR_MS));
        assert_eq!(decide(&s, NOW, &w), Decision::ResumeScan);
    }

    #[test]
    fn test_fresh_scan_maintains() {
        let w = Windows::default();
        let s = state(ScanPhase::Idle, Some(NOW - HOUR_MS));
        assert_eq!(decide(&s, NOW, &w), Decision::Maintain);

        // An interrupted maintenance pass does not force a scan
        let s = state(ScanPhase::Maintaining { started_at_ms: NOW }, Some(NOW - HOUR_MS));
        assert_eq!(decide(&s, NOW, &w), Decision::Maintain);
    }

    #[test]
    fn test_stale_scan_restarts() {
        let w = Windows::default();
        let s = state(ScanPhase::Idle, Some(NOW - 25 * HOUR_MS));
        assert_eq!(decide(&s, NOW, &w), Decision::StartScan);
        assert!(Decision::StartScan.is_scan());
        assert!(!Decision::Maintain.is_scan());
    }
}
