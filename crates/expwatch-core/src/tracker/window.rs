//! Time windows that decide which records are tracked.

use crate::config::TrackerConfig;

/// Milliseconds in one day.
pub const DAY_MS: i64 = 86_400_000;

/// Grace, rescan and expiring windows in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Windows {
    /// How long a record stays tracked after it expires
    pub grace_ms: i64,
    /// Age after which a completed scan is stale; also the capture lookahead
    pub rescan_interval_ms: i64,
    /// Distance to grace end at which a record is re-verified
    pub expiring_window_ms: i64,
}

impl Windows {
    /// Build windows from tracker configuration.
    pub fn from_config(config: &TrackerConfig) -> Self {
        let rescan_ms = i64::try_from(config.rescan_interval_seconds)
            .unwrap_or(i64::MAX / 1_000)
            .saturating_mul(1_000);
        Self {
            grace_ms: i64::from(config.grace_period_days) * DAY_MS,
            rescan_interval_ms: rescan_ms,
            expiring_window_ms: i64::from(config.expiring_window_days) * DAY_MS,
        }
    }

    /// Timestamp at or before which an expiration is past its grace period.
    pub fn grace_cutoff(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.grace_ms)
    }

    /// Whether a record should be dropped from the snapshot.
    pub fn is_stale(&self, expiration_ms: i64, now_ms: i64) -> bool {
        expiration_ms <= self.grace_cutoff(now_ms)
    }

    /// End of the grace period for an expiration.
    pub fn grace_end(&self, expiration_ms: i64) -> i64 {
        expiration_ms.saturating_add(self.grace_ms)
    }

    /// Whether a scanned record is worth tracking: either expired and still
    /// inside its grace period, or expiring before the next rescan.
    pub fn is_in_capture_window(&self, expiration_ms: i64, now_ms: i64) -> bool {
        let in_grace = expiration_ms < now_ms && now_ms <= self.grace_end(expiration_ms);
        let expiring_soon = now_ms <= expiration_ms
            && expiration_ms < now_ms.saturating_add(self.rescan_interval_ms);
        in_grace || expiring_soon
    }

    /// Whether an expired record is close enough to grace end to re-verify.
    pub fn needs_verification(&self, expiration_ms: i64, now_ms: i64) -> bool {
        expiration_ms < now_ms
            && !self.is_stale(expiration_ms, now_ms)
            && self.grace_end(expiration_ms) - now_ms <= self.expiring_window_ms
    }

    /// Whether a looked-up expiration means the record was renewed.
    pub fn is_renewed(&self, expiration_ms: i64, now_ms: i64) -> bool {
        expiration_ms >= now_ms.saturating_add(self.rescan_interval_ms)
    }

    /// Whether a full scan is due given when the last one completed.
    pub fn scan_is_stale(&self, last_completed_ms: Option<i64>, now_ms: i64) -> bool {
        match last_completed_ms {
            Some(completed) => now_ms.saturating_sub(completed) > self.rescan_interval_ms,
            None => true,
        }
    }
}

impl Default for Windows {
    fn default() -> Self {
        Self::from_config(&TrackerConfig::default())
    }
}

/// Remaining whole days until `target_ms`, rounded up. Zero once passed.
pub fn days_until(target_ms: i64, now_ms: i64) -> i64 {
    let remaining = target_ms.saturating_sub(now_ms);
    if remaining <= 0 {
        return 0;
    }
    (remaining + DAY_MS - 1) / DAY_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;
    const HOUR_MS: i64 = 3_600_000;

    #[test]
    fn test_defaults() {
        let w = Windows::default();
        assert_eq!(w.grace_ms, 30 * DAY_MS);
        assert_eq!(w.rescan_interval_ms, 24 * HOUR_MS);
        assert_eq!(w.expiring_window_ms, 7 * DAY_MS);
    }

    #[test]
    fn test_capture_window_boundaries() {
        let w = Windows::default();
        assert!(w.is_in_capture_window(NOW - 29 * DAY_MS, NOW));
        assert!(!w.is_in_capture_window(NOW - 31 * DAY_MS, NOW));
        assert!(w.is_in_capture_window(NOW + 23 * HOUR_MS, NOW));
        assert!(!w.is_in_capture_window(NOW + 25 * HOUR_MS, NOW));
    }

    #[test]
    fn test_capture_window_edges() {
        let w = Windows::default();
        // Expiring right now
        assert!(w.is_in_capture_window(NOW, NOW));
        // Last instant of grace
        assert!(w.is_in_capture_window(NOW - 30 * DAY_MS, NOW));
        // Exactly one rescan interval ahead is excluded
        assert!(!w.is_in_capture_window(NOW + 24 * HOUR_MS, NOW));
    }

    #[test]
    fn test_stale_cutoff() {
        let w = Windows::default();
        assert!(w.is_stale(NOW - 30 * DAY_MS, NOW));
        assert!(!w.is_stale(NOW - 30 * DAY_MS + 1, NOW));
        assert!(!w.is_stale(NOW + DAY_MS, NOW));
    }

    #[test]
    fn test_needs_verification() {
        let w = Windows::default();
        // Grace ends in 2 days
        assert!(w.needs_verification(NOW - 28 * DAY_MS, NOW));
        // Grace ends in 20 days
        assert!(!w.needs_verification(NOW - 10 * DAY_MS, NOW));
        // Not yet expired
        assert!(!w.needs_verification(NOW + HOUR_MS, NOW));
        // Already past grace
        assert!(!w.needs_verification(NOW - 31 * DAY_MS, NOW));
    }

    #[test]
    fn test_is_renewed() {
        let w = Windows::default();
        assert!(w.is_renewed(NOW + 365 * DAY_MS, NOW));
        assert!(w.is_renewed(NOW + 24 * HOUR_MS, NOW));
        assert!(!w.is_renewed(NOW + HOUR_MS, NOW));
        assert!(!w.is_renewed(NOW - 28 * DAY_MS, NOW));
    }

    #[test]
    fn test_scan_is_stale() {
        let w = Windows::default();
        assert!(w.scan_is_stale(None, NOW));
        assert!(!w.scan_is_stale(Some(NOW - HOUR_MS), NOW));
        assert!(!w.scan_is_stale(Some(NOW - 24 * HOUR_MS), NOW));
        assert!(w.scan_is_stale(Some(NOW - 25 * HOUR_MS), NOW));
    }

    #[test]
    fn test_days_until() {
        assert_eq!(days_until(NOW + 2 * DAY_MS, NOW), 2);
        assert_eq!(days_until(NOW + DAY_MS + 1, NOW), 2);
        assert_eq!(days_until(NOW + 1, NOW), 1);
        assert_eq!(days_until(NOW, NOW), 0);
        assert_eq!(days_until(NOW - DAY_MS, NOW), 0);
    }
}
