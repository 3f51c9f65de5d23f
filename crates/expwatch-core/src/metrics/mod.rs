//! Prometheus metrics for scans, maintenance and invocations.

use crate::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

const NAMESPACE: &str = "expwatch";

/// Invocation duration buckets in seconds.
const INVOCATION_DURATION_BUCKETS: [f64; 9] = [0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Error categories for the labeled error counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Persistent store read or write
    Store,
    /// Remote page fetch or lookup
    Remote,
    /// Invocation lease refused or lost
    Lease,
    /// Anything else
    Other,
}

impl ErrorKind {
    /// Label value.
    pub fn as_label(&self) -> &'static str {
        match self {
            ErrorKind::Store => "store",
            ErrorKind::Remote => "remote",
            ErrorKind::Lease => "lease",
            ErrorKind::Other => "other",
        }
    }

    /// Categorize a crate error.
    pub fn of(err: &crate::Error) -> Self {
        match err {
            crate::Error::Store(_) | crate::Error::Io(_) => ErrorKind::Store,
            crate::Error::Remote(_) => ErrorKind::Remote,
            crate::Error::Lease(_) => ErrorKind::Lease,
            _ => ErrorKind::Other,
        }
    }
}

/// Outcome of a single verification lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// Renewed remotely, dropped from the snapshot
    Renewed,
    /// Still expired, expiration updated
    Refreshed,
    /// Still expired, expiration unchanged
    Unchanged,
    /// Lookup failed or returned nothing usable
    Failed,
}

impl VerificationOutcome {
    fn as_label(&self) -> &'static str {
        match self {
            VerificationOutcome::Renewed => "renewed",
            VerificationOutcome::Refreshed => "refreshed",
            VerificationOutcome::Unchanged => "unchanged",
            VerificationOutcome::Failed => "failed",
        }
    }
}

/// Tracker metrics backed by a private registry.
pub struct TrackerMetrics {
    registry: Registry,

    pages_fetched: IntCounter,
    fields_observed: IntCounter,
    records_captured: IntCounter,
    records_pruned: IntCounter,
    scans_completed: IntCounter,
    verifications: IntCounterVec,
    invocations: IntCounterVec,
    errors: IntCounterVec,

    snapshot_records: IntGauge,
    scan_progress_percent: IntGauge,
    last_success_timestamp: IntGauge,

    invocation_duration: Histogram,
}

impl TrackerMetrics {
    /// Create and register all metrics.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<IntCounter> {
            let c = IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };
        let counter_vec = |name: &str, help: &str, label: &str| -> Result<IntCounterVec> {
            let c = IntCounterVec::new(Opts::new(name, help).namespace(NAMESPACE), &[label])?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };
        let gauge = |name: &str, help: &str| -> Result<IntGauge> {
            let g = IntGauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
            registry.register(Box::new(g.clone()))?;
            Ok(g)
        };

        let pages_fetched = counter("pages_fetched_total", "Remote table pages fetched")?;
        let fields_observed = counter("fields_observed_total", "Dynamic fields seen by scans")?;
        let records_captured = counter(
            "records_captured_total",
            "Scanned records inside the capture window",
        )?;
        let records_pruned = counter(
            "records_pruned_total",
            "Records dropped after their grace period",
        )?;
        let scans_completed = counter("scans_completed_total", "Full scans run to completion")?;
        let verifications = counter_vec(
            "verifications_total",
            "Point lookups by outcome",
            "outcome",
        )?;
        let invocations = counter_vec("invocations_total", "Invocations by decision", "decision")?;
        let errors = counter_vec("errors_total", "Invocation errors by kind", "kind")?;

        let snapshot_records = gauge("snapshot_records", "Records currently tracked")?;
        let scan_progress_percent = gauge(
            "scan_progress_percent",
            "Estimated progress of the current full scan",
        )?;
        let last_success_timestamp = gauge(
            "last_success_timestamp_ms",
            "Completion time of the last successful invocation",
        )?;

        let invocation_duration = Histogram::with_opts(
            HistogramOpts::new("invocation_duration_seconds", "Invocation wall time")
                .namespace(NAMESPACE)
                .buckets(INVOCATION_DURATION_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(invocation_duration.clone()))?;

        Ok(Self {
            registry,
            pages_fetched,
            fields_observed,
            records_captured,
            records_pruned,
            scans_completed,
            verifications,
            invocations,
            errors,
            snapshot_records,
            scan_progress_percent,
            last_success_timestamp,
            invocation_duration,
        })
    }

    /// Record fetched pages and the nodes they carried.
    pub fn record_pages(&self, pages: usize, nodes: u64) {
        self.pages_fetched.inc_by(pages as u64);
        self.fields_observed.inc_by(nodes);
    }

    /// Record records captured by a scan batch.
    pub fn record_captured(&self, count: usize) {
        self.records_captured.inc_by(count as u64);
    }

    /// Record records pruned by maintenance.
    pub fn record_pruned(&self, count: usize) {
        self.records_pruned.inc_by(count as u64);
    }

    /// Record a completed full scan.
    pub fn record_scan_completed(&self) {
        self.scans_completed.inc();
    }

    /// Record verification lookups.
    pub fn record_verifications(&self, outcome: VerificationOutcome, count: usize) {
        self.verifications
            .with_label_values(&[outcome.as_label()])
            .inc_by(count as u64);
    }

    /// Record an invocation and how long it took.
    pub fn record_invocation(&self, decision: &str, duration: Duration) {
        self.invocations.with_label_values(&[decision]).inc();
        self.invocation_duration.observe(duration.as_secs_f64());
    }

    /// Record an invocation error.
    pub fn record_error(&self, kind: ErrorKind) {
        self.errors.with_label_values(&[kind.as_label()]).inc();
    }

    /// Set the tracked record count.
    pub fn set_snapshot_records(&self, count: usize) {
        self.snapshot_records.set(count as i64);
    }

    /// Set the scan progress estimate.
    pub fn set_scan_progress(&self, percent: u8) {
        self.scan_progress_percent.set(i64::from(percent));
    }

    /// Set the last successful invocation time.
    pub fn set_last_success(&self, at_ms: i64) {
        self.last_success_timestamp.set(at_ms);
    }

    /// Pages fetched so far.
    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched.get()
    }

    /// Fields observed so far.
    pub fn fields_observed(&self) -> u64 {
        self.fields_observed.get()
    }

    /// Records captured so far.
    pub fn records_captured(&self) -> u64 {
        self.records_captured.get()
    }

    /// Records pruned so far.
    pub fn records_pruned(&self) -> u64 {
        self.records_pruned.get()
    }

    /// Completed scans so far.
    pub fn scans_completed(&self) -> u64 {
        self.scans_completed.get()
    }

    /// Verifications with the given outcome.
    pub fn verifications(&self, outcome: VerificationOutcome) -> u64 {
        self.verifications
            .with_label_values(&[outcome.as_label()])
            .get()
    }

    /// Invocations with the given decision label.
    pub fn invocations(&self, decision: &str) -> u64 {
        self.invocations.with_label_values(&[decision]).get()
    }

    /// Errors of the given kind.
    pub fn errors(&self, kind: ErrorKind) -> u64 {
        self.errors.with_label_values(&[kind.as_label()]).get()
    }

    /// Tracked record count.
    pub fn snapshot_records(&self) -> i64 {
        self.snapshot_records.get()
    }

    /// Encode every metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| crate::Error::Metrics(e.to_string()))
    }
}

impl std::fmt::Debug for TrackerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerMetrics")
            .field("pages_fetched", &self.pages_fetched())
            .field("snapshot_records", &self.snapshot_records())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LeaseError, StoreError};

    #[test]
    fn test_counters() {
        let metrics = TrackerMetrics::new().unwrap();

        metrics.record_pages(1, 50);
        metrics.record_pages(1, 20);
        assert_eq!(metrics.pages_fetched(), 2);
        assert_eq!(metrics.fields_observed(), 70);

        metrics.record_captured(3);
        metrics.record_pruned(2);
        metrics.record_scan_completed();
        assert_eq!(metrics.records_captured(), 3);
        assert_eq!(metrics.records_pruned(), 2);
        assert_eq!(metrics.scans_completed(), 1);

        metrics.record_verifications(VerificationOutcome::Renewed, 4);
        metrics.record_verifications(VerificationOutcome::Failed, 1);
        assert_eq!(metrics.verifications(VerificationOutcome::Renewed), 4);
        assert_eq!(metrics.verifications(VerificationOutcome::Failed), 1);
        assert_eq!(metrics.verifications(VerificationOutcome::Unchanged), 0);
    }

    #[test]
    fn test_gauges() {
        let metrics = TrackerMetrics::new().unwrap();
        metrics.set_snapshot_records(120);
        assert_eq!(metrics.snapshot_records(), 120);
        metrics.set_snapshot_records(80);
        assert_eq!(metrics.snapshot_records(), 80);
    }

    #[test]
    fn test_error_kind_mapping() {
        let store: crate::Error = StoreError::Truncated("k".into()).into();
        assert_eq!(ErrorKind::of(&store), ErrorKind::Store);

        let lease: crate::Error = LeaseError::Contended.into();
        assert_eq!(ErrorKind::of(&lease), ErrorKind::Lease);

        let other = crate::Error::Config("x".into());
        assert_eq!(ErrorKind::of(&other), ErrorKind::Other);

        let metrics = TrackerMetrics::new().unwrap();
        metrics.record_error(ErrorKind::of(&store));
        assert_eq!(metrics.errors(ErrorKind::Store), 1);
    }

    #[test]
    fn test_encode_text_format() {
        let metrics = TrackerMetrics::new().unwrap();
        metrics.record_pages(1, 10);
        metrics.record_invocation("maintain", Duration::from_millis(150));
        metrics.set_scan_progress(42);

        let output = metrics.encode().unwrap();
        assert!(output.contains("# TYPE expwatch_pages_fetched_total counter"));
        assert!(output.contains("expwatch_pages_fetched_total 1"));
        assert!(output.contains("expwatch_fields_observed_total 10"));
        assert!(output.contains("expwatch_invocations_total{decision=\"maintain\"} 1"));
        assert!(output.contains("expwatch_scan_progress_percent 42"));
        assert!(output.contains("# TYPE expwatch_invocation_duration_seconds histogram"));
        assert!(output.contains("expwatch_invocation_duration_seconds_count 1"));
    }

    #[test]
    fn test_independent_registries() {
        // Each instance owns its registry, so two trackers never collide
        let a = TrackerMetrics::new().unwrap();
        let b = TrackerMetrics::new().unwrap();
        a.record_pages(1, 1);
        assert_eq!(b.pages_fetched(), 0);
    }
}
