//! The tracker engine.

use crate::config::Config;
use crate::health::{HealthCheck, COMPONENT_REMOTE, COMPONENT_SCANNER, COMPONENT_STORE};
use crate::metrics::{ErrorKind, TrackerMetrics, VerificationOutcome};
use crate::remote::{GraphqlTableClient, RemoteTable};
use crate::store::{now_ms, open_store, KeySpace, KvStore};
use crate::tracker::{
    decide, Decision, ExpiringView, FullScanner, IncrementalMaintainer, Lease, LeaseManager,
    MaintainSettings, MaintenanceOutcome, QueryHandler, ScanOutcome, ScanSettings,
    ShardManifest, SnapshotIndex, StateStore, TrackerState, Windows, DAY_MS,
};
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// What an invocation ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvocationOutcome {
    /// A full-scan batch
    Scan(ScanOutcome),
    /// A maintenance pass
    Maintenance(MaintenanceOutcome),
}

/// Result of one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationReport {
    /// Lease holder id of this invocation
    pub invocation_id: String,
    /// Branch taken
    pub decision: Decision,
    /// What the branch did
    pub outcome: InvocationOutcome,
    /// Invocation time (unix ms)
    pub started_at_ms: i64,
    /// Wall time spent
    pub duration_ms: u64,
}

/// Point-in-time view of persisted tracker state.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerStatus {
    /// Persisted state
    pub state: TrackerState,
    /// Progress estimate
    pub scan_progress_percent: u8,
    /// What the next invocation would do
    pub next_decision: Decision,
    /// Snapshot manifest, if a snapshot exists
    pub manifest: Option<ShardManifest>,
    /// Live lease, if any
    pub lease: Option<Lease>,
}

/// Expiring-record tracker.
pub struct Tracker {
    config: Config,
    windows: Windows,
    states: StateStore,
    snapshot: SnapshotIndex,
    scanner: FullScanner,
    maintainer: IncrementalMaintainer,
    queries: QueryHandler,
    leases: LeaseManager,
    metrics: Arc<TrackerMetrics>,
    health: Arc<HealthCheck>,
}

impl Tracker {
    /// Create a tracker over an explicit store and remote table.
    pub fn new(
        config: Config,
        store: Arc<dyn KvStore>,
        remote: Arc<dyn RemoteTable>,
    ) -> Result<Self> {
        config.validate()?;

        let keys = KeySpace::new(config.store.key_prefix.clone());
        let windows = Windows::from_config(&config.tracker);
        let states = StateStore::new(store.clone(), &keys);
        let snapshot = SnapshotIndex::new(store.clone(), keys.clone(), config.tracker.shard_count);
        let leases = LeaseManager::new(
            store,
            &keys,
            Duration::from_secs(config.tracker.lease_ttl_seconds),
        );

        let scanner = FullScanner::new(
            remote.clone(),
            snapshot.clone(),
            states.clone(),
            windows,
            ScanSettings {
                parent_id: config.remote.parent_id.clone(),
                page_size: config.remote.page_size,
                pages_per_invocation: config.tracker.pages_per_invocation,
            },
        );
        let maintainer = IncrementalMaintainer::new(
            remote,
            snapshot.clone(),
            states.clone(),
            windows,
            MaintainSettings {
                parent_id: config.remote.parent_id.clone(),
                root_label: config.remote.root_label.clone(),
                verify_batch_size: config.tracker.verify_batch_size,
                max_verifications_per_pass: config.tracker.max_verifications_per_pass,
            },
        );
        let queries = QueryHandler::new(
            snapshot.clone(),
            states.clone(),
            windows,
            i64::from(config.query.display_window_days) * DAY_MS,
        );

        let metrics = Arc::new(TrackerMetrics::new()?);
        let health = Arc::new(HealthCheck::new());

        Ok(Self {
            config,
            windows,
            states,
            snapshot,
            scanner,
            maintainer,
            queries,
            leases,
            metrics,
            health,
        })
    }

    /// Create a tracker with the configured store backend and GraphQL client.
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let store = open_store(&config.store)?;
        let remote: Arc<dyn RemoteTable> = Arc::new(GraphqlTableClient::new(&config.remote)?);
        info!(
            endpoint = %config.remote.endpoint,
            parent_id = %config.remote.parent_id,
            backend = ?config.store.backend,
            "Tracker initialized"
        );
        Self::new(config, store, remote)
    }

    /// Run one invocation now.
    pub async fn invoke(&self) -> Result<InvocationReport> {
        self.invoke_at(now_ms()).await
    }

    /// Run one invocation as if the time were `now_ms`.
    ///
    /// Fails with a lease error without touching tracker state when another
    /// invocation is running.
    pub async fn invoke_at(&self, now_ms: i64) -> Result<InvocationReport> {
        let invocation_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        self.health.invocation_started();

        let result = self.run_leased(&invocation_id, now_ms).await;
        let elapsed = started.elapsed();

        match result {
            Ok((decision, outcome)) => {
                self.metrics.record_invocation(decision.as_str(), elapsed);
                self.metrics.set_last_success(now_ms);
                self.health.mark_healthy(COMPONENT_STORE);
                self.health.invocation_finished(Some(now_ms));
                Ok(InvocationReport {
                    invocation_id,
                    decision,
                    outcome,
                    started_at_ms: now_ms,
                    duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                })
            }
            Err(e) => {
                let kind = ErrorKind::of(&e);
                self.metrics.record_error(kind);
                match kind {
                    ErrorKind::Lease => {
                        info!(invocation_id = %invocation_id, reason = %e, "Invocation skipped")
                    }
                    ErrorKind::Store => {
                        self.health.mark_unhealthy(COMPONENT_STORE, e.to_string());
                        error!(invocation_id = %invocation_id, error = %e, "Invocation failed");
                    }
                    _ => error!(invocation_id = %invocation_id, error = %e, "Invocation failed"),
                }
                self.health.invocation_finished(None);
                Err(e)
            }
        }
    }

    async fn run_leased(
        &self,
        invocation_id: &str,
        now_ms: i64,
    ) -> Result<(Decision, InvocationOutcome)> {
        let guard = self.leases.acquire(invocation_id, now_ms).await?;
        let result = self.run_decided(now_ms).await;

        match self.leases.release(guard).await {
            Ok(true) => {}
            Ok(false) => warn!(invocation_id, "Lease lapsed or was taken over before release"),
            Err(e) => warn!(invocation_id, error = %e, "Failed to release lease"),
        }
        result
    }

    async fn run_decided(&self, now_ms: i64) -> Result<(Decision, InvocationOutcome)> {
        let state = self.states.load().await?;
        let decision = decide(&state, now_ms, &self.windows);
        info!(
            decision = decision.as_str(),
            phase = state.phase.as_str(),
            last_scan_completed_at_ms = ?state.metadata.last_scan_completed_at_ms,
            "Invocation starting"
        );

        let outcome = if decision.is_scan() {
            let outcome = self.scanner.run(state, now_ms).await?;
            self.observe_scan(&outcome);
            InvocationOutcome::Scan(outcome)
        } else {
            let outcome = self.maintainer.run(state, now_ms).await?;
            self.observe_maintenance(&outcome);
            InvocationOutcome::Maintenance(outcome)
        };
        Ok((decision, outcome))
    }

    fn observe_scan(&self, outcome: &ScanOutcome) {
        self.metrics
            .record_pages(outcome.pages_fetched, outcome.nodes_observed);
        self.metrics.record_captured(outcome.records_captured);
        self.metrics.set_snapshot_records(outcome.snapshot_records);
        self.metrics.set_scan_progress(outcome.progress_percent);
        if outcome.completed {
            self.metrics.record_scan_completed();
        }

        match &outcome.fetch_error {
            Some(reason) => {
                self.metrics.record_error(ErrorKind::Remote);
                self.health.mark_degraded(COMPONENT_REMOTE, reason.clone());
                self.health
                    .mark_degraded(COMPONENT_SCANNER, "scan batch stopped early");
            }
            None => {
                self.health.mark_healthy(COMPONENT_REMOTE);
                self.health.mark_healthy(COMPONENT_SCANNER);
            }
        }
    }

    fn observe_maintenance(&self, outcome: &MaintenanceOutcome) {
        self.metrics.record_pruned(outcome.pruned);
        self.metrics
            .record_verifications(VerificationOutcome::Renewed, outcome.renewed);
        self.metrics
            .record_verifications(VerificationOutcome::Refreshed, outcome.refreshed);
        self.metrics
            .record_verifications(VerificationOutcome::Unchanged, outcome.unchanged);
        self.metrics
            .record_verifications(VerificationOutcome::Failed, outcome.failed);
        self.metrics.set_snapshot_records(outcome.snapshot_records);
        self.metrics.set_scan_progress(100);

        let verified = outcome.candidates - outcome.deferred;
        if outcome.failed > 0 {
            self.health.mark_degraded(
                COMPONENT_REMOTE,
                format!("{} of {} lookups failed", outcome.failed, verified),
            );
        } else if verified > 0 {
            self.health.mark_healthy(COMPONENT_REMOTE);
        }
        self.health.mark_healthy(COMPONENT_SCANNER);
    }

    /// Records whose grace period ends within the display window.
    pub async fn query(&self) -> ExpiringView {
        self.query_at(now_ms()).await
    }

    /// [`Tracker::query`] as of `now_ms`.
    pub async fn query_at(&self, now_ms: i64) -> ExpiringView {
        self.queries.query(now_ms).await
    }

    /// Persisted state, manifest and lease.
    pub async fn status(&self) -> Result<TrackerStatus> {
        self.status_at(now_ms()).await
    }

    /// [`Tracker::status`] as of `now_ms`.
    pub async fn status_at(&self, now_ms: i64) -> Result<TrackerStatus> {
        let state = self.states.load().await?;
        let manifest = self.snapshot.load_manifest().await?;
        let lease = self
            .leases
            .current()
            .await?
            .filter(|lease| lease.expires_at_ms > now_ms);
        Ok(TrackerStatus {
            scan_progress_percent: state.scan_progress_percent(),
            next_decision: decide(&state, now_ms, &self.windows),
            state,
            manifest,
            lease,
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Metrics handle.
    pub fn metrics(&self) -> Arc<TrackerMetrics> {
        self.metrics.clone()
    }

    /// Health handle.
    pub fn health(&self) -> Arc<HealthCheck> {
        self.health.clone()
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("parent_id", &self.config.remote.parent_id)
            .field("windows", &self.windows)
            .finish_non_exhaustive()
    }
}
