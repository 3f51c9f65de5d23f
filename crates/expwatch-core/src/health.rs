//! Component health tracking for the tracker.
//!
//! Components are the persistent store, the remote table endpoint and the
//! scanner (last invocation outcome). The server exposes the aggregate on
//! `/health` and `/readyz`.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;

/// Persistent store component name.
pub const COMPONENT_STORE: &str = "store";
/// Remote table component name.
pub const COMPONENT_REMOTE: &str = "remote";
/// Scanner component name.
pub const COMPONENT_SCANNER: &str = "scanner";

/// Health status of a component.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ComponentStatus {
    /// Working
    Healthy,
    /// Working with reduced guarantees
    Degraded(String),
    /// Not working
    Unhealthy(String),
    /// Not exercised yet
    Unknown,
}

/// Aggregate status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// All components healthy or unknown
    Healthy,
    /// At least one component degraded
    Degraded,
    /// At least one component unhealthy
    Unhealthy,
}

/// Point-in-time health report.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Aggregate status
    pub status: HealthStatus,
    /// Per-component status
    pub components: BTreeMap<String, ComponentStatus>,
    /// Whether an invocation is currently running in this process
    pub invocation_running: bool,
    /// Completion time of the last successful invocation (unix ms)
    pub last_success_at_ms: Option<i64>,
}

#[derive(Debug, Default)]
struct InvocationTrack {
    running: bool,
    last_success_at_ms: Option<i64>,
}

/// Health tracker shared between the engine and the server.
#[derive(Debug, Default)]
pub struct HealthCheck {
    components: RwLock<BTreeMap<String, ComponentStatus>>,
    invocation: RwLock<InvocationTrack>,
}

impl HealthCheck {
    /// Create a tracker with the store, remote and scanner components
    /// registered as unknown.
    pub fn new() -> Self {
        let health = Self::default();
        for name in [COMPONENT_STORE, COMPONENT_REMOTE, COMPONENT_SCANNER] {
            health.set(name, ComponentStatus::Unknown);
        }
        health
    }

    fn set(&self, name: &str, status: ComponentStatus) {
        self.components.write().insert(name.to_string(), status);
    }

    /// Mark a component healthy.
    pub fn mark_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy);
    }

    /// Mark a component degraded.
    pub fn mark_degraded(&self, name: &str, reason: impl Into<String>) {
        self.set(name, ComponentStatus::Degraded(reason.into()));
    }

    /// Mark a component unhealthy.
    pub fn mark_unhealthy(&self, name: &str, reason: impl Into<String>) {
        self.set(name, ComponentStatus::Unhealthy(reason.into()));
    }

    /// Status of one component.
    pub fn component_status(&self, name: &str) -> Option<ComponentStatus> {
        self.components.read().get(name).cloned()
    }

    /// Aggregate status.
    pub fn overall_status(&self) -> HealthStatus {
        let components = self.components.read();
        if components
            .values()
            .any(|s| matches!(s, ComponentStatus::Unhealthy(_)))
        {
            HealthStatus::Unhealthy
        } else if components
            .values()
            .any(|s| matches!(s, ComponentStatus::Degraded(_)))
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Healthy or degraded.
    pub fn is_operational(&self) -> bool {
        self.overall_status() != HealthStatus::Unhealthy
    }

    /// Record the start of an invocation.
    pub fn invocation_started(&self) {
        self.invocation.write().running = true;
    }

    /// Record the end of an invocation.
    pub fn invocation_finished(&self, success_at_ms: Option<i64>) {
        let mut track = self.invocation.write();
        track.running = false;
        if success_at_ms.is_some() {
            track.last_success_at_ms = success_at_ms;
        }
    }

    /// Whether an invocation is running.
    pub fn is_invocation_running(&self) -> bool {
        self.invocation.read().running
    }

    /// Build a report.
    pub fn report(&self) -> HealthReport {
        let invocation = self.invocation.read();
        HealthReport {
            status: self.overall_status(),
            components: self.components.read().clone(),
            invocation_running: invocation.running,
            last_success_at_ms: invocation.last_success_at_ms,
        }
    }
}
