//! Circuit breaker guarding the remote table endpoint.
//!
//! After `failure_threshold` consecutive transport failures the breaker opens
//! and calls fail fast with [`RemoteError::CircuitOpen`]. Once
//! `reset_timeout` has passed, probe calls are let through (half-open) and
//! `success_threshold` successes close it again.

use crate::config::CircuitBreakerSettings;
use crate::error::{Error, RemoteError, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls proceed normally
    Closed,
    /// Calls are rejected without being attempted
    Open,
    /// Probe calls are allowed to test recovery
    HalfOpen,
}

impl CircuitState {
    /// Lowercase name for logs and health output.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    probe_successes: u32,
    opened_at: Option<Instant>,
}

/// Breaker for one remote endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    success_threshold: u32,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a breaker from configured thresholds.
    pub fn new(name: impl Into<String>, settings: &CircuitBreakerSettings) -> Self {
        let name = name.into();
        debug!(
            name = %name,
            failure_threshold = settings.failure_threshold,
            reset_timeout_seconds = settings.reset_timeout_seconds,
            "Circuit breaker created"
        );
        Self {
            name,
            failure_threshold: settings.failure_threshold.max(1),
            reset_timeout: Duration::from_secs(settings.reset_timeout_seconds),
            success_threshold: settings.success_threshold.max(1),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                probe_successes: 0,
                opened_at: None,
            }),
        }
    }

    /// Override the reset timeout.
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Whether a call may be attempted now. Moves an open breaker to
    /// half-open once the reset timeout has passed.
    pub fn is_allowed(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.reset_timeout);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_successes = 0;
                    info!(name = %self.name, "Circuit breaker half-open, probing endpoint");
                }
                elapsed
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.probe_successes += 1;
            if inner.probe_successes >= self.success_threshold {
                inner.state = CircuitState::Closed;
                inner.opened_at = None;
                info!(name = %self.name, "Circuit breaker closed, endpoint recovered");
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;

        let should_open = match inner.state {
            CircuitState::Closed => inner.consecutive_failures >= self.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if should_open {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            warn!(
                name = %self.name,
                failures = inner.consecutive_failures,
                "Circuit breaker opened"
            );
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Consecutive failures since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `call` under the breaker.
    ///
    /// Only transport failures and server-side HTTP errors count against the
    /// endpoint; malformed payloads and client errors do not.
    pub async fn call<F, Fut, T>(&self, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.is_allowed() {
            return Err(RemoteError::CircuitOpen(self.name.clone()).into());
        }

        let result = call().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(err) if trips_breaker(err) => self.record_failure(),
            Err(_) => {}
        }
        result
    }
}

fn trips_breaker(err: &Error) -> bool {
    match err {
        Error::Remote(RemoteError::RequestFailed { .. }) => true,
        Error::Remote(RemoteError::HttpStatus { status, .. }) => *status >= 500 || *status == 429,
        _ => false,
    }
}
