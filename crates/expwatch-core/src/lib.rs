//! expwatch core - expiring-record tracker for large remote tables
//!
//! This library keeps a small persistent snapshot of the records in a remote
//! dynamic-field table whose expiration has passed but whose grace period has
//! not, using short scheduled invocations:
//!
//! - Resumable, page-budgeted full scans that survive interruption
//! - Incremental maintenance that prunes and re-verifies between scans
//! - A sharded snapshot where only changed shards are rewritten
//! - A lease so at most one invocation mutates state at a time

pub mod circuit_breaker;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod metrics;
pub mod remote;
pub mod store;
pub mod tracker;

// Re-export commonly used types
pub use config::Config;
pub use engine::{InvocationOutcome, InvocationReport, Tracker, TrackerStatus};
pub use error::{Error, Result};
pub use error::{LeaseError, RemoteError, StoreError};
pub use tracker::{Decision, ExpiringEntry, ExpiringView};
