//! Invocation orchestration.
//!
//! [`Tracker`] wires the store, remote table, scanner, maintainer and query
//! handler together. One call to [`Tracker::invoke`] is one scheduled tick:
//! take the lease, pick scan or maintenance from persisted state, run it,
//! release the lease.

mod invocation;

pub use invocation::{InvocationOutcome, InvocationReport, Tracker, TrackerStatus};
