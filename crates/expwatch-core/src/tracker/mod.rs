//! Expiring-record tracking.
//!
//! Every invocation either advances a bounded full scan of the remote table
//! or runs an incremental maintenance pass over the stored snapshot:
//!
//! - [`coordinator`]: picks one of the two from persisted state
//! - [`scanner`]: resumable page-budgeted full scan
//! - [`maintainer`]: pruning and re-verification between scans
//! - [`snapshot`]: sharded persistent snapshot
//! - [`query`]: read-only view for display

pub mod coordinator;
pub mod lease;
pub mod maintainer;
pub mod merge;
pub mod query;
pub mod record;
pub mod scanner;
pub mod snapshot;
pub mod state;
pub mod window;

pub use coordinator::{decide, Decision};
pub use lease::{Lease, LeaseGuard, LeaseManager};
pub use maintainer::{IncrementalMaintainer, MaintainSettings, MaintenanceOutcome};
pub use merge::merge;
pub use query::{ExpiringEntry, ExpiringView, QueryHandler};
pub use record::{extract, key_labels, TrackedRecord};
pub use scanner::{FullScanner, ScanOutcome, ScanSettings};
pub use snapshot::{ShardManifest, Snapshot, SnapshotIndex, WriteSummary};
pub use state::{ScanMetadata, ScanPhase, StateStore, TrackerState};
pub use window::{Windows, DAY_MS};
