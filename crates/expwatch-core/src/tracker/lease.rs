//! Invocation lease.
//!
//! Overlapping invocations are excluded by a lease record written with
//! compare-and-swap and a store TTL. A lease whose `expires_at_ms` has
//! passed may be taken over even if the store has not evicted it yet.

use crate::error::LeaseError;
use crate::store::{KeySpace, KvStore, PutOptions};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lease record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Holder identity
    pub holder: String,
    /// When the lease was taken (unix ms)
    pub acquired_at_ms: i64,
    /// When the lease lapses (unix ms)
    pub expires_at_ms: i64,
}

/// Acquires and releases the invocation lease.
#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn KvStore>,
    key: String,
    ttl: Duration,
}

/// A held lease. Release it with [`LeaseGuard::release`]; if dropped, it
/// lapses after its TTL.
#[derive(Debug)]
pub struct LeaseGuard {
    lease: Lease,
    token: Vec<u8>,
}

impl LeaseGuard {
    /// The lease record.
    pub fn lease(&self) -> &Lease {
        &self.lease
    }
}

impl LeaseManager {
    /// Create a manager for the lease key in `keys`.
    pub fn new(store: Arc<dyn KvStore>, keys: &KeySpace, ttl: Duration) -> Self {
        Self {
            store,
            key: keys.lease(),
            ttl,
        }
    }

    /// Take the lease for `holder`.
    ///
    /// Fails with [`LeaseError::Held`] while another holder's lease is live
    /// and with [`LeaseError::Contended`] if a concurrent writer wins the
    /// compare-and-swap.
    pub async fn acquire(&self, holder: &str, now_ms: i64) -> Result<LeaseGuard> {
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        let lease = Lease {
            holder: holder.to_string(),
            acquired_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(ttl_ms),
        };
        let token = serde_json::to_vec(&lease)?;

        let current = self.store.get(&self.key).await?;
        if let Some(bytes) = &current {
            match serde_json::from_slice::<Lease>(bytes) {
                Ok(existing) if existing.expires_at_ms > now_ms && existing.holder != holder => {
                    return Err(LeaseError::Held {
                        holder: existing.holder,
                        expires_at_ms: existing.expires_at_ms,
                    }
                    .into());
                }
                Ok(existing) => {
                    info!(
                        previous_holder = %existing.holder,
                        expired_at_ms = existing.expires_at_ms,
                        "Taking over expired lease"
                    );
                }
                Err(e) => warn!(error = %e, "Replacing unreadable lease record"),
            }
        }

        let swapped = self
            .store
            .compare_and_swap(
                &self.key,
                current.as_deref(),
                token.clone(),
                PutOptions::with_ttl(self.ttl),
            )
            .await?;
        if !swapped {
            return Err(LeaseError::Contended.into());
        }

        debug!(holder = %holder, expires_at_ms = lease.expires_at_ms, "Lease acquired");
        Ok(LeaseGuard { lease, token })
    }

    /// Release a held lease. Returns false if it had already been taken
    /// over or had lapsed.
    pub async fn release(&self, guard: LeaseGuard) -> Result<bool> {
        let released = self
            .store
            .compare_and_delete(&self.key, &guard.token)
            .await?;
        if released {
            debug!(holder = %guard.lease.holder, "Lease released");
        } else {
            warn!(holder = %guard.lease.holder, "Lease was lost before release");
        }
        Ok(released)
    }

    /// Current lease, if any.
    pub async fn current(&self) -> Result<Option<Lease>> {
        match self.store.get(&self.key).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
            None => Ok(None),
        }
    }
}
