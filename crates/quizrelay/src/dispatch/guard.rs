//! Duplicate-request suppression.
//!
//! A client may have at most one request per family in flight. The guard
//! takes a short-lived lock in the shared key-value store with a single
//! atomic set-if-absent round trip; the lock expires on its own after the
//! family's TTL, so a crashed caller can never wedge a client.

use crate::{config::RelayConfig, store::KeyValueStore, store::keys::lock_key};
use core::time::Duration;
use quizrelay_core::{ClientIdentity, Family, Result};
use std::sync::Arc;

const LOCK_VALUE: &str = "locked";

/// Per-identity, per-family request lock backed by a [`KeyValueStore`].
pub struct DuplicateGuard<S> {
    store: Arc<S>,
    ttls: [Duration; 2],
}

impl<S: KeyValueStore> DuplicateGuard<S> {
    pub fn new(store: Arc<S>, config: &RelayConfig) -> Self {
        Self {
            store,
            ttls: [config.question.lock_ttl, config.explanation.lock_ttl],
        }
    }

    pub const fn ttl(&self, family: Family) -> Duration {
        self.ttls[family.index()]
    }

    /// Tries to take the lock. `Ok(false)` means a previous request from the
    /// same client is still within its TTL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`](quizrelay_core::Error::StoreUnavailable)
    /// if the store round trip fails.
    pub async fn acquire(&self, identity: &ClientIdentity, family: Family) -> Result<bool> {
        let acquired = self
            .store
            .set_if_absent(&lock_key(identity, family), LOCK_VALUE, self.ttl(family))
            .await?;

        #[cfg(feature = "tracing")]
        if !acquired {
            tracing::debug!(%identity, %family, "request lock already held");
        }

        Ok(acquired)
    }

    /// Drops the lock before its TTL. Returns whether a live lock existed.
    pub async fn release(&self, identity: &ClientIdentity, family: Family) -> Result<bool> {
        self.store.delete(&lock_key(identity, family)).await
    }

    /// Drops the locks of every family.
    pub async fn clear(&self, identity: &ClientIdentity) -> Result<()> {
        for family in Family::ALL {
            self.release(identity, family).await?;
        }
        Ok(())
    }
}
