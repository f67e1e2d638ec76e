//! Session lifecycle: tracking client activity and tearing down everything
//! the relay holds for a client once its session ends.
//!
//! Teardown touches several independent stores (correlator state, request
//! locks, channel assignments). There is no cross-store atomicity: each part
//! is removed in turn and a repeated teardown is harmless.

use crate::{
    correlation::ResponseCorrelator,
    dispatch::DuplicateGuard,
    store::{KeyValueStore, keys::channel_key},
    telemetry,
};
use core::time::Duration;
use dashmap::DashMap;
use quizrelay_core::{ClientIdentity, Family, Result, SequenceMarker};
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
struct SessionRecord {
    last_seen: Instant,
    markers: [Option<SequenceMarker>; 2],
}

impl SessionRecord {
    fn new(now: Instant) -> Self {
        Self {
            last_seen: now,
            markers: [None; 2],
        }
    }
}

/// Per-family correlators, indexed by [`Family::index`].
pub type Correlators = [Arc<ResponseCorrelator>; 2];

/// Owns client activity records and performs session teardown.
pub struct SessionManager<S> {
    sessions: DashMap<ClientIdentity, SessionRecord>,
    correlators: Correlators,
    guard: Arc<DuplicateGuard<S>>,
    store: Arc<S>,
    idle_ttl: Duration,
}

impl<S: KeyValueStore> SessionManager<S> {
    pub fn new(
        correlators: Correlators,
        guard: Arc<DuplicateGuard<S>>,
        store: Arc<S>,
        idle_ttl: Duration,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            correlators,
            guard,
            store,
            idle_ttl,
        }
    }

    /// Records activity for `identity`, creating its session if needed.
    pub fn touch(&self, identity: &ClientIdentity) {
        let now = Instant::now();
        self.sessions
            .entry(identity.clone())
            .and_modify(|record| record.last_seen = now)
            .or_insert_with(|| SessionRecord::new(now));
    }

    /// Remembers the position of the latest `family` request of `identity`.
    pub fn remember_marker(&self, identity: &ClientIdentity, family: Family, marker: SequenceMarker) {
        let now = Instant::now();
        let mut record = self
            .sessions
            .entry(identity.clone())
            .or_insert_with(|| SessionRecord::new(now));
        record.last_seen = now;
        record.markers[family.index()] = Some(marker);
    }

    pub fn marker(&self, identity: &ClientIdentity, family: Family) -> Option<SequenceMarker> {
        self.sessions
            .get(identity)
            .and_then(|record| record.markers[family.index()])
    }

    pub fn contains(&self, identity: &ClientIdentity) -> bool {
        self.sessions.contains_key(identity)
    }

    /// Number of tracked sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Removes every piece of state held for `identity`.
    ///
    /// Local state is dropped first, so even when the store round trips fail
    /// the client starts fresh on its next request. Returns whether the relay
    /// knew the identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`](quizrelay_core::Error::StoreUnavailable)
    /// if the locks or channel assignments could not be deleted.
    pub async fn destroy(&self, identity: &ClientIdentity) -> Result<bool> {
        let mut known = self.sessions.remove(identity).is_some();
        for correlator in &self.correlators {
            known |= correlator.destroy(identity);
        }

        self.guard.clear(identity).await?;
        for family in Family::ALL {
            self.store.delete(&channel_key(identity, family)).await?;
        }

        if known {
            telemetry::increment_sessions_destroyed();
            #[cfg(feature = "tracing")]
            tracing::debug!(%identity, "session destroyed");
        }
        Ok(known)
    }

    /// Destroys every session idle for longer than the idle TTL and returns
    /// how many were removed.
    ///
    /// Identities that only exist in a correlator (responses for a client
    /// this relay never saw) are adopted with a fresh activity stamp, so they
    /// age out like any other session.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        for correlator in &self.correlators {
            for identity in correlator.identities() {
                self.sessions
                    .entry(identity)
                    .or_insert_with(|| SessionRecord::new(now));
            }
        }

        let idle: Vec<ClientIdentity> = self
            .sessions
            .iter()
            .filter(|entry| now.saturating_duration_since(entry.last_seen) > self.idle_ttl)
            .map(|entry| entry.key().clone())
            .collect();

        let mut destroyed = 0;
        for identity in idle {
            match self.destroy(&identity).await {
                Ok(_) => destroyed += 1,
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%identity, "failed to destroy idle session: {_e}");
                }
            }
        }

        #[cfg(feature = "tracing")]
        if destroyed > 0 {
            tracing::info!(destroyed, "swept idle sessions");
        }

        destroyed
    }
}

/// Runs [`SessionManager::sweep`] every `interval` until `shutdown` is
/// cancelled.
pub async fn sweep_periodically<S: KeyValueStore>(
    sessions: Arc<SessionManager<S>>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                sessions.sweep().await;
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("session sweeper stopped");
}
