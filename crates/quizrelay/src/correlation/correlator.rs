//! Response correlation for one work family.
//!
//! Workers answer on a single shared response channel, keyed by client
//! identity. For each identity the correlator keeps a *pending count* (requests
//! dispatched but not yet delivered) and a *bucket* of responses in arrival
//! order. A fetch succeeds only when the bucket holds exactly as many
//! responses as there are pending requests; it then returns the most recent
//! response and discards the rest. A client that fires several requests in a
//! row therefore only ever sees the answer to its last one.
//!
//! ```text
//!   NoRequest --dispatch--> AwaitingResponse --last response--> Ready
//!       ^                        |   ^                            |
//!       |                        +---+ dispatch / response        |
//!       +---------------------------fetch-------------------------+
//! ```
//!
//! Per-identity state sits behind its own mutex inside a sharded map. Shard
//! guards are released before an identity's mutex is taken, and no lock is
//! ever held across an await point.

use crate::{backbone::Record, telemetry};
use core::time::Duration;
use dashmap::DashMap;
use parking_lot::Mutex;
use quizrelay_core::{ClientIdentity, Family};
use std::{collections::VecDeque, sync::Arc};
use tokio::{sync::Notify, time::Instant};
use tokio_util::sync::CancellationToken;

/// Observable correlation state of one identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CorrelationState {
    /// Nothing outstanding.
    NoRequest,
    /// Requests are in flight and fewer responses than requests have arrived.
    AwaitingResponse { pending: u64, received: u64 },
    /// A fetch would return a response now.
    Ready { pending: u64 },
}

#[derive(Default)]
struct SlotState {
    pending: u64,
    bucket: VecDeque<Record>,
}

impl SlotState {
    fn received(&self) -> u64 {
        self.bucket.len() as u64
    }

    fn state(&self) -> CorrelationState {
        match self.pending {
            0 => CorrelationState::NoRequest,
            pending if self.received() == pending => CorrelationState::Ready { pending },
            pending => CorrelationState::AwaitingResponse {
                pending,
                received: self.received(),
            },
        }
    }

    /// Drops the oldest responses beyond the pending count. With nothing
    /// pending only the latest orphan is kept. Returns how many were dropped.
    fn trim_surplus(&mut self) -> u64 {
        let keep = self.pending.max(1);
        let mut dropped = 0;
        while self.received() > keep {
            self.bucket.pop_front();
            dropped += 1;
        }
        dropped
    }

    fn take_ready(&mut self) -> Option<Record> {
        if self.pending == 0 || self.received() != self.pending {
            return None;
        }
        let latest = self.bucket.pop_back();
        self.bucket.clear();
        self.pending = 0;
        latest
    }
}

struct Slot {
    state: Mutex<SlotState>,
    notify: Notify,
    closed: CancellationToken,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::default()),
            notify: Notify::new(),
            closed: CancellationToken::new(),
        }
    }
}

/// Matches responses of one [`Family`] to the clients that requested them.
pub struct ResponseCorrelator {
    family: Family,
    slots: DashMap<ClientIdentity, Arc<Slot>>,
}

impl ResponseCorrelator {
    pub fn new(family: Family) -> Self {
        Self {
            family,
            slots: DashMap::new(),
        }
    }

    pub const fn family(&self) -> Family {
        self.family
    }

    fn existing(&self, identity: &ClientIdentity) -> Option<Arc<Slot>> {
        self.slots.get(identity).map(|slot| Arc::clone(&slot))
    }

    fn slot(&self, identity: &ClientIdentity) -> Arc<Slot> {
        if let Some(slot) = self.existing(identity) {
            return slot;
        }
        Arc::clone(
            &self
                .slots
                .entry(identity.clone())
                .or_insert_with(|| Arc::new(Slot::new())),
        )
    }

    /// Counts one more outstanding request for `identity` and returns the new
    /// pending count.
    ///
    /// Responses sitting in the bucket of an identity with nothing pending are
    /// orphans (e.g. answers to requests issued before a restart) and are
    /// discarded first so they cannot satisfy the new request.
    pub fn record_dispatch(&self, identity: &ClientIdentity) -> u64 {
        let slot = self.slot(identity);
        let mut state = slot.state.lock();
        if state.pending == 0 && !state.bucket.is_empty() {
            let orphans = state.received();
            state.bucket.clear();
            telemetry::increment_responses_discarded(self.family, orphans);
            #[cfg(feature = "tracing")]
            tracing::debug!(%identity, family = %self.family, orphans, "discarded orphan responses");
        }
        state.pending += 1;
        state.pending
    }

    /// Uncounts one request whose publish was rejected outright. Saturates at
    /// zero and returns the new pending count.
    pub fn cancel_dispatch(&self, identity: &ClientIdentity) -> u64 {
        let Some(slot) = self.existing(identity) else {
            return 0;
        };
        let pending = {
            let mut state = slot.state.lock();
            state.pending = state.pending.saturating_sub(1);
            state.trim_surplus();
            state.pending
        };
        slot.notify.notify_waiters();
        pending
    }

    /// Files an inbound response under its key and wakes waiters of that
    /// identity.
    pub fn accept(&self, record: Record) {
        let identity = ClientIdentity::from(record.key.as_str());
        let slot = self.slot(&identity);
        let (dropped, _ready) = {
            let mut state = slot.state.lock();
            state.bucket.push_back(record);
            let dropped = state.trim_surplus();
            (dropped, matches!(state.state(), CorrelationState::Ready { .. }))
        };

        telemetry::increment_responses_received(self.family);
        telemetry::increment_responses_discarded(self.family, dropped);
        #[cfg(feature = "tracing")]
        tracing::trace!(%identity, family = %self.family, dropped, ready = _ready, "response accepted");

        slot.notify.notify_waiters();
    }

    /// Returns the latest response if every pending request has been answered.
    ///
    /// Never blocks and never creates state for unknown identities.
    pub fn fetch(&self, identity: &ClientIdentity) -> Option<Record> {
        let slot = self.existing(identity)?;
        let record = slot.state.lock().take_ready();
        if record.is_some() {
            telemetry::increment_deliveries(self.family);
        }
        record
    }

    /// Like [`fetch`](Self::fetch), but waits up to `timeout` for the
    /// identity to become ready.
    ///
    /// Returns `None` right away when nothing is pending, and as soon as the
    /// identity is destroyed.
    pub async fn wait_fetch(&self, identity: &ClientIdentity, timeout: Duration) -> Option<Record> {
        let slot = self.existing(identity)?;
        let deadline = Instant::now() + timeout;

        loop {
            let notified = slot.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if slot.closed.is_cancelled() {
                return None;
            }

            {
                let mut state = slot.state.lock();
                if state.pending == 0 {
                    return None;
                }
                if let Some(record) = state.take_ready() {
                    telemetry::increment_deliveries(self.family);
                    return Some(record);
                }
            }

            tokio::select! {
                () = &mut notified => {}
                () = slot.closed.cancelled() => return None,
                () = tokio::time::sleep_until(deadline) => return None,
            }
        }
    }

    pub fn pending(&self, identity: &ClientIdentity) -> u64 {
        self.existing(identity)
            .map_or(0, |slot| slot.state.lock().pending)
    }

    /// Number of responses currently held for `identity`.
    pub fn buffered(&self, identity: &ClientIdentity) -> u64 {
        self.existing(identity)
            .map_or(0, |slot| slot.state.lock().received())
    }

    pub fn state(&self, identity: &ClientIdentity) -> CorrelationState {
        self.existing(identity)
            .map_or(CorrelationState::NoRequest, |slot| slot.state.lock().state())
    }

    /// Removes all state of `identity` and releases its waiters. Returns
    /// whether anything was tracked.
    pub fn destroy(&self, identity: &ClientIdentity) -> bool {
        let Some((_, slot)) = self.slots.remove(identity) else {
            return false;
        };
        slot.closed.cancel();
        slot.notify.notify_waiters();
        true
    }

    /// Every identity with correlation state.
    pub fn identities(&self) -> Vec<ClientIdentity> {
        self.slots.iter().map(|slot| slot.key().clone()).collect()
    }

    /// Number of identities with correlation state.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
