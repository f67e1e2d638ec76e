//! The relay facade: the one type hosts talk to.
//!
//! [`Relay`] wires the channel allocator, duplicate-request guard,
//! dispatcher, response correlators, queue estimator and session manager
//! together over a [`Backbone`] and a [`KeyValueStore`]. None of the internal
//! maps are reachable from outside; every interaction goes through the
//! operations below.
//!
//! A typical client round trip:
//!
//! 1. [`get_channel`](Relay::get_channel) assigns a worker channel.
//! 2. [`dispatch`](Relay::dispatch) publishes the work item.
//! 3. [`estimate`](Relay::estimate) reports the queue position while waiting.
//! 4. [`fetch`](Relay::fetch) (or [`wait_fetch`](Relay::wait_fetch)) returns
//!    the response once the worker has answered.

use crate::{
    backbone::{Backbone, Record},
    config::RelayConfig,
    correlation::{CorrelationState, ResponseCorrelator, listen},
    dispatch::{ChannelAllocator, Dispatcher, DuplicateGuard},
    estimator::{QueueEstimate, QueuePositionEstimator},
    session::{Correlators, SessionManager, sweep_periodically},
    store::{KeyValueStore, keys::channel_key},
    telemetry,
};
use core::time::Duration;
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, Ordering};
use quizrelay_core::{
    Channel, ClientIdentity, Error, Family, Result, SequenceMarker,
    wire::{self, Workload},
};
use std::sync::Arc;
use tokio::{task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod tests;

struct Inner<B, S> {
    config: RelayConfig,
    backbone: Arc<B>,
    store: Arc<S>,
    allocator: ChannelAllocator,
    guard: Arc<DuplicateGuard<S>>,
    dispatcher: Dispatcher<B>,
    correlators: Correlators,
    estimator: QueuePositionEstimator<B>,
    sessions: Arc<SessionManager<S>>,
    started: AtomicBool,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Asynchronous request/response correlation over a message backbone.
///
/// Cloning is cheap; clones share all state.
pub struct Relay<B, S> {
    inner: Arc<Inner<B, S>>,
}

impl<B, S> Clone for Relay<B, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backbone, S: KeyValueStore> Relay<B, S> {
    /// Builds a relay. Nothing is consumed until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` fails validation.
    pub fn new(config: RelayConfig, backbone: B, store: S) -> Result<Self> {
        config.validate()?;

        let backbone = Arc::new(backbone);
        let store = Arc::new(store);
        let guard = Arc::new(DuplicateGuard::new(Arc::clone(&store), &config));
        let correlators: Correlators =
            Family::ALL.map(|family| Arc::new(ResponseCorrelator::new(family)));
        let sessions = Arc::new(SessionManager::new(
            correlators.clone(),
            Arc::clone(&guard),
            Arc::clone(&store),
            config.session_idle_ttl,
        ));

        Ok(Self {
            inner: Arc::new(Inner {
                allocator: ChannelAllocator::new(&config),
                dispatcher: Dispatcher::new(Arc::clone(&backbone), config.publish_timeout),
                estimator: QueuePositionEstimator::new(
                    Arc::clone(&backbone),
                    config.group_id.clone(),
                    config.admin_timeout,
                ),
                config,
                backbone,
                store,
                guard,
                correlators,
                sessions,
                started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    pub fn backbone(&self) -> &B {
        &self.inner.backbone
    }

    /// Every request channel of `family`.
    pub fn channels(&self, family: Family) -> impl Iterator<Item = Channel> + '_ {
        self.inner.allocator.channels(family)
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shutdown() {
            Err(Error::ServiceShutdown)
        } else {
            Ok(())
        }
    }

    fn correlator(&self, family: Family) -> &ResponseCorrelator {
        &self.inner.correlators[family.index()]
    }

    /// Subscribes to both response channels and starts the idle-session
    /// sweeper. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceShutdown`] after [`shutdown`](Self::shutdown).
    /// - [`Error::BackboneUnavailable`] if a subscription cannot be created.
    pub async fn start(&self) -> Result<()> {
        self.ensure_running()?;
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(Family::ALL.len() + 1);
        for family in Family::ALL {
            let subscription = match self
                .inner
                .backbone
                .subscribe(family.response_topic(), &self.inner.config.group_id)
                .await
            {
                Ok(subscription) => subscription,
                Err(e) => {
                    for handle in &handles {
                        handle.abort();
                    }
                    self.inner.started.store(false, Ordering::Release);
                    return Err(e);
                }
            };
            handles.push(tokio::spawn(listen(
                Arc::clone(&self.inner.correlators[family.index()]),
                subscription,
                self.inner.shutdown.child_token(),
            )));
        }

        handles.push(tokio::spawn(sweep_periodically(
            Arc::clone(&self.inner.sessions),
            self.inner.config.sweep_interval,
            self.inner.shutdown.child_token(),
        )));

        self.inner.tasks.lock().extend(handles);

        #[cfg(feature = "tracing")]
        tracing::info!(
            group_id = %self.inner.config.group_id,
            question_workers = self.inner.config.question.pool_size,
            explanation_workers = self.inner.config.explanation.pool_size,
            "relay started"
        );
        Ok(())
    }

    /// Stops background tasks and refuses new work.
    ///
    /// Waits up to the configured shutdown timeout per task; tasks that do
    /// not finish in time are abandoned.
    pub async fn shutdown(&self) {
        #[cfg(feature = "tracing")]
        tracing::info!("Relay shutting down");
        self.inner.shutdown.cancel();

        let handles = core::mem::take(&mut *self.inner.tasks.lock());
        let wait = self.inner.config.shutdown_timeout;
        let waits = handles.into_iter().enumerate().map(|(_i, handle)| async move {
            match timeout(wait, handle).await {
                Ok(Ok(())) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Relay task {_i} stopped");
                }
                Ok(Err(_e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Relay task {_i} failed: {_e}");
                }
                Err(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Relay task {_i} did not stop in time");
                }
            }
        });
        futures::future::join_all(waits).await;

        #[cfg(feature = "tracing")]
        tracing::info!("Relay shutdown complete");
    }

    /// Assigns `identity` the next `family` channel and remembers the
    /// assignment for the family's channel TTL.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceShutdown`] after [`shutdown`](Self::shutdown).
    /// - [`Error::StoreUnavailable`] if the assignment cannot be stored.
    pub async fn get_channel(&self, identity: &ClientIdentity, family: Family) -> Result<Channel> {
        self.ensure_running()?;
        self.inner.sessions.touch(identity);

        let channel = self.inner.allocator.next_channel(family);
        self.inner
            .store
            .set(
                &channel_key(identity, family),
                &channel.name(),
                Some(self.inner.config.family(family).channel_ttl),
            )
            .await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(%identity, %channel, "channel assigned");
        Ok(channel)
    }

    /// The live channel assignment of `identity`, if any.
    ///
    /// Assignments naming a channel outside the current pool (e.g. written
    /// before the pool shrank) are ignored.
    pub async fn assigned_channel(
        &self,
        identity: &ClientIdentity,
        family: Family,
    ) -> Result<Option<Channel>> {
        let stored = self.inner.store.get(&channel_key(identity, family)).await?;
        Ok(stored.as_deref().and_then(Channel::parse).filter(|channel| {
            channel.family() == family && channel.index() < self.inner.allocator.pool_size(family)
        }))
    }

    /// Publishes `request` for `identity` on its assigned channel, assigning
    /// one first if needed, and returns the request's position.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateRequest`] if the client already has a `W` request
    ///   in flight.
    /// - [`Error::Serialization`] if `request` cannot be encoded.
    /// - [`Error::BackboneUnavailable`] / [`Error::StoreUnavailable`] on
    ///   infrastructure failures. The request lock is released in every
    ///   failure case so the client may retry immediately.
    /// - [`Error::ServiceShutdown`] after [`shutdown`](Self::shutdown).
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(identity = %identity, family = %W::FAMILY)))]
    pub async fn dispatch<W: Workload>(
        &self,
        identity: &ClientIdentity,
        request: &W::Request,
    ) -> Result<SequenceMarker> {
        self.ensure_running()?;
        self.inner.sessions.touch(identity);

        let family = W::FAMILY;
        if !self.inner.guard.acquire(identity, family).await? {
            telemetry::increment_duplicate_rejections(family);
            return Err(Error::DuplicateRequest {
                identity: identity.to_string(),
                family,
            });
        }

        match self.dispatch_locked(identity, family, request).await {
            Ok(marker) => {
                self.inner.sessions.remember_marker(identity, family, marker);
                Ok(marker)
            }
            Err(e) => {
                if let Err(_release) = self.inner.guard.release(identity, family).await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("failed to release request lock: {_release}");
                }
                Err(e)
            }
        }
    }

    async fn dispatch_locked<T: serde::Serialize + Sync>(
        &self,
        identity: &ClientIdentity,
        family: Family,
        request: &T,
    ) -> Result<SequenceMarker> {
        let channel = match self.assigned_channel(identity, family).await? {
            Some(channel) => channel,
            None => self.get_channel(identity, family).await?,
        };
        self.inner
            .dispatcher
            .dispatch(self.correlator(family), identity, channel, request)
            .await
    }

    /// Returns the response to the client's latest `W` request if every
    /// outstanding request has been answered, without waiting.
    ///
    /// `Ok(None)` means "not ready" or "nothing requested".
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if the delivered response cannot be
    /// decoded. The response is consumed either way.
    pub async fn fetch<W: Workload>(&self, identity: &ClientIdentity) -> Result<Option<W::Response>> {
        self.inner.sessions.touch(identity);
        let record = self.correlator(W::FAMILY).fetch(identity);
        self.deliver::<W>(identity, record).await
    }

    /// Like [`fetch`](Self::fetch), but waits up to `wait` for the response.
    ///
    /// Returns early with `Ok(None)` when nothing is pending or the session
    /// is destroyed while waiting.
    pub async fn wait_fetch<W: Workload>(
        &self,
        identity: &ClientIdentity,
        wait: Duration,
    ) -> Result<Option<W::Response>> {
        self.inner.sessions.touch(identity);
        let record = self
            .correlator(W::FAMILY)
            .wait_fetch(identity, wait)
            .await;
        self.deliver::<W>(identity, record).await
    }

    async fn deliver<W: Workload>(
        &self,
        identity: &ClientIdentity,
        record: Option<Record>,
    ) -> Result<Option<W::Response>> {
        let Some(record) = record else {
            return Ok(None);
        };

        if self.inner.config.release_on_delivery {
            self.inner.guard.release(identity, W::FAMILY).await?;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(%identity, family = %W::FAMILY, offset = record.offset, "response delivered");

        wire::decode(&record.payload).map(Some)
    }

    /// Where the client's latest `family` request stands in its channel's
    /// queue.
    ///
    /// A client without a channel assignment gets an all-unknown estimate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackboneUnavailable`] or [`Error::StoreUnavailable`]
    /// if a round trip fails.
    pub async fn estimate(&self, identity: &ClientIdentity, family: Family) -> Result<QueueEstimate> {
        self.inner.sessions.touch(identity);
        let marker = self.inner.sessions.marker(identity, family);
        match self.assigned_channel(identity, family).await? {
            Some(channel) => self.inner.estimator.estimate(channel, marker).await,
            None => Ok(QueueEstimate {
                marker,
                ..QueueEstimate::default()
            }),
        }
    }

    /// Tears down everything held for `identity`. Returns whether the relay
    /// knew the identity.
    pub async fn destroy_session(&self, identity: &ClientIdentity) -> Result<bool> {
        self.inner.sessions.destroy(identity).await
    }

    /// Destroys sessions idle past the configured TTL; returns how many.
    pub async fn sweep_idle_sessions(&self) -> usize {
        self.inner.sessions.sweep().await
    }

    pub fn state(&self, identity: &ClientIdentity, family: Family) -> CorrelationState {
        self.correlator(family).state(identity)
    }

    /// Number of tracked sessions.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }
}
