//! Publishing work items onto worker channels.

use crate::{backbone::Backbone, correlation::ResponseCorrelator, telemetry};
use core::time::Duration;
use quizrelay_core::{Channel, ClientIdentity, Error, Result, SequenceMarker, wire};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{Instant, timeout};

/// Encodes work items and publishes them keyed by client identity.
pub struct Dispatcher<B> {
    backbone: Arc<B>,
    publish_timeout: Duration,
}

impl<B: Backbone> Dispatcher<B> {
    pub const fn new(backbone: Arc<B>, publish_timeout: Duration) -> Self {
        Self {
            backbone,
            publish_timeout,
        }
    }

    /// Publishes `payload` on `channel` and returns its position.
    ///
    /// The pending count in `correlator` is bumped before the publish so a
    /// fast worker's response can never arrive ahead of its own request being
    /// counted. A publish the backbone rejects outright persisted nothing, so
    /// the bump is undone. An unacknowledged publish may still have been
    /// persisted and stays counted.
    ///
    /// # Errors
    ///
    /// - [`Error::Serialization`] if `payload` cannot be encoded. Nothing is
    ///   counted or published.
    /// - [`Error::BackboneUnavailable`] if the backbone rejects the publish or
    ///   does not acknowledge it within the publish timeout.
    pub async fn dispatch<T: Serialize>(
        &self,
        correlator: &ResponseCorrelator,
        identity: &ClientIdentity,
        channel: Channel,
        payload: &T,
    ) -> Result<SequenceMarker> {
        let bytes = wire::encode(payload)?;
        let _pending = correlator.record_dispatch(identity);

        let topic = channel.name();
        let started = Instant::now();
        let published = timeout(
            self.publish_timeout,
            self.backbone.publish(&topic, identity.as_str(), bytes),
        )
        .await;

        let marker = match published {
            Ok(Ok(marker)) => marker,
            Ok(Err(e)) => {
                let _pending = correlator.cancel_dispatch(identity);
                #[cfg(feature = "tracing")]
                tracing::warn!(%identity, %channel, pending = _pending, "publish failed: {e}");
                return Err(e);
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%identity, %channel, timeout = ?self.publish_timeout, "publish not acknowledged");
                return Err(Error::BackboneUnavailable {
                    context: format!(
                        "publish to {topic} not acknowledged within {:?}",
                        self.publish_timeout
                    ),
                });
            }
        };

        telemetry::increment_dispatches(channel.family());
        telemetry::record_dispatch_duration(
            channel.family(),
            started.elapsed().as_secs_f64() * 1_000.0,
        );

        #[cfg(feature = "tracing")]
        tracing::debug!(%identity, %channel, %marker, pending = _pending, "request dispatched");

        Ok(marker)
    }
}
