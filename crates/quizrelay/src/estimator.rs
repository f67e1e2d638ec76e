//! Queue-position estimation from broker-reported consumption progress.
//!
//! The relay never tracks worker progress itself. Instead it compares the
//! position a request was published at with the commit position of the
//! shared consumer group on the same channel:
//!
//! ```text
//! messages_ahead = marker - committed + 1
//! ```
//!
//! where `committed` is the next offset the workers will read. The estimate
//! counts the caller's own message, so a request that is up next reports 1.
//! A channel nobody has consumed from yet has an unknown position, which
//! callers treat as "at the front of the queue".

use crate::backbone::Backbone;
use core::time::Duration;
use quizrelay_core::{Channel, CommittedPosition, Error, Result, SequenceMarker};
use std::sync::Arc;
use tokio::time::timeout;

/// Snapshot of where a client's request stands on its channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct QueueEstimate {
    /// Channel the client's work was assigned to, if any.
    pub channel: Option<Channel>,
    /// Position of the client's last request on that channel.
    pub marker: Option<SequenceMarker>,
    pub committed: CommittedPosition,
}

impl QueueEstimate {
    /// Number of messages still to be consumed up to and including the
    /// client's own. `None` when either position is unknown.
    pub fn messages_ahead(&self) -> Option<u64> {
        self.marker?.messages_ahead(self.committed)
    }
}

/// Queries consumer-group commit positions with a bounded wait.
pub struct QueuePositionEstimator<B> {
    backbone: Arc<B>,
    group_id: String,
    admin_timeout: Duration,
}

impl<B: Backbone> QueuePositionEstimator<B> {
    pub fn new(backbone: Arc<B>, group_id: impl Into<String>, admin_timeout: Duration) -> Self {
        Self {
            backbone,
            group_id: group_id.into(),
            admin_timeout,
        }
    }

    /// Current commit position of the worker group on `channel`.
    ///
    /// A group that has never committed yields [`CommittedPosition::Unknown`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackboneUnavailable`] if the query fails or does not
    /// complete within the admin timeout.
    pub async fn committed(&self, channel: Channel) -> Result<CommittedPosition> {
        let topic = channel.name();
        match timeout(
            self.admin_timeout,
            self.backbone.committed_position(&topic, &self.group_id),
        )
        .await
        {
            Ok(position) => position,
            Err(_) => Err(Error::BackboneUnavailable {
                context: format!(
                    "commit position of {topic} not available within {:?}",
                    self.admin_timeout
                ),
            }),
        }
    }

    /// Builds a full estimate for a request published at `marker` on
    /// `channel`.
    pub async fn estimate(
        &self,
        channel: Channel,
        marker: Option<SequenceMarker>,
    ) -> Result<QueueEstimate> {
        let committed = self.committed(channel).await?;
        Ok(QueueEstimate {
            channel: Some(channel),
            marker,
            committed,
        })
    }
}
