//! The message backbone seam.
//!
//! The relay only needs three things from the backbone: publish a keyed
//! message and learn its position, subscribe to a topic as a member of a
//! consumer group, and ask where that group's commit position stands. These
//! are captured by [`Backbone`] and [`Subscription`] so that a broker client
//! and the in-process [`MemoryBackbone`] are interchangeable.
//!
//! Delivery guarantees are the backbone's business: the relay assumes
//! at-least-once delivery with per-partition ordering and key partitioning.

pub mod memory;

pub use memory::{MemoryBackbone, MemorySubscription};

use bytes::Bytes;
use core::future::Future;
use quizrelay_core::{CommittedPosition, Result, SequenceMarker};

/// A message read from a backbone topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    /// Correlation key (the client identity).
    pub key: String,
    pub payload: Bytes,
    pub offset: u64,
}

/// A partitioned publish/subscribe message backbone.
///
/// Implementations must be safe for concurrent publishes from many tasks over
/// a shared, long-lived connection.
pub trait Backbone: Send + Sync + 'static {
    type Subscription: Subscription;

    /// Publishes `payload` keyed by `key` and resolves once the backbone has
    /// persisted it, yielding its position on `topic`.
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Bytes,
    ) -> impl Future<Output = Result<SequenceMarker>> + Send;

    /// Returns the commit position of `group_id` on `topic`, or
    /// [`CommittedPosition::Unknown`] when the group has never committed.
    fn committed_position(
        &self,
        topic: &str,
        group_id: &str,
    ) -> impl Future<Output = Result<CommittedPosition>> + Send;

    /// Joins `group_id` on `topic`, resuming after the group's last commit.
    fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
    ) -> impl Future<Output = Result<Self::Subscription>> + Send;
}

/// A consumer-group membership on one topic.
pub trait Subscription: Send + 'static {
    /// Waits for the next record. `None` means the subscription is closed.
    fn next(&mut self) -> impl Future<Output = Option<Record>> + Send;

    /// Marks `record` (and everything before it) as processed for the group.
    fn commit(&mut self, record: &Record) -> impl Future<Output = Result<()>> + Send;
}
