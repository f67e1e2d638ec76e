//! In-process backbone used by the server's loopback mode and by tests.
//!
//! Every topic is a single ordered partition whose offsets start at 0.
//! Consumer groups track the next offset to read, matching broker semantics,
//! so queue estimates computed against this backbone behave the same as
//! against a real one.
//!
//! A few knobs simulate infrastructure trouble: [`MemoryBackbone::set_available`]
//! makes every round trip fail, and [`MemoryBackbone::set_ack_delay`] holds
//! publish acknowledgements back after the message has been persisted.

use super::{Backbone, Record, Subscription};
use bytes::Bytes;
use core::time::Duration;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use portable_atomic::{AtomicBool, Ordering};
use quizrelay_core::{CommittedPosition, Error, Result, SequenceMarker};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

struct Topic {
    log: RwLock<Vec<Record>>,
    appended: Notify,
}

struct Inner {
    topics: DashMap<String, Arc<Topic>>,
    /// `(group, topic)` -> next offset the group will read.
    commits: DashMap<(String, String), u64>,
    available: AtomicBool,
    ack_delay: Mutex<Duration>,
    closed: CancellationToken,
}

impl Inner {
    fn topic(&self, name: &str) -> Arc<Topic> {
        if let Some(topic) = self.topics.get(name) {
            return Arc::clone(&topic);
        }
        Arc::clone(
            &self
                .topics
                .entry(name.to_string())
                .or_insert_with(|| {
                    Arc::new(Topic {
                        log: RwLock::new(Vec::new()),
                        appended: Notify::new(),
                    })
                }),
        )
    }

    fn ensure_available(&self, topic: &str) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::BackboneUnavailable {
                context: "backbone closed".to_string(),
            });
        }
        if !self.available.load(Ordering::Acquire) {
            return Err(Error::BackboneUnavailable {
                context: format!("broker unreachable for topic {topic}"),
            });
        }
        Ok(())
    }

    fn advance_commit(&self, group: &str, topic: &str, next_offset: u64) {
        let mut entry = self
            .commits
            .entry((group.to_string(), topic.to_string()))
            .or_insert(next_offset);
        if *entry < next_offset {
            *entry = next_offset;
        }
    }
}

/// Shared handle to an in-process backbone. Clones refer to the same topics.
#[derive(Clone)]
pub struct MemoryBackbone {
    inner: Arc<Inner>,
}

impl Default for MemoryBackbone {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackbone {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: DashMap::new(),
                commits: DashMap::new(),
                available: AtomicBool::new(true),
                ack_delay: Mutex::new(Duration::ZERO),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Makes every subsequent round trip succeed (`true`) or fail with
    /// [`Error::BackboneUnavailable`] (`false`).
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::Release);
    }

    /// Delays publish acknowledgements by `delay`. Messages are persisted
    /// before the delay starts.
    pub fn set_ack_delay(&self, delay: Duration) {
        *self.inner.ack_delay.lock() = delay;
    }

    /// Moves `group_id`'s commit position on `topic` forward to
    /// `next_offset`. Positions never move backwards.
    pub fn commit_offset(&self, topic: &str, group_id: &str, next_offset: u64) {
        self.inner.advance_commit(group_id, topic, next_offset);
    }

    /// Number of records ever published on `topic`.
    pub fn len(&self, topic: &str) -> usize {
        self.inner
            .topics
            .get(topic)
            .map_or(0, |topic| topic.log.read().len())
    }

    /// Snapshot of every record published on `topic`.
    pub fn records(&self, topic: &str) -> Vec<Record> {
        self.inner
            .topics
            .get(topic)
            .map(|topic| topic.log.read().clone())
            .unwrap_or_default()
    }

    /// Closes the backbone: subscriptions end and round trips fail.
    pub fn close(&self) {
        self.inner.closed.cancel();
    }
}

impl Backbone for MemoryBackbone {
    type Subscription = MemorySubscription;

    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<SequenceMarker> {
        self.inner.ensure_available(topic)?;
        let delay = *self.inner.ack_delay.lock();

        let log = self.inner.topic(topic);
        let offset = {
            let mut records = log.log.write();
            let offset = records.len() as u64;
            records.push(Record {
                topic: topic.to_string(),
                key: key.to_string(),
                payload,
                offset,
            });
            offset
        };
        log.appended.notify_waiters();

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        Ok(SequenceMarker(offset))
    }

    async fn committed_position(&self, topic: &str, group_id: &str) -> Result<CommittedPosition> {
        self.inner.ensure_available(topic)?;
        let position = self
            .inner
            .commits
            .get(&(group_id.to_string(), topic.to_string()))
            .map_or(CommittedPosition::Unknown, |offset| {
                CommittedPosition::At(*offset)
            });
        Ok(position)
    }

    async fn subscribe(&self, topic: &str, group_id: &str) -> Result<MemorySubscription> {
        self.inner.ensure_available(topic)?;
        let cursor = self
            .inner
            .commits
            .get(&(group_id.to_string(), topic.to_string()))
            .map_or(0, |offset| *offset);

        Ok(MemorySubscription {
            inner: Arc::clone(&self.inner),
            topic: self.inner.topic(topic),
            topic_name: topic.to_string(),
            group_id: group_id.to_string(),
            cursor,
        })
    }
}

/// A consumer-group cursor over one in-memory topic.
pub struct MemorySubscription {
    inner: Arc<Inner>,
    topic: Arc<Topic>,
    topic_name: String,
    group_id: String,
    cursor: u64,
}

impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<Record> {
        loop {
            // Register interest before checking the log so a publish landing
            // between the check and the wait is not missed.
            let notified = self.topic.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.closed.is_cancelled() {
                return None;
            }

            let next = self.topic.log.read().get(self.cursor as usize).cloned();
            if let Some(record) = next {
                self.cursor += 1;
                return Some(record);
            }

            tokio::select! {
                () = &mut notified => {}
                () = self.inner.closed.cancelled() => return None,
            }
        }
    }

    async fn commit(&mut self, record: &Record) -> Result<()> {
        self.inner.ensure_available(&self.topic_name)?;
        self.inner
            .advance_commit(&self.group_id, &self.topic_name, record.offset + 1);
        Ok(())
    }
}
