//! The key-value store seam used for duplicate-request locks and channel
//! assignments.
//!
//! Every method is a single round trip; `set_if_absent` must be atomic with
//! respect to concurrent callers, since the duplicate-request guard relies on
//! it as its only synchronization point.

pub mod keys;
pub mod memory;

pub use memory::MemoryStore;

use core::{future::Future, time::Duration};
use quizrelay_core::Result;

/// A TTL-aware string key-value store.
pub trait KeyValueStore: Send + Sync + 'static {
    /// Stores `value` under `key` with a `ttl` unless a live entry already
    /// exists. Returns `true` when this call created the entry.
    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Stores `value` under `key`, replacing any previous entry. `None` keeps
    /// the entry until it is deleted.
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Returns the live value under `key`.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Removes `key`. Returns `true` when a live entry was removed.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;
}
