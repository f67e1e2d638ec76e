//! In-process [`KeyValueStore`] with lazy TTL expiry.
//!
//! Expiry is evaluated against the tokio clock, so tests running with paused
//! time can step over lock lifetimes deterministically.

use super::KeyValueStore;
use core::time::Duration;
use dashmap::{DashMap, mapref::entry::Entry as MapEntry};
use portable_atomic::{AtomicBool, Ordering};
use quizrelay_core::{Error, Result};
use std::sync::Arc;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: &str, ttl: Option<Duration>) -> Self {
        Self {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Shared handle to an in-process store. Clones refer to the same entries.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Makes every subsequent round trip succeed (`true`) or fail with
    /// [`Error::StoreUnavailable`] (`false`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_available(&self, key: &str) -> Result<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::StoreUnavailable {
                context: format!("store unreachable for key {key}"),
            })
        }
    }
}

impl KeyValueStore for MemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.ensure_available(key)?;
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    Ok(false)
                } else {
                    occupied.insert(Entry::new(value, Some(ttl)));
                    Ok(true)
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry::new(value, Some(ttl)));
                Ok(true)
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.ensure_available(key)?;
        self.entries.insert(key.to_string(), Entry::new(value, ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.ensure_available(key)?;
        let now = Instant::now();
        let value = self
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone());
        if value.is_none() {
            self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        }
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_available(key)?;
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| entry.is_live(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn set_if_absent_respects_live_entries() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);

        assert!(store.set_if_absent("k", "1", ttl).await.unwrap());
        assert!(!store.set_if_absent("k", "2", ttl).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("1"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.set_if_absent("k", "3", ttl).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("3"));
    }

    #[tokio::test(start_paused = true)]
    async fn set_without_ttl_never_expires() {
        let store = MemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn delete_reports_live_removals() {
        let store = MemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn concurrent_set_if_absent_has_one_winner() {
        let store = MemoryStore::new();
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .set_if_absent("lock", &i.to_string(), Duration::from_secs(5))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let winners = futures::future::join_all(handles)
            .await
            .into_iter()
            .filter(|won| *won.as_ref().unwrap())
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn unavailable_store_fails_round_trips() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(
            store.get("k").await,
            Err(Error::StoreUnavailable { .. })
        ));
    }
}
