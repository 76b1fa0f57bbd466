//! In-process TTL cache

use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{Cache, CacheError, CacheResult};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Cache backed by a mutex-guarded map
///
/// All operations take the single lock, which makes `set_nx` and `incr`
/// atomic with respect to each other.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries (call periodically)
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Number of stored entries, expired ones included until the next purge
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(entries.get(key).is_some_and(|entry| entry.is_live(now)))
    }

    async fn incr(&self, key: &str, ttl: Duration) -> CacheResult<i64> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                let current = entry
                    .value
                    .parse::<i64>()
                    .map_err(|_| CacheError::NotAnInteger(key.to_string()))?;
                let next = current + 1;
                entry.value = next.to_string();
                Ok(next)
            }
            _ => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: now + ttl,
                    },
                );
                Ok(1)
            }
        }
    }
}
