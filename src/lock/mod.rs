//! Duplicate and replay locks over the cache

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::{Cache, CacheResult};

const DAY: u64 = 24 * 60 * 60;

/// Replay nonces are remembered for a day
pub const NONCE_TTL: Duration = Duration::from_secs(DAY);
/// One conversion per click and offer for 30 days
pub const CLICK_OFFER_TTL: Duration = Duration::from_secs(30 * DAY);
/// External conversion ids are remembered for 90 days
pub const EXTERNAL_ID_TTL: Duration = Duration::from_secs(90 * DAY);
/// Click fingerprints collapse repeats within a minute
pub const CLICK_FINGERPRINT_TTL: Duration = Duration::from_secs(60);

pub fn nonce_key(nonce: &str) -> String {
    format!("nonce:{}", nonce)
}

pub fn external_id_key(external_id: &str) -> String {
    format!("conv_ext:{}", external_id)
}

pub fn click_offer_key(click_id: Uuid, offer_id: Uuid) -> String {
    format!("conv_lock:{}:{}", click_id, offer_id)
}

pub fn click_fingerprint_key(fingerprint: &str) -> String {
    format!("click_fp:{}", fingerprint)
}

/// Thin wrapper exposing lock semantics on top of [`Cache`]
#[derive(Clone)]
pub struct ReplayLock {
    cache: Arc<dyn Cache>,
}

impl ReplayLock {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    pub async fn is_locked(&self, key: &str) -> CacheResult<bool> {
        self.cache.exists(key).await
    }

    pub async fn lock(&self, key: &str, ttl: Duration) -> CacheResult<()> {
        self.cache.set(key, "1", ttl).await
    }

    /// Atomically take the lock. Returns `true` when it was already held,
    /// so among concurrent callers exactly one sees `false`.
    pub async fn exists_or_acquire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let acquired = self.cache.set_nx(key, "1", ttl).await?;
        Ok(!acquired)
    }
}
