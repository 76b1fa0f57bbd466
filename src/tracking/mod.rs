//! Tracking codes
//!
//! A code looks like `P1-P2-P3-P4`:
//! - `P1` first 8 chars of the user offer id
//! - `P2` mint time in unix seconds, base36
//! - `P3` first 8 chars of a fresh 64-bit nonce
//! - `P4` first 12 chars of `HMAC-SHA256("{user_offer_id}|{timestamp}|{nonce}")`
//!
//! The cache entry written at mint time is the ground truth for validation.
//! Codes persisted on user offers are written back into a cold cache at
//! startup by [`TrackingCodeService::reseed`].

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::cache::{Cache, CacheError};
use crate::security::Signer;
use crate::store::{Store, StoreError};

/// How long a minted code stays resolvable
pub const TRACKING_CODE_TTL: std::time::Duration =
    std::time::Duration::from_secs(365 * 24 * 60 * 60);

const SIGNATURE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("INVALID_OR_EXPIRED")]
    InvalidOrExpired,

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn cache_key(code: &str) -> String {
    format!("secure_tracking:{}", code)
}

/// Base36 encoding of a non-negative integer (lowercase digits)
pub fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if value == 0 {
        return "0".to_string();
    }

    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

pub fn from_base36(digits: &str) -> Option<u64> {
    if digits.is_empty() {
        return None;
    }
    digits.chars().try_fold(0u64, |acc, c| {
        let digit = c.to_digit(36)?;
        acc.checked_mul(36)?.checked_add(u64::from(digit))
    })
}

/// Mint time encoded in `code`, if the code is shaped for `user_offer_id`
fn minted_at(user_offer_id: Uuid, code: &str) -> Option<i64> {
    let parts: Vec<&str> = code.split('-').collect();
    let [prefix, timestamp, _, _] = parts.as_slice() else {
        return None;
    };
    if prefix.len() != 8 || !user_offer_id.to_string().starts_with(prefix) {
        return None;
    }
    from_base36(timestamp).and_then(|t| i64::try_from(t).ok())
}

pub struct TrackingCodeService {
    cache: Arc<dyn Cache>,
    signer: Signer,
}

impl TrackingCodeService {
    pub fn new(cache: Arc<dyn Cache>, signer: Signer) -> Self {
        Self { cache, signer }
    }

    /// Mint a code for `user_offer_id` and register it in the cache.
    ///
    /// A code that could not be registered would never validate, so a cache
    /// failure fails the mint.
    pub async fn mint(&self, user_offer_id: Uuid, now: DateTime<Utc>) -> Result<String, TrackingError> {
        let mut nonce_bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = hex::encode(nonce_bytes);

        let timestamp = now.timestamp();
        let signature = self
            .signer
            .sign(&format!("{}|{}|{}", user_offer_id, timestamp, nonce));

        let id = user_offer_id.to_string();
        let code = format!(
            "{}-{}-{}-{}",
            &id[..8],
            to_base36(timestamp.max(0) as u64),
            &nonce[..8],
            &signature[..SIGNATURE_LEN],
        );

        self.cache
            .set(
                &cache_key(&code),
                &format!("{}|{}", user_offer_id, timestamp),
                TRACKING_CODE_TTL,
            )
            .await?;

        Ok(code)
    }

    /// Write cache entries for every code persisted in `store`, keeping
    /// each entry's remaining lifetime. Returns how many were restored.
    pub async fn reseed(&self, store: &dyn Store, now: DateTime<Utc>) -> Result<usize, TrackingError> {
        let mut restored = 0;

        for (user_offer_id, code) in store.list_tracking_codes().await? {
            let Some(timestamp) = minted_at(user_offer_id, &code) else {
                tracing::warn!(%user_offer_id, "Stored tracking code is malformed, skipping");
                continue;
            };

            let age = (now.timestamp() - timestamp).max(0) as u64;
            let Some(remaining) = TRACKING_CODE_TTL.as_secs().checked_sub(age).filter(|r| *r > 0)
            else {
                continue;
            };

            self.cache
                .set(
                    &cache_key(&code),
                    &format!("{}|{}", user_offer_id, timestamp),
                    std::time::Duration::from_secs(remaining),
                )
                .await?;
            restored += 1;
        }

        Ok(restored)
    }

    /// Resolve a code to its user offer if it was minted here and is younger than `max_age`
    pub async fn validate(
        &self,
        code: &str,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<Uuid, TrackingError> {
        let record = self
            .cache
            .get(&cache_key(code))
            .await?
            .ok_or(TrackingError::InvalidOrExpired)?;

        let (user_offer_id, timestamp) = record
            .split_once('|')
            .ok_or(TrackingError::InvalidOrExpired)?;
        let user_offer_id =
            Uuid::parse_str(user_offer_id).map_err(|_| TrackingError::InvalidOrExpired)?;
        let timestamp: i64 = timestamp
            .parse()
            .map_err(|_| TrackingError::InvalidOrExpired)?;

        if now.timestamp() - timestamp > max_age.num_seconds() {
            return Err(TrackingError::InvalidOrExpired);
        }

        Ok(user_offer_id)
    }
}
