//! Fast key-value store for locks, counters and short-lived lookups
//!
//! Every write is TTL-bounded. The [`Cache`] trait is the seam the pipeline
//! talks to; [`MemoryCache`] is the in-process implementation.

mod memory;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryCache;

/// Cache errors
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache value for '{0}' is not an integer")]
    NotAnInteger(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

#[async_trait]
pub trait Cache: Send + Sync {
    /// Read a live value
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Unconditionally write a value
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Write only if no live value exists. Returns `true` when this call wrote it.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;

    /// Whether a live value exists
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Increment a counter, creating it with `ttl` when absent. Returns the new value.
    ///
    /// The TTL is only applied on creation, so counters behave as fixed windows.
    async fn incr(&self, key: &str, ttl: Duration) -> CacheResult<i64>;
}
