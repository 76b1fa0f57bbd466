//! Rate limiting middleware
//!
//! Counters live in the shared cache as fixed one-minute windows under
//! `ratelimit:{key}`, so every instance sharing the cache shares the limits.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::auth::AuthContext;
use super::client_ip::ClientIp;
use crate::audit::{AuditEvent, Severity};
use crate::cache::{Cache, CacheResult};
use crate::error::ApiError;
use crate::state::AppState;

/// Postback ceiling for API-key clients
pub const API_KEY_POSTBACKS_PER_MIN: u32 = 100;

const WINDOW: Duration = Duration::from_secs(60);

/// Cache-backed rate limiter
#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn Cache>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    /// Count a hit against `key`. Returns whether it is within `limit`.
    pub async fn check(&self, key: &str, limit: u32) -> CacheResult<bool> {
        let count = self
            .cache
            .incr(&format!("ratelimit:{}", key), WINDOW)
            .await?;
        Ok(count <= limit as i64)
    }
}

/// Limit postbacks per API key, or per hashed client address otherwise.
///
/// Degrades open when the cache is unavailable.
pub async fn postback_rate_limit(
    State(app_state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    request: Request,
    next: Next,
) -> Response {
    let ip_hash = app_state.signer.hash_ip(&client_ip);
    let auth = request
        .extensions()
        .get::<AuthContext>()
        .cloned()
        .unwrap_or_default();

    let (key, limit) = match auth.api_key_id {
        Some(key_id) => (format!("postback:apikey:{}", key_id), API_KEY_POSTBACKS_PER_MIN),
        None => (
            format!("postback:ip:{}", ip_hash),
            app_state.config.security.rate_limit_postback_per_min,
        ),
    };

    match app_state.rate_limiter.check(&key, limit).await {
        Ok(true) => next.run(request).await,
        Ok(false) => {
            AuditEvent::new("rate_limited", "postback")
                .ip_hash(ip_hash)
                .resource("postback")
                .details(json!({ "limit": limit, "auth_method": auth.auth_method }))
                .emit(Severity::Warn);
            ApiError::TooManyRequests.into_response()
        }
        Err(e) => {
            tracing::warn!(
                event_type = "cache_degraded",
                error = %e,
                "Postback rate limit skipped"
            );
            next.run(request).await
        }
    }
}
