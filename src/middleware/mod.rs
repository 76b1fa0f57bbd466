//! Middleware for the tracking API
//!
//! Request tracing with hashed client addresses, API-key resolution,
//! admin/webhook guards and cache-backed postback rate limiting.

pub mod auth;
mod client_ip;
mod rate_limiter;
mod tracing;

pub use auth::{api_key_auth, hash_api_key, verify_webhook_secret, AdminToken, AuthContext};
pub use client_ip::{resolve_client_ip, ClientIp};
pub use rate_limiter::{postback_rate_limit, RateLimiter, API_KEY_POSTBACKS_PER_MIN};
pub use self::tracing::request_tracing;
