//! Authentication middleware
//!
//! API-key resolution for advertiser integrations, bearer-token checks for
//! admin actions, and the shared-secret check for provider webhooks.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::error::ApiError;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "X-API-Key";
pub const WEBHOOK_SECRET_HEADER: &str = "X-Webhook-Secret";

/// Who is calling, as seen by downstream handlers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    /// `"api_key"`, `"jwt"` or empty for anonymous callers
    pub auth_method: String,
    pub api_key_id: Option<Uuid>,
    pub advertiser_id: Option<Uuid>,
    /// Set by upstream session auth; API keys carry no user
    pub user_id: Option<Uuid>,
}

/// Stored form of an API key
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Compare secrets through their digests without short-circuiting
fn secrets_match(presented: &str, expected: &str) -> bool {
    let presented = Sha256::digest(presented.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    presented
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Resolve `X-API-Key` into an [`AuthContext`] request extension.
///
/// Requests without a key pass through anonymously; an unknown key is 401.
pub async fn api_key_auth(
    State(app_state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let context = match presented {
        None => AuthContext::default(),
        Some(key) => match app_state.store.find_api_key(&hash_api_key(&key)).await {
            Ok(Some(api_key)) => AuthContext {
                auth_method: "api_key".to_string(),
                api_key_id: Some(api_key.id),
                advertiser_id: api_key.advertiser_id,
                user_id: None,
            },
            Ok(None) => {
                return ApiError::Unauthorized("Invalid API key".to_string()).into_response()
            }
            Err(e) => return ApiError::from(e).into_response(),
        },
    };

    request.extensions_mut().insert(context);
    next.run(request).await
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .unwrap_or_default())
    }
}

/// Extractor guarding admin actions with the configured bearer token.
///
/// Fails closed: without a configured token every request is refused.
#[derive(Debug, Clone)]
pub struct AdminToken;

#[async_trait]
impl<S> FromRequestParts<S> for AdminToken
where
    Arc<Config>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = Arc::<Config>::from_ref(state);
        let expected = match config.admin_token.as_deref() {
            Some(token) if !token.is_empty() => token,
            _ => {
                tracing::error!("Admin token not configured - rejecting request");
                return Err(ApiError::ServiceUnavailable(
                    "Admin API is not configured".to_string(),
                ));
            }
        };

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    ApiError::Unauthorized(
                        "Authorization header with Bearer token required".to_string(),
                    )
                })?;

        if !secrets_match(bearer.token(), expected) {
            return Err(ApiError::Unauthorized("Invalid admin token".to_string()));
        }

        Ok(AdminToken)
    }
}

/// Check `X-Webhook-Secret` against the configured secret (fail closed)
pub fn verify_webhook_secret(config: &Config, headers: &HeaderMap) -> Result<(), ApiError> {
    match config.webhook_secret.as_deref() {
        Some(secret) if !secret.is_empty() => {
            let presented = headers
                .get(WEBHOOK_SECRET_HEADER)
                .and_then(|h| h.to_str().ok())
                .unwrap_or_default();

            if !secrets_match(presented, secret) {
                return Err(ApiError::Unauthorized(
                    "Unauthorized webhook request".to_string(),
                ));
            }
            Ok(())
        }
        _ => {
            tracing::error!("Webhook secret not configured - rejecting request");
            Err(ApiError::ServiceUnavailable(
                "Webhook endpoint is not configured".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_hash_api_key_is_stable_hex() {
        let hashed = hash_api_key("ak_live_123");
        assert_eq!(hashed.len(), 64);
        assert_eq!(hashed, hash_api_key("ak_live_123"));
        assert_ne!(hashed, hash_api_key("ak_live_124"));
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("s3cret", "s3cret"));
        assert!(!secrets_match("s3cre", "s3cret"));
        assert!(!secrets_match("s3cret ", "s3cret"));
        assert!(!secrets_match("", "s3cret"));
    }

    #[test]
    fn test_webhook_secret_fails_closed() {
        let config = Config::local();
        let err = verify_webhook_secret(&config, &HeaderMap::new()).unwrap_err();
        assert!(matches!(err, ApiError::ServiceUnavailable(_)));
    }

    #[test]
    fn test_webhook_secret_checked() {
        let config = Config {
            webhook_secret: Some("s3cret".to_string()),
            ..Config::local()
        };

        let mut headers = HeaderMap::new();
        headers.insert(WEBHOOK_SECRET_HEADER, HeaderValue::from_static("wrong"));
        assert!(matches!(
            verify_webhook_secret(&config, &headers),
            Err(ApiError::Unauthorized(_))
        ));

        headers.insert(WEBHOOK_SECRET_HEADER, HeaderValue::from_static("s3cret"));
        assert!(verify_webhook_secret(&config, &headers).is_ok());
    }
}
