//! Short-link redirect handlers

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use axum_extra::{headers::UserAgent, TypedHeader};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::clicks::{ClickService, ClickTarget};
use crate::fraud::IngestionContext;
use crate::middleware::ClientIp;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ClickQuery {
    pub tracking_code: Option<String>,
    pub user_offer_id: Option<String>,
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
}

fn ingestion_context(
    client_ip: String,
    user_agent: Option<TypedHeader<UserAgent>>,
    headers: &HeaderMap,
) -> IngestionContext {
    IngestionContext {
        client_ip,
        user_agent: user_agent
            .map(|TypedHeader(ua)| ua.as_str().to_string())
            .unwrap_or_default(),
        accept: header_value(headers, header::ACCEPT),
        accept_language: header_value(headers, header::ACCEPT_LANGUAGE),
        accept_encoding: header_value(headers, header::ACCEPT_ENCODING),
        referer: header_value(headers, header::REFERER),
    }
}

fn found(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [
            (header::LOCATION, location.to_string()),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
    )
        .into_response()
}

/// `GET /r/:code`
pub async fn redirect_tracking_code(
    State(clicks): State<Arc<ClickService>>,
    Path(code): Path<String>,
    ClientIp(client_ip): ClientIp,
    user_agent: Option<TypedHeader<UserAgent>>,
    headers: HeaderMap,
) -> Response {
    let ctx = ingestion_context(client_ip, user_agent, &headers);
    let outcome = clicks
        .ingest(ClickTarget::TrackingCode(code), ctx, Utc::now())
        .await;
    found(&outcome.redirect_url)
}

/// `GET /r?tracking_code=...` or `GET /r?user_offer_id=...`
pub async fn redirect_query(
    State(app_state): State<AppState>,
    Query(query): Query<ClickQuery>,
    ClientIp(client_ip): ClientIp,
    user_agent: Option<TypedHeader<UserAgent>>,
    headers: HeaderMap,
) -> Response {
    let target = match (query.tracking_code, query.user_offer_id) {
        (Some(code), _) if !code.is_empty() => ClickTarget::TrackingCode(code),
        (_, Some(id)) => match Uuid::parse_str(id.trim()) {
            Ok(id) => ClickTarget::UserOffer(id),
            Err(_) => return found(&app_state.config.fallback_url),
        },
        _ => return found(&app_state.config.fallback_url),
    };

    let ctx = ingestion_context(client_ip, user_agent, &headers);
    let outcome = app_state.clicks.ingest(target, ctx, Utc::now()).await;
    found(&outcome.redirect_url)
}
