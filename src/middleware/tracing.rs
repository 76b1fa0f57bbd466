//! Request tracing middleware

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;

use super::client_ip::resolve_client_ip;
use crate::state::AppState;

/// Middleware for logging request information with timing.
///
/// Only the keyed hash of the client address is logged.
pub async fn request_tracing(
    State(app_state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip_hash = app_state
        .signer
        .hash_ip(&resolve_client_ip(request.headers(), peer));

    let start = Instant::now();

    tracing::debug!(
        method = %method,
        path = %path,
        ip_hash = %ip_hash,
        "Request started"
    );

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    if status.is_server_error() {
        tracing::error!(
            method = %method,
            path = %path,
            ip_hash = %ip_hash,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Request completed with error"
        );
    } else if status.is_client_error() {
        tracing::warn!(
            method = %method,
            path = %path,
            ip_hash = %ip_hash,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        tracing::info!(
            method = %method,
            path = %path,
            ip_hash = %ip_hash,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Request completed"
        );
    }

    response
}
