use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::store::Store;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub version: String,
}

pub async fn health_check(State(store): State<Arc<dyn Store>>) -> Json<HealthResponse> {
    let database = match store.health_check().await {
        Ok(()) => "connected".to_string(),
        Err(e) => format!("error: {}", e),
    };

    let status = if database == "connected" {
        "healthy"
    } else {
        "unhealthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        database,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
