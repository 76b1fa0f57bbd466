//! Conversion review (admin)

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditEvent, Severity};
use crate::error::ApiError;
use crate::middleware::AdminToken;
use crate::models::{ApiResponse, Conversion, ConversionFilter};
use crate::store::Store;

const LIST_LIMIT: i64 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

pub async fn list_conversions(
    _admin: AdminToken,
    State(store): State<Arc<dyn Store>>,
    Query(filter): Query<ConversionFilter>,
) -> Result<Json<ApiResponse<Vec<Conversion>>>, ApiError> {
    let conversions = store.list_conversions(&filter, LIST_LIMIT).await?;
    Ok(Json(ApiResponse::ok(conversions)))
}

pub async fn approve_conversion(
    _admin: AdminToken,
    State(store): State<Arc<dyn Store>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Conversion>>, ApiError> {
    let conversion = store.approve_conversion(id, Utc::now()).await?;

    AuditEvent::new("conversion_approved", "approve")
        .resource(id.to_string())
        .success(true)
        .details(json!({ "commission": conversion.commission }))
        .emit(Severity::Info);

    Ok(Json(ApiResponse::ok(conversion)))
}

pub async fn reject_conversion(
    _admin: AdminToken,
    State(store): State<Arc<dyn Store>>,
    Path(id): Path<Uuid>,
    body: Option<Json<RejectRequest>>,
) -> Result<Json<ApiResponse<Conversion>>, ApiError> {
    let reason = body.and_then(|Json(req)| req.reason);
    let conversion = store.reject_conversion(id, reason.clone()).await?;

    AuditEvent::new("conversion_rejected", "reject")
        .resource(id.to_string())
        .success(true)
        .details(json!({ "reason": reason }))
        .emit(Severity::Info);

    Ok(Json(ApiResponse::ok(conversion)))
}
