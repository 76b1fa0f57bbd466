//! Enrollment links, promoter summaries and KYC provider callbacks

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::audit::{AuditEvent, Severity};
use crate::error::ApiError;
use crate::middleware::{verify_webhook_secret, AdminToken};
use crate::models::{ApiResponse, UserSummary};
use crate::state::AppState;
use crate::tracking::TrackingError;

#[derive(Debug, Serialize)]
pub struct TrackingLinkResponse {
    pub user_offer_id: Uuid,
    pub tracking_code: String,
    pub short_link: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct KycWebhookRequest {
    pub user_id: Uuid,
    /// `verified` or `rejected`
    pub status: String,
    #[validate(length(min = 1, max = 200))]
    pub provider_ref: String,
}

/// Mint a tracking code for an enrollment and store its short link
pub async fn create_tracking_link(
    _admin: AdminToken,
    State(app_state): State<AppState>,
    Path(user_offer_id): Path<Uuid>,
) -> Result<Json<ApiResponse<TrackingLinkResponse>>, ApiError> {
    if app_state.store.get_enrollment(user_offer_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("User offer {}", user_offer_id)));
    }

    let tracking_code = app_state
        .tracking
        .mint(user_offer_id, Utc::now())
        .await
        .map_err(|e| match e {
            TrackingError::Cache(e) => ApiError::from(e),
            other => ApiError::InternalError(other.to_string()),
        })?;

    let short_link = format!(
        "{}/{}",
        app_state.config.short_link_base_url.trim_end_matches('/'),
        tracking_code
    );

    app_state
        .store
        .set_tracking_link(user_offer_id, &tracking_code, &short_link)
        .await?;

    tracing::info!(%user_offer_id, "Tracking link minted");

    Ok(Json(ApiResponse::ok(TrackingLinkResponse {
        user_offer_id,
        tracking_code,
        short_link,
    })))
}

pub async fn get_user_summary(
    _admin: AdminToken,
    State(app_state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiResponse<UserSummary>>, ApiError> {
    let user = app_state
        .store
        .get_user(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {}", user_id)))?;

    Ok(Json(ApiResponse::ok(UserSummary::from(user))))
}

/// KYC provider verdict
pub async fn kyc_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<KycWebhookRequest>,
) -> Result<Json<ApiResponse<UserSummary>>, ApiError> {
    verify_webhook_secret(&app_state.config, &headers)?;
    request.validate()?;

    let verified = match request.status.trim().to_lowercase().as_str() {
        "verified" => true,
        "rejected" => false,
        other => {
            return Err(ApiError::ValidationError(format!(
                "status must be verified or rejected (got '{}')",
                other
            )))
        }
    };

    let user = app_state
        .store
        .record_kyc_decision(request.user_id, verified, &request.provider_ref, Utc::now())
        .await?;

    AuditEvent::new("kyc_decision", "kyc_webhook")
        .resource(request.user_id.to_string())
        .success(verified)
        .details(json!({ "status": user.kyc_status.as_str() }))
        .emit(Severity::Info);

    Ok(Json(ApiResponse::ok(UserSummary::from(user))))
}
