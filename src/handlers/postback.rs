//! Postback endpoint

use axum::{
    extract::{FromRequest, Query, Request, State},
    http::header,
    Form, Json,
};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::{ApiError, ApiResult};
use crate::middleware::{AuthContext, ClientIp};
use crate::postback::{PostbackRequest, PostbackResponse};
use crate::state::AppState;

/// Collect postback fields from the query string and a JSON or form body.
/// Body fields override query fields of the same name.
async fn collect_fields(app_state: &AppState, request: Request) -> ApiResult<Map<String, Value>> {
    let mut fields: Map<String, Value> =
        Query::<HashMap<String, String>>::try_from_uri(request.uri())
            .map(|Query(query)| {
                query
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect()
            })
            .map_err(|e| ApiError::BadRequest(format!("Invalid query string: {}", e)))?;

    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("application/json") {
        let Json(body) = Json::<Value>::from_request(request, app_state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        match body {
            Value::Object(map) => fields.extend(map),
            Value::Null => {}
            _ => {
                return Err(ApiError::BadRequest(
                    "Postback body must be a JSON object".to_string(),
                ))
            }
        }
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(body) = Form::<HashMap<String, String>>::from_request(request, app_state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        fields.extend(body.into_iter().map(|(k, v)| (k, Value::String(v))));
    }

    Ok(fields)
}

/// `POST|GET /api/postback`
pub async fn receive_postback(
    State(app_state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    auth: AuthContext,
    request: Request,
) -> ApiResult<Json<PostbackResponse>> {
    let fields = collect_fields(&app_state, request).await?;
    let raw = Value::Object(fields);
    let postback: PostbackRequest = serde_json::from_value(raw.clone())
        .map_err(|e| ApiError::ValidationError(e.to_string()))?;

    let ip_hash = app_state.signer.hash_ip(&client_ip);
    let outcome = app_state
        .postbacks
        .process(&postback, raw, &auth, &ip_hash, Utc::now())
        .await?;

    let message = if outcome.duplicate {
        "Conversion already recorded".to_string()
    } else {
        "Conversion recorded".to_string()
    };

    Ok(Json(PostbackResponse {
        success: true,
        message,
        duplicate: outcome.duplicate,
        conversion: outcome.conversion,
    }))
}
