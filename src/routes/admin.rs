//! Admin and provider routes

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/api/conversions", get(list_conversions))
        .route("/api/conversions/:id/approve", post(approve_conversion))
        .route("/api/conversions/:id/reject", post(reject_conversion))
        .route(
            "/api/user-offers/:id/tracking-code",
            post(create_tracking_link),
        )
        .route("/api/users/:id", get(get_user_summary))
        .route("/api/kyc/webhook", post(kyc_webhook))
}
