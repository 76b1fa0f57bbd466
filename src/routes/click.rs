//! Short-link routes

use axum::{routing::get, Router};

use crate::handlers::*;
use crate::state::AppState;

pub fn click_routes() -> Router<AppState> {
    Router::new()
        .route("/r", get(redirect_query))
        .route("/r/:code", get(redirect_tracking_code))
}
