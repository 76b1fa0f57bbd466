//! Route definitions for the tracking API

mod admin;
mod click;
mod postback;

use axum::{middleware::from_fn_with_state, routing::get, Router};

use crate::handlers::health_check;
use crate::middleware::{api_key_auth, request_tracing};
use crate::state::AppState;

pub use admin::admin_routes;
pub use click::click_routes;
pub use postback::postback_routes;

/// Full application router. CORS is left to the binary.
pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(click_routes())
        .merge(postback_routes(app_state.clone()))
        .merge(admin_routes())
        .layer(from_fn_with_state(app_state.clone(), api_key_auth))
        .layer(from_fn_with_state(app_state.clone(), request_tracing))
        .with_state(app_state)
}
