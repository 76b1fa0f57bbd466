//! Postback routes

use axum::{middleware::from_fn_with_state, routing::get, Router};

use crate::handlers::*;
use crate::middleware::postback_rate_limit;
use crate::state::AppState;

pub fn postback_routes(app_state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/api/postback",
            get(receive_postback).post(receive_postback),
        )
        .route_layer(from_fn_with_state(app_state, postback_rate_limit))
}
