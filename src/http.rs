// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The fulfillment HTTP surface: a thin `axum` wrapper
//! around [`crate::fulfillment::FulfillmentHandler`]. Bearer auth resolves
//! through the same [`UserDirectory`] the gateway connections authenticate
//! against.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::fulfillment::FulfillmentRequest;
use crate::state::BridgeState;

pub fn build_router(state: Arc<BridgeState>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/fulfillment", post(fulfillment))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn fulfillment(
    State(state): State<Arc<BridgeState>>,
    headers: HeaderMap,
    Json(request): Json<FulfillmentRequest>,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let Some(user_id) = state.directory.resolve_token(token).await else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let body = state.fulfillment.handle(&user_id, request).await;
    Json(body).into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers.get("authorization")?.to_str().ok()?.strip_prefix("Bearer ")
}
