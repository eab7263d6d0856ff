// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport for the pooling proxy.

pub mod http;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the axum `Router` with all proxy routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health
        .route("/api/v1/health", get(http::health))
        // Synthesis
        .route("/v1/audio/speech", get(http::speech_query).post(http::speech_json))
        // Credential pool
        .route("/v1/token", post(http::submit_token))
        .route("/v1/token/refresh", post(http::refresh_tokens))
        .route("/v1/refresh-status", get(http::refresh_status))
        // Endpoint stats
        .route("/v1/endpoints", get(http::endpoints))
        // Middleware
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()))
        .with_state(state)
}
