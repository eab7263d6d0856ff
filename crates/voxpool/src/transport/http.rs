// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the pooling proxy.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::credential::RefreshStatus;
use crate::error::ProxyError;
use crate::proxy::SpeechRequest;
use crate::selector::EndpointStats;
use crate::state::AppState;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub endpoint_count: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub message: String,
    pub token_count: usize,
    pub new_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStatusResponse {
    pub message: String,
    pub last_refresh: RefreshStatus,
}

#[derive(Debug, Serialize)]
pub struct EndpointsResponse {
    pub endpoints: Vec<EndpointStats>,
    pub fallback_count: u64,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse { status: "running".to_owned(), endpoint_count: s.selector.len() })
}

/// `GET /v1/audio/speech?text=..&voice=..&speed=..`
pub async fn speech_query(
    State(s): State<Arc<AppState>>,
    query: Result<Query<SpeechRequest>, QueryRejection>,
) -> Result<Response, ProxyError> {
    let Query(req) = query.map_err(|e| ProxyError::BadRequest(format!("invalid query: {e}")))?;
    s.forwarder.forward(req).await
}

/// `POST /v1/audio/speech` with a JSON body.
pub async fn speech_json(
    State(s): State<Arc<AppState>>,
    body: Result<Json<SpeechRequest>, JsonRejection>,
) -> Result<Response, ProxyError> {
    let Json(req) = body.map_err(|e| ProxyError::BadRequest(format!("invalid body: {e}")))?;
    s.forwarder.forward(req).await
}

/// `POST /v1/token`: mint a credential from a prior one and pool it.
///
/// The prior credential comes from the `token` header or a JSON `{token}` body.
pub async fn submit_token(
    State(s): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TokenResponse>, ProxyError> {
    let from_header = headers.get("token").and_then(|v| v.to_str().ok()).map(str::to_owned);
    let prior = match from_header {
        Some(token) => Some(token),
        None if body.is_empty() => None,
        None => {
            serde_json::from_slice::<TokenRequest>(&body)
                .map_err(|e| ProxyError::BadRequest(format!("invalid request body: {e}")))?
                .token
        }
    };
    let Some(prior) = prior.map(|t| t.trim().to_owned()).filter(|t| !t.is_empty()) else {
        return Err(ProxyError::BadRequest("Token is required".to_owned()));
    };

    let submitted = s.pool.submit(&prior).await?;
    Ok(Json(TokenResponse {
        message: "token stored".to_owned(),
        token_count: submitted.count,
        new_token: submitted.token,
    }))
}

/// `POST /v1/token/refresh`: renew every pooled credential.
pub async fn refresh_tokens(
    State(s): State<Arc<AppState>>,
) -> Result<Json<RefreshStatus>, ProxyError> {
    let status = s.pool.refresh_all().await.map_err(|e| {
        tracing::error!(err = %e, "bulk refresh failed");
        ProxyError::from(e)
    })?;
    Ok(Json(status))
}

/// `GET /v1/refresh-status`
pub async fn refresh_status(
    State(s): State<Arc<AppState>>,
) -> Result<Json<RefreshStatusResponse>, ProxyError> {
    match s.pool.get_refresh_status().await? {
        Some(last_refresh) => Ok(Json(RefreshStatusResponse {
            message: "Last refresh status retrieved successfully".to_owned(),
            last_refresh,
        })),
        None => Err(ProxyError::NotFound("No refresh status found".to_owned())),
    }
}

/// `GET /v1/endpoints`: per-endpoint latency and weight.
pub async fn endpoints(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    Json(EndpointsResponse {
        endpoints: s.selector.stats(),
        fallback_count: s.selector.fallback_count(),
    })
}
