// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for gateway introspection.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::error::GatewayError;
use crate::state::GatewayState;

// -- Response types -----------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub connection_count: usize,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<GatewayState>>) -> impl IntoResponse {
    match s.hub.stats().await {
        Ok(stats) => Json(HealthResponse {
            status: "running".to_owned(),
            connection_count: stats.connections,
        })
        .into_response(),
        Err(e) => GatewayError::Unavailable.to_http_response(e.to_string()).into_response(),
    }
}

/// `GET /api/v1/stats`: hub registry size and delivery counters.
pub async fn stats(State(s): State<Arc<GatewayState>>) -> impl IntoResponse {
    match s.hub.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => GatewayError::Unavailable.to_http_response(e.to_string()).into_response(),
    }
}

/// `GET /api/v1/sessions/{id}`: presence lookup for one session.
pub async fn get_session(
    State(s): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match s.sessions.find(&id).await {
        Ok(Some(session)) => Json(session).into_response(),
        Ok(None) => GatewayError::NotFound.to_http_response("session not found").into_response(),
        Err(code) => code.to_http_response("session lookup failed").into_response(),
    }
}
