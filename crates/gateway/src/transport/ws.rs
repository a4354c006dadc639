// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket upgrade endpoint.

use std::sync::Arc;

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::connection::{self, ConnectionId, ConnectionInfo};
use crate::error::GatewayError;
use crate::state::GatewayState;
use crate::transport::auth;

/// Query parameters for the WS upgrade.
#[derive(Debug, Clone, Deserialize)]
pub struct WsQuery {
    /// Authenticated user id of the connecting client.
    #[serde(default)]
    pub user: String,
    pub token: Option<String>,
}

/// `GET /ws`: upgrade to a gateway connection.
///
/// The session is recorded before the connection joins the hub; if that
/// fails the upgrade is rejected. The session is removed once the
/// connection ends.
pub async fn ws_handler(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if state.shutdown.is_cancelled() {
        return GatewayError::Unavailable.to_http_response("shutting down").into_response();
    }

    let expected = state.config.auth_token.as_deref();
    let authed = match query.token.as_deref() {
        Some(token) => auth::validate_token(token, expected),
        None => auth::validate_bearer(&headers, expected),
    };
    if let Err(code) = authed {
        return code.to_http_response("unauthorized").into_response();
    }

    let user_id = query.user.trim();
    if user_id.is_empty() {
        return GatewayError::InvalidArgument
            .to_http_response("missing user")
            .into_response();
    }

    let conn_id = ConnectionId::new();
    let session = match state.sessions.connect(user_id, &conn_id).await {
        Ok(session) => session,
        Err(code) => {
            return code.to_http_response("failed to open session").into_response();
        }
    };

    let info = ConnectionInfo {
        id: conn_id,
        user_id: user_id.to_owned(),
        session_id: Some(session.id.clone()),
    };

    let failed_state = Arc::clone(&state);
    let failed_session = session.id.clone();
    ws.max_message_size(state.config.max_message_bytes)
        .on_failed_upgrade(move |e| {
            tracing::debug!(session_id = %failed_session, err = %e, "websocket upgrade failed");
            tokio::spawn(async move {
                let _ = failed_state.sessions.disconnect(&failed_session).await;
            });
        })
        .on_upgrade(move |socket| async move {
            connection::serve(
                socket,
                info,
                state.hub.clone(),
                Arc::clone(&state.handler),
                state.connection_settings(),
            )
            .await;

            if let Err(code) = state.sessions.disconnect(&session.id).await {
                tracing::warn!(session_id = %session.id, err = %code, "failed to close session");
            }
        })
        .into_response()
}
