// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chatgate: real-time connection gateway for chat clients.
//!
//! Accepts WebSocket connections, keeps a live registry of them in a single
//! hub task, decodes inbound envelopes for a pluggable handler, and fans
//! outbound envelopes out to everyone or to one user's connections.

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod hub;
pub mod message;
pub mod session;
pub mod state;
pub mod test_support;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::handler::{MessageHandler, RelayHandler};
use crate::hub::Hub;
use crate::session::{MemorySessionStore, SessionService};
use crate::state::GatewayState;
use crate::transport::build_router;

/// Run the gateway until shutdown (Ctrl-C).
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    config.validate()?;
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let (hub, hub_task) = Hub::spawn_with_capacity(config.dispatch_capacity);
    let sessions = SessionService::new(Arc::new(MemorySessionStore::new()));
    let handler: Arc<dyn MessageHandler> = Arc::new(RelayHandler::new(hub.clone()));
    let state =
        Arc::new(GatewayState::new(config, hub.clone(), sessions, handler, shutdown.clone()));

    // Ctrl-C cancels the shutdown token.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                shutdown.cancel();
            }
        });
    }

    // Upgraded sockets outlive the HTTP server's graceful shutdown, so the
    // hub sweep is what closes them.
    {
        let shutdown = shutdown.clone();
        let hub = hub.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            hub.shutdown();
        });
    }

    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("chatgate listening on {addr}");
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    hub.shutdown();
    hub_task.await?;
    Ok(())
}
