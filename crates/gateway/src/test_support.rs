// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Builders and helpers for tests that need a running gateway.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::handler::{MessageHandler, RelayHandler};
use crate::hub::{Hub, HubHandle};
use crate::session::{MemorySessionStore, SessionService, SessionStore};
use crate::state::GatewayState;

/// Builder for [`GatewayState`] with test-friendly defaults.
pub struct GatewayStateBuilder {
    config: GatewayConfig,
    store: Option<Arc<dyn SessionStore>>,
    handler: Option<Box<dyn FnOnce(HubHandle) -> Arc<dyn MessageHandler>>>,
}

impl Default for GatewayStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayStateBuilder {
    pub fn new() -> Self {
        Self { config: GatewayConfig { port: 0, ..Default::default() }, store: None, handler: None }
    }

    pub fn auth_token(mut self, token: &str) -> Self {
        self.config.auth_token = Some(token.to_owned());
        self
    }

    pub fn config(mut self, f: impl FnOnce(&mut GatewayConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Install a custom dispatch handler built from the hub handle.
    pub fn handler(
        mut self,
        make: impl FnOnce(HubHandle) -> Arc<dyn MessageHandler> + 'static,
    ) -> Self {
        self.handler = Some(Box::new(make));
        self
    }

    /// Spawn the hub and assemble the state. Must be called inside a runtime.
    pub fn build(self) -> Arc<GatewayState> {
        let (hub, _task) = Hub::spawn_with_capacity(self.config.dispatch_capacity);
        let store = self.store.unwrap_or_else(|| Arc::new(MemorySessionStore::new()));
        let handler = match self.handler {
            Some(make) => make(hub.clone()),
            None => Arc::new(RelayHandler::new(hub.clone())),
        };
        Arc::new(GatewayState::new(
            self.config,
            hub,
            SessionService::new(store),
            handler,
            CancellationToken::new(),
        ))
    }
}

/// Spawn an HTTP server on a random port for integration testing.
///
/// Returns the bound address and a join handle for the server task.
pub async fn spawn_http_server(
    state: Arc<GatewayState>,
) -> anyhow::Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>)> {
    let router = crate::transport::build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok((addr, handle))
}
