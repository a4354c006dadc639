// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::connection::ConnectionSettings;
use crate::handler::MessageHandler;
use crate::hub::HubHandle;
use crate::session::SessionService;

/// Shared gateway state passed to all handlers via axum `State` extractor.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub hub: HubHandle,
    pub sessions: SessionService,
    /// Application hook for decoded inbound messages.
    pub handler: Arc<dyn MessageHandler>,
    pub shutdown: CancellationToken,
}

impl GatewayState {
    pub fn new(
        config: GatewayConfig,
        hub: HubHandle,
        sessions: SessionService,
        handler: Arc<dyn MessageHandler>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { config, hub, sessions, handler, shutdown }
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        self.config.connection_settings()
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
