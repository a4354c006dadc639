// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use crate::connection::ConnectionSettings;

/// Configuration for the chat gateway.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "chatgate", about = "Real-time connection gateway for chat clients")]
pub struct GatewayConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "CHATGATE_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9700, env = "CHATGATE_PORT")]
    pub port: u16,

    /// Shared secret required on upgrade and API requests. If unset, auth is disabled.
    #[arg(long, env = "CHATGATE_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Outbound queue capacity per connection.
    #[arg(long, default_value_t = 256, env = "CHATGATE_QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    /// Read deadline in milliseconds. Extended by every inbound frame.
    #[arg(long, default_value_t = 60_000, env = "CHATGATE_PONG_WAIT_MS")]
    pub pong_wait_ms: u64,

    /// Keepalive ping period in milliseconds. Must be shorter than the read deadline.
    #[arg(long, default_value_t = 30_000, env = "CHATGATE_PING_PERIOD_MS")]
    pub ping_period_ms: u64,

    /// Write deadline in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "CHATGATE_WRITE_WAIT_MS")]
    pub write_wait_ms: u64,

    /// Capacity of the hub's dispatch channel. Deliveries beyond it are refused.
    #[arg(long, default_value_t = 4096, env = "CHATGATE_DISPATCH_CAPACITY")]
    pub dispatch_capacity: usize,

    /// Maximum inbound frame size in bytes.
    #[arg(long, default_value_t = 64 * 1024, env = "CHATGATE_MAX_MESSAGE_BYTES")]
    pub max_message_bytes: usize,
}

impl GatewayConfig {
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    /// Reject settings that would make healthy peers time out.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue_capacity == 0 {
            anyhow::bail!("queue capacity must be at least 1");
        }
        if self.dispatch_capacity == 0 {
            anyhow::bail!("dispatch capacity must be at least 1");
        }
        if self.ping_period_ms == 0 || self.ping_period_ms >= self.pong_wait_ms {
            anyhow::bail!(
                "ping period ({}ms) must be non-zero and shorter than the read deadline ({}ms)",
                self.ping_period_ms,
                self.pong_wait_ms
            );
        }
        Ok(())
    }

    /// Per-connection timing and buffer settings.
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            queue_capacity: self.queue_capacity,
            pong_wait: self.pong_wait(),
            ping_period: self.ping_period(),
            write_wait: self.write_wait(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 9700,
            auth_token: None,
            queue_capacity: 256,
            pong_wait_ms: 60_000,
            ping_period_ms: 30_000,
            write_wait_ms: 10_000,
            dispatch_capacity: crate::hub::DEFAULT_DISPATCH_CAPACITY,
            max_message_bytes: 64 * 1024,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
