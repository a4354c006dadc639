// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatch handlers for decoded inbound envelopes.

use serde_json::json;

use crate::connection::ConnectionInfo;
use crate::hub::HubHandle;
use crate::message::{ClientMessage, MessageType, ServerMessage};

/// Application hook invoked for every decoded inbound message.
///
/// Runs synchronously on the connection's read pump: a slow handler delays
/// further reads from that connection only. Object-safe for use as
/// `Arc<dyn MessageHandler>`.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, conn: &ConnectionInfo, msg: ClientMessage);
}

impl<F> MessageHandler for F
where
    F: Fn(&ConnectionInfo, ClientMessage) + Send + Sync + 'static,
{
    fn handle(&self, conn: &ConnectionInfo, msg: ClientMessage) {
        self(conn, msg)
    }
}

/// Default handler: relays chat traffic through the hub.
///
/// The claimed `author` is replaced with the authenticated user id. Relayed
/// content is wrapped as `{"author": <user>, "content": <original>}`. Pongs
/// and error replies go back to the originating connection only.
pub struct RelayHandler {
    hub: HubHandle,
}

impl RelayHandler {
    pub fn new(hub: HubHandle) -> Self {
        Self { hub }
    }

    /// Reply on the originating connection only.
    fn reply(&self, conn: &ConnectionInfo, kind: MessageType, content: serde_json::Value) {
        let reply = ServerMessage::to_user(kind, content, conn.user_id.clone());
        if let Err(e) = self.hub.deliver_to(conn.id, reply) {
            tracing::debug!(conn_id = %conn.id, %kind, err = %e, "reply not sent");
        }
    }

    fn reply_error(&self, conn: &ConnectionInfo, message: &str) {
        self.reply(conn, MessageType::Error, json!({ "message": message }));
    }
}

impl MessageHandler for RelayHandler {
    fn handle(&self, conn: &ConnectionInfo, msg: ClientMessage) {
        if !msg.author.is_empty() && msg.author != conn.user_id {
            tracing::debug!(
                conn_id = %conn.id,
                user_id = %conn.user_id,
                claimed = %msg.author,
                "ignoring claimed author"
            );
        }

        let outbound = match msg.kind {
            MessageType::Chat
            | MessageType::Typing
            | MessageType::StopTyping
            | MessageType::Presence
            | MessageType::Read => ServerMessage::broadcast(
                msg.kind,
                json!({ "author": conn.user_id, "content": msg.content }),
            ),
            MessageType::Direct => {
                let recipient = msg.content.get("to").and_then(|v| v.as_str());
                let Some(to) = recipient.filter(|s| !s.is_empty()).map(str::to_owned) else {
                    self.reply_error(conn, "direct message requires a recipient");
                    return;
                };
                ServerMessage::to_user(
                    MessageType::Direct,
                    json!({ "author": conn.user_id, "content": msg.content }),
                    to,
                )
            }
            MessageType::Ping => {
                self.reply(conn, MessageType::Pong, msg.content);
                return;
            }
            MessageType::Pong | MessageType::Notification | MessageType::Error => {
                self.reply_error(conn, &format!("{} is not accepted from clients", msg.kind));
                return;
            }
        };

        if let Err(e) = self.hub.deliver(outbound) {
            tracing::debug!(conn_id = %conn.id, kind = %msg.kind, err = %e, "message not relayed");
        }
    }
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
