// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire envelopes for the gateway protocol.
//!
//! Inbound frames decode into [`ClientMessage`], outbound frames encode from
//! [`ServerMessage`]. Only the envelope is validated here; `content` is opaque
//! JSON interpreted by the dispatch handler.

use std::fmt;

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

/// Closed set of envelope type tags. Encoded on the wire as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageType {
    /// A chat message posted to a channel.
    Chat,
    /// The author started typing.
    Typing,
    /// The author stopped typing.
    StopTyping,
    /// Online/away/offline status change.
    Presence,
    /// A message addressed to a single user.
    Direct,
    /// Read receipt.
    Read,
    /// Application-level liveness probe from the client.
    Ping,
    /// Reply to [`MessageType::Ping`].
    Pong,
    /// Server-originated notification.
    Notification,
    /// Server-originated error report.
    Error,
}

impl MessageType {
    pub const ALL: [MessageType; 10] = [
        Self::Chat,
        Self::Typing,
        Self::StopTyping,
        Self::Presence,
        Self::Direct,
        Self::Read,
        Self::Ping,
        Self::Pong,
        Self::Notification,
        Self::Error,
    ];

    pub fn code(self) -> u8 {
        match self {
            Self::Chat => 1,
            Self::Typing => 2,
            Self::StopTyping => 3,
            Self::Presence => 4,
            Self::Direct => 5,
            Self::Read => 6,
            Self::Ping => 7,
            Self::Pong => 8,
            Self::Notification => 9,
            Self::Error => 10,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Typing => "typing",
            Self::StopTyping => "stop_typing",
            Self::Presence => "presence",
            Self::Direct => "direct",
            Self::Read => "read",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Notification => "notification",
            Self::Error => "error",
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = UnknownMessageType;

    fn try_from(code: u8) -> Result<Self, UnknownMessageType> {
        Self::ALL.into_iter().find(|t| t.code() == code).ok_or(UnknownMessageType(code))
    }
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> u8 {
        t.code()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Integer tag outside the [`MessageType`] set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownMessageType(pub u8);

impl fmt::Display for UnknownMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown message type {}", self.0)
    }
}

/// Inbound envelope. Untrusted: `author` is whatever the client claimed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub author: String,
}

/// Outbound envelope. `to: None` broadcasts to every registered connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl ServerMessage {
    /// Message for every registered connection.
    pub fn broadcast(kind: MessageType, content: serde_json::Value) -> Self {
        Self { kind, content, to: None }
    }

    /// Message for the connections owned by `user_id` only.
    pub fn to_user(kind: MessageType, content: serde_json::Value, user_id: impl Into<String>) -> Self {
        Self { kind, content, to: Some(user_id.into()) }
    }

    /// Recipient identity, treating an empty string the same as absent.
    pub fn recipient(&self) -> Option<&str> {
        self.to.as_deref().filter(|to| !to.is_empty())
    }
}

/// Why an inbound frame could not be decoded.
#[derive(Debug)]
pub enum DecodeError {
    /// Binary frames are not part of the protocol.
    Binary,
    /// Text frame that is not a valid envelope.
    Json(serde_json::Error),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary => f.write_str("binary frames are not supported"),
            Self::Json(e) => write!(f, "invalid envelope: {e}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decode the text of an inbound frame.
pub fn decode_client(text: &str) -> Result<ClientMessage, DecodeError> {
    serde_json::from_str(text).map_err(DecodeError::Json)
}

/// Encode an outbound envelope as a WebSocket text frame.
pub fn encode_server(msg: &ServerMessage) -> Result<Message, serde_json::Error> {
    let json = serde_json::to_string(msg)?;
    Ok(Message::Text(json.into()))
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
