// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-socket connection actor.
//!
//! Each connection runs a read pump (on the calling task) and a write pump
//! (spawned) around one bounded outbound queue. Teardown always flows the
//! same way: the read pump exits, the connection is unregistered, the hub
//! drops the queue sender, and the write pump sends a close frame and exits.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::handler::MessageHandler;
use crate::hub::{ConnectionEntry, HubHandle, Outbound};
use crate::message::{decode_client, encode_server, DecodeError};

/// Opaque identifier of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// The zero identity. Never assigned to a live connection.
    pub fn nil() -> Self {
        Self(uuid::Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Connection-scoped identity handed to the dispatch handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub user_id: String,
    pub session_id: Option<String>,
}

impl ConnectionInfo {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self { id: ConnectionId::new(), user_id: user_id.into(), session_id: None }
    }
}

/// Timing and buffer settings shared by every connection.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub queue_capacity: usize,
    /// Read deadline; extended by every inbound frame.
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub write_wait: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(30),
            write_wait: Duration::from_secs(10),
        }
    }
}

/// Run a connection to completion.
///
/// Registers with the hub, spawns the write pump, and drives the read pump on
/// the current task. Returns once both pumps have exited.
pub async fn serve<S, E>(
    socket: S,
    info: ConnectionInfo,
    hub: HubHandle,
    handler: Arc<dyn MessageHandler>,
    settings: ConnectionSettings,
) where
    S: Stream<Item = Result<Message, E>> + Sink<Message> + Send + 'static,
    <S as Sink<Message>>::Error: fmt::Display + Send,
    E: StdError + Send + Sync + 'static,
{
    let (queue_tx, queue_rx) = mpsc::channel(settings.queue_capacity.max(1));
    let (sink, stream) = socket.split();
    let closed = CancellationToken::new();

    // Registration completes before either pump starts, so the unregister
    // below always finds the entry.
    if hub.register(ConnectionEntry::new(info.id, info.user_id.clone(), queue_tx)).await.is_err() {
        tracing::warn!(conn_id = %info.id, user_id = %info.user_id, "hub stopped, refusing connection");
        return;
    }
    tracing::debug!(conn_id = %info.id, user_id = %info.user_id, "connection opened");

    let writer = tokio::spawn(write_pump(sink, queue_rx, settings.clone(), closed.clone(), info.id));

    read_pump(stream, &info, handler.as_ref(), settings.pong_wait, &closed).await;

    // Unregistering closes the queue, which releases the write pump. If the
    // hub is gone its registry (and every queue sender) is already dropped.
    let _ = hub.unregister(info.id);
    if let Err(e) = writer.await {
        tracing::warn!(conn_id = %info.id, err = %e, "write pump panicked");
    }
    tracing::debug!(conn_id = %info.id, user_id = %info.user_id, "connection closed");
}

/// Read inbound frames until the transport fails, closes, or goes quiet for
/// longer than `pong_wait`.
async fn read_pump<St, E>(
    mut stream: St,
    info: &ConnectionInfo,
    handler: &dyn MessageHandler,
    pong_wait: Duration,
    closed: &CancellationToken,
) where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: StdError + 'static,
{
    loop {
        let next = tokio::select! {
            _ = closed.cancelled() => break,
            next = timeout(pong_wait, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => {
                tracing::debug!(conn_id = %info.id, "read deadline exceeded");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                if is_expected_close(&e) {
                    tracing::trace!(conn_id = %info.id, err = %e, "transport closed");
                } else {
                    tracing::warn!(conn_id = %info.id, err = %e, "transport read failed");
                }
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => match decode_client(&text) {
                Ok(msg) => handler.handle(info, msg),
                Err(e) => {
                    tracing::debug!(conn_id = %info.id, err = %e, "dropping undecodable frame");
                }
            },
            Message::Binary(_) => {
                tracing::debug!(conn_id = %info.id, err = %DecodeError::Binary, "dropping frame");
            }
            // Control frames only extend the read deadline.
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => break,
        }
    }
}

/// Drain the outbound queue to the transport and emit keepalive pings.
async fn write_pump<Si>(
    mut sink: Si,
    mut queue: mpsc::Receiver<Outbound>,
    settings: ConnectionSettings,
    closed: CancellationToken,
    conn_id: ConnectionId,
) where
    Si: Sink<Message> + Unpin,
    Si::Error: fmt::Display + Send,
{
    let mut ping =
        tokio::time::interval_at(Instant::now() + settings.ping_period, settings.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            msg = queue.recv() => match msg {
                Some(msg) => match encode_server(&msg) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(%conn_id, err = %e, "failed to encode outbound message");
                        continue;
                    }
                },
                None => {
                    let _ = timeout(settings.write_wait, sink.send(Message::Close(None))).await;
                    break;
                }
            },
            _ = ping.tick() => Message::Ping(Default::default()),
        };

        match timeout(settings.write_wait, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(%conn_id, err = %e, "transport write failed");
                break;
            }
            Err(_) => {
                tracing::debug!(%conn_id, "write deadline exceeded");
                break;
            }
        }
    }

    // Closing the transport half also releases a read pump blocked on a
    // silent peer.
    closed.cancel();
    let _ = timeout(settings.write_wait, sink.close()).await;
}

/// Whether a read error is an ordinary peer disconnect rather than a fault.
///
/// A clean close arrives as `Message::Close` or end of stream and never
/// reaches here; this only recognises abrupt socket teardown.
fn is_expected_close(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            use std::io::ErrorKind::*;
            return matches!(
                io.kind(),
                ConnectionReset | ConnectionAborted | BrokenPipe | UnexpectedEof
            );
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
