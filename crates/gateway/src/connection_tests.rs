// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::{Sink, Stream};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{is_expected_close, serve, ConnectionInfo, ConnectionSettings};
use crate::handler::MessageHandler;
use crate::hub::{Hub, HubHandle};
use crate::message::{ClientMessage, MessageType, ServerMessage};

const WAIT: Duration = Duration::from_secs(3);

/// In-memory transport: the test feeds inbound frames and observes outbound ones.
struct MockSocket {
    inbound: mpsc::UnboundedReceiver<Result<Message, io::Error>>,
    outbound: mpsc::UnboundedSender<Message>,
    fail_writes: bool,
}

impl Stream for MockSocket {
    type Item = Result<Message, io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inbound.poll_recv(cx)
    }
}

impl Sink<Message> for MockSocket {
    type Error = io::Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), io::Error> {
        let this = self.get_mut();
        if this.fail_writes {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        this.outbound.send(item).map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Test side of a running connection.
struct Harness {
    hub: HubHandle,
    peer_tx: mpsc::UnboundedSender<Result<Message, io::Error>>,
    peer_rx: mpsc::UnboundedReceiver<Message>,
    handled: mpsc::UnboundedReceiver<ClientMessage>,
    task: JoinHandle<()>,
}

fn fast_settings() -> ConnectionSettings {
    ConnectionSettings {
        queue_capacity: 16,
        pong_wait: Duration::from_secs(5),
        ping_period: Duration::from_secs(2),
        write_wait: Duration::from_secs(1),
    }
}

fn start(user: &str, settings: ConnectionSettings, fail_writes: bool) -> Harness {
    let (hub, _hub_task) = Hub::spawn();
    let (peer_tx, inbound) = mpsc::unbounded_channel();
    let (outbound, peer_rx) = mpsc::unbounded_channel();
    let (handled_tx, handled) = mpsc::unbounded_channel();

    let handler: Arc<dyn MessageHandler> = Arc::new(move |_: &ConnectionInfo, msg: ClientMessage| {
        let _ = handled_tx.send(msg);
    });
    let socket = MockSocket { inbound, outbound, fail_writes };
    let task = tokio::spawn(serve(socket, ConnectionInfo::new(user), hub.clone(), handler, settings));

    Harness { hub, peer_tx, peer_rx, handled, task }
}

fn text(s: &str) -> Result<Message, io::Error> {
    Ok(Message::Text(s.to_owned().into()))
}

async fn next_handled(h: &mut Harness) -> anyhow::Result<ClientMessage> {
    tokio::time::timeout(WAIT, h.handled.recv())
        .await
        .map_err(|_| anyhow::anyhow!("handler not invoked"))?
        .ok_or_else(|| anyhow::anyhow!("handler dropped"))
}

async fn wait_connections(hub: &HubHandle, n: usize) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + WAIT;
    while hub.stats().await?.connections != n {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("registry never reached {n} connections");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(())
}

/// Wait for the connection task to finish.
async fn finished(task: JoinHandle<()>) -> anyhow::Result<()> {
    tokio::time::timeout(WAIT, task).await.map_err(|_| anyhow::anyhow!("connection still running"))??;
    Ok(())
}

#[tokio::test]
async fn frames_reach_handler_in_order() -> anyhow::Result<()> {
    let mut h = start("alice", fast_settings(), false);

    for n in 0..3 {
        h.peer_tx.send(text(&json!({"type": 1, "content": n, "author": "alice"}).to_string()))?;
    }
    for n in 0..3 {
        let msg = next_handled(&mut h).await?;
        assert_eq!(msg.kind, MessageType::Chat);
        assert_eq!(msg.content, json!(n));
    }
    Ok(())
}

#[tokio::test]
async fn decode_failure_keeps_connection_open() -> anyhow::Result<()> {
    let mut h = start("alice", fast_settings(), false);

    h.peer_tx.send(text("not json"))?;
    h.peer_tx.send(text(r#"{"type":42}"#))?;
    h.peer_tx.send(Ok(Message::Binary(vec![1, 2, 3].into())))?;
    h.peer_tx.send(text(r#"{"type":2,"content":null,"author":"alice"}"#))?;

    let msg = next_handled(&mut h).await?;
    assert_eq!(msg.kind, MessageType::Typing);
    assert!(!h.task.is_finished());
    Ok(())
}

#[tokio::test]
async fn hub_delivery_is_written_as_text() -> anyhow::Result<()> {
    let mut h = start("alice", fast_settings(), false);
    wait_connections(&h.hub, 1).await?;

    h.hub.deliver(ServerMessage::to_user(MessageType::Notification, json!({"n": 1}), "alice"))?;
    let frame = tokio::time::timeout(WAIT, h.peer_rx.recv()).await?;
    let body = match frame {
        Some(Message::Text(body)) => body,
        other => anyhow::bail!("expected text frame, got {other:?}"),
    };
    let value: serde_json::Value = serde_json::from_str(&body)?;
    assert_eq!(value["type"], 9);
    assert_eq!(value["content"]["n"], 1);
    Ok(())
}

#[tokio::test]
async fn peer_close_unregisters_and_sends_close() -> anyhow::Result<()> {
    let mut h = start("alice", fast_settings(), false);
    wait_connections(&h.hub, 1).await?;

    h.peer_tx.send(Ok(Message::Close(None)))?;
    finished(h.task).await?;

    assert_eq!(h.hub.stats().await?.connections, 0);
    let mut last = None;
    while let Ok(frame) = h.peer_rx.try_recv() {
        last = Some(frame);
    }
    assert!(matches!(last, Some(Message::Close(_))), "last frame: {last:?}");
    Ok(())
}

#[tokio::test]
async fn transport_error_ends_connection() -> anyhow::Result<()> {
    let h = start("alice", fast_settings(), false);
    wait_connections(&h.hub, 1).await?;

    h.peer_tx.send(Err(io::Error::from(io::ErrorKind::ConnectionReset)))?;
    finished(h.task).await?;
    assert_eq!(h.hub.stats().await?.connections, 0);
    Ok(())
}

#[tokio::test]
async fn silent_peer_hits_read_deadline() -> anyhow::Result<()> {
    let settings = ConnectionSettings {
        pong_wait: Duration::from_millis(150),
        ping_period: Duration::from_secs(10),
        ..fast_settings()
    };
    let h = start("alice", settings, false);

    // The peer stays connected but never sends anything.
    finished(h.task).await?;
    assert_eq!(h.hub.stats().await?.connections, 0);
    drop(h.peer_tx);
    Ok(())
}

#[tokio::test]
async fn inbound_pongs_extend_read_deadline() -> anyhow::Result<()> {
    let settings = ConnectionSettings {
        pong_wait: Duration::from_millis(200),
        ping_period: Duration::from_secs(10),
        ..fast_settings()
    };
    let h = start("alice", settings, false);

    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(60)).await;
        h.peer_tx.send(Ok(Message::Pong(Default::default())))?;
    }
    assert!(!h.task.is_finished(), "connection timed out despite pongs");
    assert_eq!(h.hub.stats().await?.connections, 1);

    finished(h.task).await?;
    Ok(())
}

#[tokio::test]
async fn writer_sends_keepalive_pings() -> anyhow::Result<()> {
    let settings = ConnectionSettings { ping_period: Duration::from_millis(50), ..fast_settings() };
    let mut h = start("alice", settings, false);

    let frame = tokio::time::timeout(WAIT, h.peer_rx.recv()).await?;
    assert!(matches!(frame, Some(Message::Ping(_))), "frame: {frame:?}");
    Ok(())
}

#[tokio::test]
async fn write_failure_tears_down_connection() -> anyhow::Result<()> {
    let settings = ConnectionSettings { ping_period: Duration::from_millis(50), ..fast_settings() };
    let h = start("alice", settings, true);

    // The first keepalive write fails; the reader is released even though
    // the peer is still "connected".
    finished(h.task).await?;
    assert_eq!(h.hub.stats().await?.connections, 0);
    drop(h.peer_tx);
    Ok(())
}

#[tokio::test]
async fn hub_shutdown_closes_connection() -> anyhow::Result<()> {
    let mut h = start("alice", fast_settings(), false);
    wait_connections(&h.hub, 1).await?;

    h.hub.shutdown();
    finished(h.task).await?;

    let frame = tokio::time::timeout(WAIT, h.peer_rx.recv()).await?;
    assert!(matches!(frame, Some(Message::Close(_))), "frame: {frame:?}");
    drop(h.peer_tx);
    Ok(())
}

#[tokio::test]
async fn peers_closing_immediately_all_unregister() -> anyhow::Result<()> {
    let (hub, _hub_task) = Hub::spawn();
    let handler: Arc<dyn MessageHandler> = Arc::new(|_: &ConnectionInfo, _: ClientMessage| {});

    let mut tasks = Vec::new();
    let mut peers = Vec::new();
    for n in 0..100 {
        let (peer_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, peer_rx) = mpsc::unbounded_channel();
        // Peer already gone: the read pump sees end of stream at once.
        drop(peer_tx);
        let socket = MockSocket { inbound, outbound, fail_writes: false };
        let info = ConnectionInfo::new(format!("user-{n}"));
        tasks.push(tokio::spawn(serve(
            socket,
            info,
            hub.clone(),
            Arc::clone(&handler),
            fast_settings(),
        )));
        peers.push(peer_rx);
    }

    for task in tasks {
        finished(task).await?;
    }
    wait_connections(&hub, 0).await?;
    for mut peer_rx in peers {
        assert!(matches!(peer_rx.recv().await, Some(Message::Close(_))));
    }
    Ok(())
}

#[yare::parameterized(
    reset = { io::ErrorKind::ConnectionReset, true },
    aborted = { io::ErrorKind::ConnectionAborted, true },
    broken_pipe = { io::ErrorKind::BrokenPipe, true },
    eof = { io::ErrorKind::UnexpectedEof, true },
    timed_out = { io::ErrorKind::TimedOut, false },
    invalid_data = { io::ErrorKind::InvalidData, false },
)]
fn io_kinds_classify_close(kind: io::ErrorKind, expected: bool) {
    assert_eq!(is_expected_close(&io::Error::from(kind)), expected);
}

/// Wrapper that hides an io error one level down the source chain.
#[derive(Debug)]
struct Wrapped(io::Error);

impl std::fmt::Display for Wrapped {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("transport failed")
    }
}

impl std::error::Error for Wrapped {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

#[test]
fn wrapped_io_error_is_found_in_source_chain() {
    let err = Wrapped(io::Error::from(io::ErrorKind::ConnectionReset));
    assert!(is_expected_close(&err));
}

#[test]
fn message_text_alone_does_not_mark_close_as_expected() {
    let err = io::Error::other("Connection closed normally");
    assert!(!is_expected_close(&err));
}
