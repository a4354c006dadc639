// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection registry and delivery dispatcher.
//!
//! A single task owns the registry and is the only code that reads or mutates
//! it. Everything else talks to it through [`HubHandle`] over three channels:
//! register, unregister, and dispatch (deliveries plus stats requests).
//! Events from different channels are handled in whatever order `select!`
//! picks them up; there is no cross-channel ordering. Registration is
//! acknowledged, so a connection's unregister can never overtake its own
//! register.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionId;
use crate::message::ServerMessage;

/// Default capacity of the dispatch channel.
pub const DEFAULT_DISPATCH_CAPACITY: usize = 4096;

/// Item type of a connection's outbound queue. Shared so a broadcast is
/// allocated once regardless of fan-out.
pub type Outbound = Arc<ServerMessage>;

/// Registry record for one live connection.
///
/// The entry holds the only sender of the connection's outbound queue, so
/// dropping it closes the queue.
pub struct ConnectionEntry {
    pub id: ConnectionId,
    pub user_id: String,
    queue: mpsc::Sender<Outbound>,
}

impl ConnectionEntry {
    pub fn new(id: ConnectionId, user_id: impl Into<String>, queue: mpsc::Sender<Outbound>) -> Self {
        Self { id, user_id: user_id.into(), queue }
    }
}

impl fmt::Debug for ConnectionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEntry").field("id", &self.id).field("user_id", &self.user_id).finish()
    }
}

/// Counters maintained by the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Connections currently registered.
    pub connections: usize,
    /// Distinct user ids among registered connections.
    pub users: usize,
    /// Messages placed on an outbound queue.
    pub enqueued: u64,
    /// Messages discarded because the recipient's queue was full.
    pub dropped: u64,
    /// Deliveries refused because the dispatch channel was full.
    pub refused: u64,
}

/// The hub task has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubClosed;

impl fmt::Display for HubClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("hub is not running")
    }
}

impl std::error::Error for HubClosed {}

/// Why a delivery was not accepted by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverError {
    /// Dispatch channel full; the message was discarded and counted.
    Busy,
    /// The hub task has exited.
    Closed,
}

impl fmt::Display for DeliverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => f.write_str("hub dispatch queue is full"),
            Self::Closed => f.write_str("hub is not running"),
        }
    }
}

impl std::error::Error for DeliverError {}

enum Dispatch {
    Deliver(ServerMessage),
    /// Delivery to one connection, regardless of its user.
    DeliverTo(ConnectionId, ServerMessage),
    Stats(oneshot::Sender<HubStats>),
}

/// Cloneable front door to the hub task.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::UnboundedSender<(ConnectionEntry, oneshot::Sender<()>)>,
    unregister_tx: mpsc::UnboundedSender<ConnectionId>,
    dispatch_tx: mpsc::Sender<Dispatch>,
    refused: Arc<AtomicU64>,
    stop: CancellationToken,
}

impl HubHandle {
    /// Add a connection to the registry. Resolves once the hub has inserted
    /// it.
    pub async fn register(&self, entry: ConnectionEntry) -> Result<(), HubClosed> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.register_tx.send((entry, ack_tx)).map_err(|_| HubClosed)?;
        ack_rx.await.map_err(|_| HubClosed)
    }

    /// Remove a connection and close its outbound queue. No-op if absent.
    pub fn unregister(&self, id: ConnectionId) -> Result<(), HubClosed> {
        self.unregister_tx.send(id).map_err(|_| HubClosed)
    }

    /// Fire-and-forget delivery. Broadcast when `msg.to` is absent or empty.
    ///
    /// Never waits: when the dispatch channel is full the message is
    /// discarded and counted in [`HubStats::refused`].
    pub fn deliver(&self, msg: ServerMessage) -> Result<(), DeliverError> {
        self.try_dispatch(Dispatch::Deliver(msg))
    }

    /// Fire-and-forget delivery to a single connection.
    pub fn deliver_to(&self, id: ConnectionId, msg: ServerMessage) -> Result<(), DeliverError> {
        self.try_dispatch(Dispatch::DeliverTo(id, msg))
    }

    fn try_dispatch(&self, dispatch: Dispatch) -> Result<(), DeliverError> {
        match self.dispatch_tx.try_send(dispatch) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.refused.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("hub dispatch queue full, refusing message");
                Err(DeliverError::Busy)
            }
            Err(TrySendError::Closed(_)) => Err(DeliverError::Closed),
        }
    }

    /// Snapshot of the dispatcher's counters.
    pub async fn stats(&self) -> Result<HubStats, HubClosed> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.dispatch_tx.send(Dispatch::Stats(reply_tx)).await.map_err(|_| HubClosed)?;
        reply_rx.await.map_err(|_| HubClosed)
    }

    /// Ask the hub to unregister every connection and exit.
    pub fn shutdown(&self) {
        self.stop.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.dispatch_tx.is_closed()
    }
}

/// Dispatcher state. Owned by the hub task; see [`Hub::spawn`].
pub struct Hub {
    registry: HashMap<ConnectionId, ConnectionEntry>,
    register_rx: mpsc::UnboundedReceiver<(ConnectionEntry, oneshot::Sender<()>)>,
    unregister_rx: mpsc::UnboundedReceiver<ConnectionId>,
    dispatch_rx: mpsc::Receiver<Dispatch>,
    refused: Arc<AtomicU64>,
    stop: CancellationToken,
    enqueued: u64,
    dropped: u64,
}

impl Hub {
    pub fn new(dispatch_capacity: usize) -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::channel(dispatch_capacity.max(1));
        let refused = Arc::new(AtomicU64::new(0));
        let stop = CancellationToken::new();
        let hub = Self {
            registry: HashMap::new(),
            register_rx,
            unregister_rx,
            dispatch_rx,
            refused: Arc::clone(&refused),
            stop: stop.clone(),
            enqueued: 0,
            dropped: 0,
        };
        (hub, HubHandle { register_tx, unregister_tx, dispatch_tx, refused, stop })
    }

    /// Start the dispatcher on its own task with the default dispatch capacity.
    pub fn spawn() -> (HubHandle, JoinHandle<()>) {
        Self::spawn_with_capacity(DEFAULT_DISPATCH_CAPACITY)
    }

    pub fn spawn_with_capacity(dispatch_capacity: usize) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(dispatch_capacity);
        (handle, tokio::spawn(hub.run()))
    }

    /// Process events until shutdown is requested or every handle is dropped.
    pub async fn run(mut self) {
        let stop = self.stop.clone();
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                Some((entry, ack)) = self.register_rx.recv() => {
                    self.register(entry);
                    let _ = ack.send(());
                }
                Some(id) = self.unregister_rx.recv() => self.unregister(id),
                dispatch = self.dispatch_rx.recv() => match dispatch {
                    Some(Dispatch::Deliver(msg)) => self.deliver(msg),
                    Some(Dispatch::DeliverTo(id, msg)) => self.deliver_to(id, msg),
                    Some(Dispatch::Stats(reply)) => {
                        let _ = reply.send(self.stats());
                    }
                    None => break,
                },
            }
        }
        self.sweep();
    }

    fn register(&mut self, entry: ConnectionEntry) {
        tracing::debug!(conn_id = %entry.id, user_id = %entry.user_id, "registered");
        if let Some(old) = self.registry.insert(entry.id, entry) {
            tracing::warn!(conn_id = %old.id, "connection registered twice, replaced previous entry");
        }
    }

    fn unregister(&mut self, id: ConnectionId) {
        // Dropping the entry drops the queue sender, which ends the write pump.
        if let Some(entry) = self.registry.remove(&id) {
            tracing::debug!(conn_id = %id, user_id = %entry.user_id, "unregistered");
        }
    }

    fn deliver(&mut self, msg: ServerMessage) {
        let msg = Arc::new(msg);
        let recipient = msg.recipient();

        let mut enqueued = 0;
        let mut dropped = 0;
        for entry in self.registry.values() {
            if recipient.is_some_and(|to| to != entry.user_id) {
                continue;
            }
            match offer(entry, &msg) {
                Offer::Enqueued => enqueued += 1,
                Offer::Dropped => dropped += 1,
                Offer::Gone => {}
            }
        }
        self.enqueued += enqueued;
        self.dropped += dropped;
    }

    fn deliver_to(&mut self, id: ConnectionId, msg: ServerMessage) {
        let Some(entry) = self.registry.get(&id) else {
            tracing::trace!(conn_id = %id, kind = %msg.kind, "connection gone, discarding reply");
            return;
        };
        match offer(entry, &Arc::new(msg)) {
            Offer::Enqueued => self.enqueued += 1,
            Offer::Dropped => self.dropped += 1,
            Offer::Gone => {}
        }
    }

    fn stats(&self) -> HubStats {
        let users: HashSet<&str> = self.registry.values().map(|e| e.user_id.as_str()).collect();
        HubStats {
            connections: self.registry.len(),
            users: users.len(),
            enqueued: self.enqueued,
            dropped: self.dropped,
            refused: self.refused.load(Ordering::Relaxed),
        }
    }

    /// Unregister everything so each write pump sends a close frame.
    fn sweep(&mut self) {
        let count = self.registry.len();
        self.registry.clear();
        tracing::debug!(connections = count, "hub stopped");
    }
}

enum Offer {
    Enqueued,
    Dropped,
    Gone,
}

/// Non-blocking enqueue onto one connection.
fn offer(entry: &ConnectionEntry, msg: &Outbound) -> Offer {
    match entry.queue.try_send(Arc::clone(msg)) {
        Ok(()) => Offer::Enqueued,
        Err(TrySendError::Full(_)) => {
            tracing::debug!(
                conn_id = %entry.id,
                user_id = %entry.user_id,
                kind = %msg.kind,
                "outbound queue full, dropping message"
            );
            Offer::Dropped
        }
        // Write pump already gone; its read pump will unregister it.
        Err(TrySendError::Closed(_)) => Offer::Gone,
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
