// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle: records which user holds which connection.
//!
//! Sessions exist for presence visibility only. The hub registry is the
//! authority on live sockets; the store may lag behind it.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionId;
use crate::error::{GatewayError, StoreError};

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Persisted record of a user holding an open connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub connection_id: String,
    pub connected_at_ms: u64,
}

/// External persistence for sessions.
///
/// Object-safe for use as `Arc<dyn SessionStore>`. Implementations report
/// failures as [`StoreError`]; callers do not retry.
pub trait SessionStore: Send + Sync + 'static {
    fn save(&self, session: Session) -> StoreFuture<'_, ()>;

    fn remove(&self, session_id: &str) -> StoreFuture<'_, ()>;

    fn find(&self, session_id: &str) -> StoreFuture<'_, Option<Session>>;
}

/// Process-local [`SessionStore`].
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All sessions currently recorded for `user_id`, oldest first.
    pub fn sessions_for_user(&self, user_id: &str) -> Vec<Session> {
        let mut found: Vec<Session> =
            self.sessions.lock().values().filter(|s| s.user_id == user_id).cloned().collect();
        found.sort_by_key(|s| s.connected_at_ms);
        found
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, session: Session) -> StoreFuture<'_, ()> {
        self.sessions.lock().insert(session.id.clone(), session);
        Box::pin(async { Ok(()) })
    }

    fn remove(&self, session_id: &str) -> StoreFuture<'_, ()> {
        self.sessions.lock().remove(session_id);
        Box::pin(async { Ok(()) })
    }

    fn find(&self, session_id: &str) -> StoreFuture<'_, Option<Session>> {
        let found = self.sessions.lock().get(session_id).cloned();
        Box::pin(async move { Ok(found) })
    }
}

/// Connect/disconnect bookkeeping on top of a [`SessionStore`].
#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn SessionStore>,
}

impl SessionService {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Record that `user_id` opened `connection_id`.
    ///
    /// On error no session is active and the connection must not be
    /// registered with the hub.
    pub async fn connect(
        &self,
        user_id: &str,
        connection_id: &ConnectionId,
    ) -> Result<Session, GatewayError> {
        if user_id.trim().is_empty() || connection_id.is_nil() {
            return Err(GatewayError::InvalidArgument);
        }

        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_owned(),
            connection_id: connection_id.to_string(),
            connected_at_ms: crate::state::epoch_ms(),
        };

        if let Err(e) = self.store.save(session.clone()).await {
            tracing::warn!(user_id, conn_id = %connection_id, err = %e, "failed to save session");
            return Err(e.into());
        }
        tracing::debug!(session_id = %session.id, user_id, conn_id = %connection_id, "session connected");
        Ok(session)
    }

    /// Remove a session. Unknown or already-removed sessions are `NotFound`.
    pub async fn disconnect(&self, session_id: &str) -> Result<(), GatewayError> {
        let found = self.store.find(session_id).await.map_err(|e| {
            tracing::warn!(session_id, err = %e, "failed to look up session");
            GatewayError::from(e)
        })?;
        if found.is_none() {
            return Err(GatewayError::NotFound);
        }

        if let Err(e) = self.store.remove(session_id).await {
            tracing::warn!(session_id, err = %e, "failed to remove session");
            return Err(e.into());
        }
        tracing::debug!(session_id, "session disconnected");
        Ok(())
    }

    pub async fn find(&self, session_id: &str) -> Result<Option<Session>, GatewayError> {
        Ok(self.store.find(session_id).await?)
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
