//! Downstream session registry
//!
//! A session binds an authenticated key's permission snapshot to a
//! bounded outbound queue for the lifetime of one SSE connection.
//! The SSE writer consumes the queue; the message-POST handler is a
//! transient, non-blocking producer that drops on overflow.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use om_mcp::gateway::PermissionSet;
use om_mcp::protocol::JsonRpcResponse;

/// Outbound queue depth per session.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 10;

/// State for one connected downstream client.
pub struct Session {
    tx: mpsc::Sender<JsonRpcResponse>,

    /// Permission snapshot resolved from the API key at connect time.
    pub permissions: PermissionSet,
}

impl Session {
    /// Non-blocking enqueue. A saturated queue drops the message
    /// silently rather than stalling the POST handler.
    pub fn enqueue(&self, response: JsonRpcResponse) {
        use mpsc::error::TrySendError;
        match self.tx.try_send(response) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("session outbound queue full, dropping response");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("session outbound queue closed, dropping response");
            }
        }
    }
}

/// Process-wide registry of live sessions, keyed by session id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh session; the returned receiver feeds the SSE
    /// writer.
    pub fn create(
        &self,
        permissions: PermissionSet,
    ) -> (String, mpsc::Receiver<JsonRpcResponse>) {
        let session_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        self.sessions
            .insert(session_id.clone(), Arc::new(Session { tx, permissions }));
        (session_id, rx)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    pub fn remove(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
