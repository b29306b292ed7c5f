//! Pluggable transports for upstream MCP servers
//!
//! A transport is a duplex byte-message channel: `start` blocks until
//! the connection ends, delivering each complete incoming JSON-RPC
//! message through `on_message` and firing `on_ready` exactly once
//! when sending becomes possible. Transports never interpret JSON-RPC
//! beyond what their own framing requires.

mod http;
mod sse;
mod stdio;

pub use http::{HttpTransport, ToolConfig, ToolParameter};
pub use sse::SseTransport;
pub use stdio::{validate_command, StdioTransport};

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use om_types::AppResult;

/// Callback invoked with each complete incoming message.
pub type MessageCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Callback invoked once sending becomes possible.
pub type ReadyCallback = Arc<dyn Fn() + Send + Sync>;

/// Duplex byte-message channel to one upstream server.
///
/// Callbacks are plain function values so the transport never holds a
/// reference back to the client that owns it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run the transport until it ends or `cancel` fires.
    ///
    /// `on_ready` is invoked exactly once per start when `send`
    /// becomes usable; `on_message` once per incoming message, with
    /// no framing bytes attached.
    async fn start(
        &self,
        cancel: CancellationToken,
        on_message: MessageCallback,
        on_ready: ReadyCallback,
    ) -> AppResult<()>;

    /// Send one JSON-RPC payload. Valid only after `on_ready`.
    async fn send(&self, payload: &[u8]) -> AppResult<()>;

    /// Tear down the transport. Idempotent; forces `start` to return.
    async fn close(&self);
}
