//! Upstream MCP client
//!
//! Owns one transport, keeps it connected, performs the MCP
//! handshake, and correlates synchronous `call`s with asynchronous
//! transport messages by request id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use om_types::{AppError, AppResult, TransportType, UpstreamServerConfig};

use crate::protocol::{
    JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION,
};
use crate::transport::{
    HttpTransport, MessageCallback, ReadyCallback, SseTransport, StdioTransport, Transport,
};

/// How long a `call` waits for its correlated response.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Reconnect delay after a transport error.
const RETRY_AFTER_ERROR: Duration = Duration::from_secs(5);

/// Reconnect delay after a clean transport exit.
const RETRY_AFTER_EXIT: Duration = Duration::from_secs(1);

/// Normalize a response id for pending-map lookup.
///
/// Outgoing ids are bare decimal numbers; string and null ids from
/// misbehaving upstreams still need a stable key so they can be
/// ignored consistently.
fn normalize_response_id(id: &Value) -> String {
    match id {
        Value::Null => "__null_id__".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("\"{}\"", s),
        _ => id.to_string(),
    }
}

/// Client for one upstream MCP server.
pub struct UpstreamClient {
    config: UpstreamServerConfig,
    transport: Arc<dyn Transport>,

    cancel: CancellationToken,

    /// Set after a successful handshake, cleared on every transport
    /// exit. `call` is gated on it except for the bootstrap
    /// `initialize`.
    ready: Arc<RwLock<bool>>,

    /// In-flight requests awaiting their correlated response.
    pending: Arc<RwLock<HashMap<String, oneshot::Sender<JsonRpcResponse>>>>,

    next_id: Arc<RwLock<u64>>,
}

impl UpstreamClient {
    /// Build a client with the transport selected by the config.
    pub fn new(config: UpstreamServerConfig) -> Self {
        let transport: Arc<dyn Transport> = match config.transport_type {
            TransportType::Stdio => Arc::new(StdioTransport::new(config.clone())),
            TransportType::Http => Arc::new(HttpTransport::new(config.clone())),
            TransportType::Sse => Arc::new(SseTransport::new(config.clone())),
        };
        Self::with_transport(config, transport)
    }

    /// Build a client around an explicit transport.
    pub(crate) fn with_transport(
        config: UpstreamServerConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            config,
            transport,
            cancel: CancellationToken::new(),
            ready: Arc::new(RwLock::new(false)),
            pending: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(RwLock::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Decimal string form of the config row id, as used by the
    /// permission predicate.
    pub fn server_id(&self) -> String {
        self.config.server_id()
    }

    pub fn config(&self) -> &UpstreamServerConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.read()
    }

    /// Launch the connect loop in the background.
    pub fn start(self: &Arc<Self>) {
        let client = self.clone();
        tokio::spawn(async move { client.connect_loop().await });
    }

    /// Cancel the lifetime token and tear down the transport.
    ///
    /// Pending calls are not unblocked eagerly; they run into their
    /// timeout.
    pub fn stop(&self) {
        self.cancel.cancel();
        let transport = self.transport.clone();
        tokio::spawn(async move { transport.close().await });
    }

    async fn connect_loop(self: Arc<Self>) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            tracing::info!(upstream = %self.config.name, "transport starting");

            let on_message: MessageCallback = {
                let client = self.clone();
                Arc::new(move |bytes| client.handle_message(&bytes))
            };
            let on_ready: ReadyCallback = {
                let client = self.clone();
                Arc::new(move || {
                    let client = client.clone();
                    tokio::spawn(async move { client.on_transport_ready().await });
                })
            };

            let result = self
                .transport
                .start(self.cancel.child_token(), on_message, on_ready)
                .await;

            *self.ready.write() = false;

            if self.cancel.is_cancelled() {
                return;
            }

            let delay = match result {
                Ok(()) => {
                    tracing::info!(upstream = %self.config.name, "transport stopped cleanly");
                    RETRY_AFTER_EXIT
                }
                Err(e) => {
                    tracing::warn!(
                        upstream = %self.config.name,
                        "transport error: {}, retrying in {:?}",
                        e,
                        RETRY_AFTER_ERROR
                    );
                    RETRY_AFTER_ERROR
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn on_transport_ready(&self) {
        tracing::info!(upstream = %self.config.name, "transport ready, initializing");
        match self.initialize().await {
            Ok(()) => {
                *self.ready.write() = true;
                tracing::info!(upstream = %self.config.name, "initialized");
            }
            Err(e) => {
                tracing::warn!(upstream = %self.config.name, "initialization failed: {}", e);
            }
        }
    }

    /// MCP handshake: `initialize` followed by the
    /// `notifications/initialized` notification.
    async fn initialize(&self) -> AppResult<()> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "roots": { "listChanged": true },
                "sampling": {}
            },
            "clientInfo": {
                "name": "one-mcp-gateway",
                "version": "1.0.0"
            }
        });

        let response = self.call("initialize", Some(params)).await?;
        if let Some(error) = response.error {
            return Err(AppError::Upstream(format!(
                "initialize rejected ({}): {}",
                error.code, error.message
            )));
        }

        let notification = JsonRpcRequest::notification("notifications/initialized");
        self.transport
            .send(&serde_json::to_vec(&notification)?)
            .await
    }

    /// Synchronous JSON-RPC call with a 30-second timeout.
    pub async fn call(&self, method: &str, params: Option<Value>) -> AppResult<JsonRpcResponse> {
        self.call_with_timeout(method, params, CALL_TIMEOUT).await
    }

    async fn call_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> AppResult<JsonRpcResponse> {
        if !self.is_ready() && method != "initialize" {
            return Err(AppError::Upstream(format!(
                "upstream '{}' not ready",
                self.config.name
            )));
        }

        let id = {
            let mut next = self.next_id.write();
            *next += 1;
            *next
        };
        let id_key = id.to_string();

        let request = JsonRpcRequest::with_id(id, method, params);
        let payload = serde_json::to_vec(&request)?;

        // Register before sending so a fast response cannot race the slot.
        let (tx, rx) = oneshot::channel();
        self.pending.write().insert(id_key.clone(), tx);

        if let Err(e) = self.transport.send(&payload).await {
            self.pending.write().remove(&id_key);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.pending.write().remove(&id_key);
                Err(AppError::Upstream(format!(
                    "response channel closed for id {}",
                    id_key
                )))
            }
            Err(_) => {
                self.pending.write().remove(&id_key);
                Err(AppError::Upstream(
                    "timeout waiting for upstream response".to_string(),
                ))
            }
        }
    }

    /// Transport message dispatch: responses are routed to their
    /// pending slot, everything else is dropped.
    fn handle_message(&self, bytes: &[u8]) {
        let message: JsonRpcMessage = match serde_json::from_slice(bytes) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(upstream = %self.config.name, "unparsable message: {}", e);
                return;
            }
        };

        match message {
            JsonRpcMessage::Response(response) => {
                let id_key = normalize_response_id(&response.id);
                let sender = self.pending.write().remove(&id_key);
                match sender {
                    Some(sender) => {
                        let _ = sender.send(response);
                    }
                    None => {
                        tracing::debug!(
                            upstream = %self.config.name,
                            id = %id_key,
                            "response for unknown request"
                        );
                    }
                }
            }
            JsonRpcMessage::Notification(notification) => {
                // Upstream notifications are not forwarded downstream.
                tracing::debug!(
                    upstream = %self.config.name,
                    method = %notification.method,
                    "dropping upstream notification"
                );
            }
            JsonRpcMessage::Request(request) => {
                tracing::debug!(
                    upstream = %self.config.name,
                    method = %request.method,
                    "ignoring server-initiated request"
                );
            }
        }
    }
}

impl UpstreamClient {
    /// Force the ready flag, bypassing the handshake. Test-only.
    #[cfg(test)]
    pub(crate) fn force_ready(&self) {
        *self.ready.write() = true;
    }

    /// Feed a raw transport message into dispatch. Test-only.
    #[cfg(test)]
    pub(crate) fn deliver_raw(&self, bytes: &[u8]) {
        self.handle_message(bytes);
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{test_config, MockTransport};

    /// Client wired to the mock without running the connect loop.
    fn wired_client(transport: Arc<MockTransport>) -> Arc<UpstreamClient> {
        let client = Arc::new(UpstreamClient::with_transport(
            test_config("u", 1),
            transport.clone(),
        ));
        let delivery = client.clone();
        transport.set_on_message(Arc::new(move |bytes| delivery.deliver_raw(&bytes)));
        client
    }

    #[test]
    fn test_normalize_response_id() {
        assert_eq!(normalize_response_id(&Value::Null), "__null_id__");
        assert_eq!(normalize_response_id(&json!(42)), "42");
        assert_eq!(normalize_response_id(&json!("abc")), "\"abc\"");
    }

    #[tokio::test]
    async fn test_call_rejected_when_not_ready() {
        let client = wired_client(Arc::new(MockTransport::echo_success()));

        let err = client.call("tools/list", None).await.unwrap_err();
        assert!(err.to_string().contains("not ready"));
    }

    #[tokio::test]
    async fn test_initialize_bypasses_ready_gate() {
        let client = wired_client(Arc::new(MockTransport::echo_success()));

        let response = client.call("initialize", None).await.unwrap();
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn test_ids_are_monotonic_decimal() {
        let transport = Arc::new(MockTransport::echo_success());
        let client = wired_client(transport.clone());
        client.force_ready();

        client.call("a", None).await.unwrap();
        client.call("b", None).await.unwrap();
        let sent = transport.sent_requests();
        assert_eq!(sent[0].id, Some(json!(1)));
        assert_eq!(sent[1].id, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_timeout_deregisters_pending_slot() {
        let client = wired_client(Arc::new(MockTransport::silent()));
        client.force_ready();

        let err = client
            .call_with_timeout("tools/list", None, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timeout"));
        assert_eq!(client.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_send_failure_deregisters_pending_slot() {
        struct FailingSend(MockTransport);

        #[async_trait::async_trait]
        impl crate::transport::Transport for FailingSend {
            async fn start(
                &self,
                cancel: tokio_util::sync::CancellationToken,
                on_message: crate::transport::MessageCallback,
                on_ready: crate::transport::ReadyCallback,
            ) -> AppResult<()> {
                self.0.start(cancel, on_message, on_ready).await
            }
            async fn send(&self, _payload: &[u8]) -> AppResult<()> {
                Err(AppError::Transport("wire down".to_string()))
            }
            async fn close(&self) {
                self.0.close().await
            }
        }

        let client = Arc::new(UpstreamClient::with_transport(
            test_config("u", 1),
            Arc::new(FailingSend(MockTransport::silent())),
        ));
        client.force_ready();

        let err = client.call("tools/list", None).await.unwrap_err();
        assert!(err.to_string().contains("wire down"));
        assert_eq!(client.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_unknown_response_id_is_dropped() {
        let client = wired_client(Arc::new(MockTransport::silent()));

        // No pending slot registered; must not panic or grow state.
        client.deliver_raw(br#"{"jsonrpc":"2.0","id":99,"result":{}}"#);
        assert_eq!(client.pending_len(), 0);
    }
}
