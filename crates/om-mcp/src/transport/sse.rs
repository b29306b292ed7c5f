//! SSE transport for upstream MCP servers
//!
//! Holds a long-polling GET with `Accept: text/event-stream` open
//! against the upstream and POSTs outgoing JSON-RPC to the endpoint
//! the upstream announces via its `endpoint` event.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::{Client, Url};
use tokio_util::sync::CancellationToken;

use om_types::{AppError, AppResult, UpstreamServerConfig};

use super::{MessageCallback, ReadyCallback, Transport};

/// Longest accepted SSE line. Matches the downstream contract that
/// lines up to 1 MiB must be deliverable.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Strip CR/LF from a bearer token so it cannot inject headers.
fn sanitize_token(token: &str) -> String {
    token.chars().filter(|c| *c != '\n' && *c != '\r').collect()
}

/// Resolve the announced endpoint (possibly relative) against the GET URL.
fn resolve_endpoint(base: &str, endpoint: &str) -> String {
    match Url::parse(base).and_then(|b| b.join(endpoint)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => endpoint.to_string(),
    }
}

/// One parsed server-sent event line worth acting on.
enum SseEvent {
    Endpoint(String),
    Message(String),
}

/// Incremental SSE line interpreter.
///
/// Tracks the pending `event:` name; a `data:` line under the
/// `endpoint` event yields the POST target, any other non-empty
/// `data:` line yields a message. Blank lines reset the event name.
#[derive(Default)]
struct EventParser {
    pending_event: Option<String>,
}

impl EventParser {
    fn feed(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            self.pending_event = None;
            return None;
        }
        if let Some(name) = line.strip_prefix("event:") {
            self.pending_event = Some(name.trim().to_string());
            return None;
        }
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.strip_prefix(' ').unwrap_or(data);
            if self.pending_event.as_deref() == Some("endpoint") {
                self.pending_event = None;
                return Some(SseEvent::Endpoint(data.to_string()));
            }
            if !data.is_empty() {
                return Some(SseEvent::Message(data.to_string()));
            }
        }
        None
    }
}

/// SSE transport: long-poll GET for inbound, POST-back for outbound.
pub struct SseTransport {
    config: UpstreamServerConfig,
    client: Client,

    /// POST target discovered from the upstream's `endpoint` event.
    endpoint: Arc<RwLock<Option<String>>>,

    /// Fired by `close` to force `start` to return.
    closed: CancellationToken,
}

impl SseTransport {
    pub fn new(config: UpstreamServerConfig) -> Self {
        Self {
            config,
            // No total timeout: the long-poll stays open indefinitely.
            client: Client::new(),
            endpoint: Arc::new(RwLock::new(None)),
            closed: CancellationToken::new(),
        }
    }

    fn auth_header(&self) -> Option<String> {
        if self.config.auth_token.is_empty() {
            None
        } else {
            Some(format!("Bearer {}", sanitize_token(&self.config.auth_token)))
        }
    }
}

#[async_trait::async_trait]
impl Transport for SseTransport {
    async fn start(
        &self,
        cancel: CancellationToken,
        on_message: MessageCallback,
        on_ready: ReadyCallback,
    ) -> AppResult<()> {
        tracing::info!(upstream = %self.config.name, url = %self.config.url, "SSE transport connecting");

        let mut request = self
            .client
            .get(&self.config.url)
            .header("Accept", "text/event-stream");
        if let Some(auth) = self.auth_header() {
            request = request.header("Authorization", auth);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Transport(format!("SSE connect failed: {}", e)))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(AppError::Transport(format!(
                "bad status code: {}",
                response.status().as_u16()
            )));
        }

        let mut stream = Box::pin(response.bytes_stream());
        let mut buffer: Vec<u8> = Vec::new();
        let mut parser = EventParser::default();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = self.closed.cancelled() => return Ok(()),
                chunk = stream.next() => chunk,
            };

            let chunk = match chunk {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    return Err(AppError::Transport(format!("SSE stream error: {}", e)))
                }
                // Upstream closed the long-poll cleanly.
                None => return Ok(()),
            };

            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = buffer.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }

                let line = String::from_utf8_lossy(&line).into_owned();
                match parser.feed(&line) {
                    Some(SseEvent::Endpoint(raw)) => {
                        let resolved = resolve_endpoint(&self.config.url, &raw);
                        tracing::info!(
                            upstream = %self.config.name,
                            endpoint = %resolved,
                            "SSE endpoint discovered"
                        );
                        *self.endpoint.write() = Some(resolved);
                        on_ready();
                    }
                    Some(SseEvent::Message(data)) => on_message(data.into_bytes()),
                    None => {}
                }
            }

            if buffer.len() > MAX_LINE_BYTES {
                return Err(AppError::Transport(format!(
                    "SSE line exceeds {} bytes",
                    MAX_LINE_BYTES
                )));
            }
        }
    }

    async fn send(&self, payload: &[u8]) -> AppResult<()> {
        let endpoint = self
            .endpoint
            .read()
            .clone()
            .ok_or_else(|| AppError::Transport("endpoint not yet discovered".to_string()))?;

        let mut request = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .body(payload.to_vec());
        if let Some(auth) = self.auth_header() {
            request = request.header("Authorization", auth);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Transport(format!("SSE POST failed: {}", e)))?;

        if response.status().as_u16() >= 400 {
            return Err(AppError::Transport(format!(
                "upstream returned error: {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}
