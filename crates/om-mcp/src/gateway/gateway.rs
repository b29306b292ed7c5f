use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Value};

use om_types::{AppResult, UpstreamServerConfig};

use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION};
use crate::upstream::UpstreamClient;

use super::access_control::PermissionSet;

/// Gateway over the set of enabled upstream clients.
///
/// The name-keyed client map is swapped wholesale on reload; every
/// dispatch path takes the read lock only long enough to snapshot,
/// never across an upstream call.
pub struct Gateway {
    upstreams: RwLock<HashMap<String, Arc<UpstreamClient>>>,
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new()
    }
}

impl Gateway {
    pub fn new() -> Self {
        Self {
            upstreams: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the running upstream set with clients for the given
    /// configs. Disabled configs are skipped; replaced clients are
    /// stopped after the swap.
    pub fn reload_upstreams(&self, configs: Vec<UpstreamServerConfig>) {
        let mut fresh = HashMap::new();
        for config in configs.into_iter().filter(|c| c.enabled) {
            let name = config.name.clone();
            let client = Arc::new(UpstreamClient::new(config));
            client.start();
            fresh.insert(name, client);
        }

        tracing::info!("reloading upstreams: {} enabled", fresh.len());

        let replaced = {
            let mut upstreams = self.upstreams.write();
            std::mem::replace(&mut *upstreams, fresh)
        };
        for client in replaced.values() {
            client.stop();
        }
    }

    /// Stop every upstream client (process shutdown).
    pub fn shutdown(&self) {
        let drained = {
            let mut upstreams = self.upstreams.write();
            std::mem::take(&mut *upstreams)
        };
        for client in drained.values() {
            client.stop();
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<UpstreamClient>> {
        self.upstreams.read().values().cloned().collect()
    }

    pub(crate) fn get_upstream(&self, name: &str) -> Option<Arc<UpstreamClient>> {
        self.upstreams.read().get(name).cloned()
    }

    #[cfg(test)]
    pub(crate) fn insert_for_test(&self, client: Arc<UpstreamClient>) {
        self.upstreams
            .write()
            .insert(client.name().to_string(), client);
    }

    /// Dispatch one downstream JSON-RPC message.
    ///
    /// Returns `None` for notifications that produce no response.
    /// A parse failure is an `Err` so the HTTP layer can answer 500.
    pub async fn handle_message(
        &self,
        raw: &[u8],
        permissions: &PermissionSet,
    ) -> AppResult<Option<JsonRpcResponse>> {
        let request: JsonRpcRequest = serde_json::from_slice(raw)?;
        let id = request.id.clone().unwrap_or(Value::Null);

        tracing::debug!(method = %request.method, "gateway dispatch");

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "notifications/initialized" => return Ok(None),
            "ping" => JsonRpcResponse::success(id, json!({})),
            // Accepted for client compatibility; the level is not applied.
            "logging/setLevel" => JsonRpcResponse::success(id, json!({})),
            "completion/complete" => JsonRpcResponse::success(
                id,
                json!({
                    "completion": { "values": [], "total": 0, "hasMore": false }
                }),
            ),
            "tools/list" => self.handle_tools_list(id, permissions).await,
            "tools/call" | "callTool" => self.handle_tools_call(id, request, permissions).await,
            _ => JsonRpcResponse::error(
                id,
                JsonRpcError::method_not_found("Method not supported"),
            ),
        };

        Ok(Some(response))
    }

    /// Local `initialize` response; no upstream is consulted.
    fn handle_initialize(&self, id: Value) -> JsonRpcResponse {
        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": { "listChanged": true },
                    "prompts": { "listChanged": false },
                    "resources": { "listChanged": false, "subscribe": false },
                    "logging": {}
                },
                "serverInfo": {
                    "name": "one-mcp-gateway",
                    "version": "1.1.1"
                }
            }),
        )
    }
}
