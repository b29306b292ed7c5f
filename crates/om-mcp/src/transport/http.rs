//! HTTP wrapper transport
//!
//! Synthesizes a single-tool MCP server from a plain REST endpoint.
//! No connection is opened up-front: `start` parks on cancellation
//! and every JSON-RPC request handed to `send` is answered locally,
//! with only `tools/call` reaching the wrapped endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::{Client, Method, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use om_types::{AppError, AppResult, UpstreamServerConfig};

use crate::protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND, PARSE_ERROR,
    PROTOCOL_VERSION,
};

use super::{MessageCallback, ReadyCallback, Transport};

/// Tool definition wrapped around the REST endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// HTTP method; GET serializes arguments as query parameters,
    /// everything else as a JSON body.
    #[serde(default)]
    pub method: String,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,

    #[serde(rename = "type", default)]
    pub param_type: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub default: String,
}

/// Virtual transport wrapping one REST endpoint as an MCP server.
pub struct HttpTransport {
    config: UpstreamServerConfig,
    tool_config: ToolConfig,
    client: Client,

    on_message: Arc<RwLock<Option<MessageCallback>>>,
    closed: CancellationToken,
}

impl HttpTransport {
    pub fn new(config: UpstreamServerConfig) -> Self {
        let tool_config = if config.tool_config.trim().is_empty() {
            ToolConfig::default()
        } else {
            serde_json::from_str(&config.tool_config).unwrap_or_else(|e| {
                tracing::warn!(upstream = %config.name, "invalid tool_config: {}", e);
                ToolConfig::default()
            })
        };
        Self {
            config,
            tool_config,
            client: Client::new(),
            on_message: Arc::new(RwLock::new(None)),
            closed: CancellationToken::new(),
        }
    }

    fn deliver(&self, response: JsonRpcResponse) {
        let callback = self.on_message.read().clone();
        if let Some(callback) = callback {
            match serde_json::to_vec(&response) {
                Ok(payload) => callback(payload),
                Err(e) => tracing::error!(upstream = %self.config.name, "reply encode: {}", e),
            }
        }
    }

    fn reply(&self, id: Option<Value>, result: Value) {
        let Some(id) = id else { return };
        self.deliver(JsonRpcResponse::success(id, result));
    }

    fn reply_error(&self, id: Option<Value>, code: i32, message: &str) {
        let Some(id) = id else { return };
        self.deliver(JsonRpcResponse::error(id, JsonRpcError::new(code, message)));
    }

    fn handle_initialize(&self, id: Option<Value>) {
        self.reply(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": { "listChanged": false }
                },
                "serverInfo": {
                    "name": "one-mcp-http-wrapper",
                    "version": "1.0.0"
                }
            }),
        );
    }

    /// Synthesize the single-tool catalog from the tool config.
    ///
    /// A parameter lands in `required` only when it is required and
    /// carries no default; a parameter with a default is optional to
    /// callers and pre-populated on invocation.
    fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required: Vec<String> = Vec::new();

        for p in &self.tool_config.parameters {
            let mut prop = Map::new();
            prop.insert("type".to_string(), json!(p.param_type));
            prop.insert("description".to_string(), json!(p.description));
            if !p.default.is_empty() {
                prop.insert("default".to_string(), json!(p.default));
            }
            properties.insert(p.name.clone(), Value::Object(prop));

            if p.required && p.default.is_empty() {
                required.push(p.name.clone());
            }
        }

        let mut schema = Map::new();
        schema.insert("type".to_string(), json!("object"));
        schema.insert("properties".to_string(), Value::Object(properties));
        if !required.is_empty() {
            schema.insert("required".to_string(), json!(required));
        }
        Value::Object(schema)
    }

    fn handle_tools_list(&self, id: Option<Value>) {
        self.reply(
            id,
            json!({
                "tools": [{
                    "name": self.tool_config.name,
                    "description": self.tool_config.description,
                    "inputSchema": self.input_schema(),
                }]
            }),
        );
    }

    async fn handle_tools_call(&self, id: Option<Value>, params: Option<Value>) {
        #[derive(Deserialize)]
        struct CallParams {
            name: String,
            #[serde(default)]
            arguments: Map<String, Value>,
        }

        let params: CallParams = match params.map(serde_json::from_value).transpose() {
            Ok(Some(p)) => p,
            _ => {
                self.reply_error(id, PARSE_ERROR, "Parse error");
                return;
            }
        };

        if params.name != self.tool_config.name {
            self.reply_error(id, METHOD_NOT_FOUND, "Tool not found");
            return;
        }

        // Defaults first, then caller-supplied arguments win key-by-key.
        let mut args = Map::new();
        for p in &self.tool_config.parameters {
            if !p.default.is_empty() {
                args.insert(p.name.clone(), json!(p.default));
            }
        }
        for (k, v) in params.arguments {
            args.insert(k, v);
        }

        match self.execute_request(&args).await {
            Ok(body) => self.reply(
                id,
                json!({ "content": [{ "type": "text", "text": body }] }),
            ),
            Err(text) => self.reply(
                id,
                json!({
                    "content": [{ "type": "text", "text": text }],
                    "isError": true
                }),
            ),
        }
    }

    /// Perform the wrapped REST call. The error side carries the text
    /// to surface as an `isError` tool result.
    async fn execute_request(&self, args: &Map<String, Value>) -> Result<String, String> {
        let method = match self.tool_config.method.to_uppercase().as_str() {
            "" | "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "DELETE" => Method::DELETE,
            other => {
                return Err(format!("unsupported HTTP method: {}", other));
            }
        };

        let mut request = if method == Method::GET {
            let mut url = Url::parse(&self.config.url)
                .map_err(|e| format!("Error executing HTTP request: {}", e))?;
            {
                let mut query = url.query_pairs_mut();
                for (k, v) in args {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    query.append_pair(k, &value);
                }
            }
            self.client.get(url)
        } else {
            self.client
                .request(method, &self.config.url)
                .header("Content-Type", "application/json")
                .json(args)
        };

        for (k, v) in &self.tool_config.headers {
            request = request.header(k, v);
        }
        if !self.config.auth_token.is_empty() {
            request = request.header(
                "Authorization",
                format!("Bearer {}", self.config.auth_token),
            );
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("Error executing HTTP request: {}", e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.as_u16() >= 400 {
            return Err(format!("HTTP Error {}: {}", status.as_u16(), body));
        }
        Ok(body)
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn start(
        &self,
        cancel: CancellationToken,
        on_message: MessageCallback,
        on_ready: ReadyCallback,
    ) -> AppResult<()> {
        *self.on_message.write() = Some(on_message);

        // Virtual server: ready immediately, then park until torn down.
        on_ready();

        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = self.closed.cancelled() => {}
        }
        Ok(())
    }

    async fn send(&self, payload: &[u8]) -> AppResult<()> {
        let request: JsonRpcRequest = serde_json::from_slice(payload)
            .map_err(|e| AppError::Transport(format!("invalid JSON-RPC payload: {}", e)))?;

        match request.method.as_str() {
            "initialize" => self.handle_initialize(request.id),
            "notifications/initialized" => {}
            "ping" => self.reply(request.id, json!("pong")),
            "tools/list" => self.handle_tools_list(request.id),
            "tools/call" => self.handle_tools_call(request.id, request.params).await,
            // Unknown methods are swallowed; the wrapper only speaks
            // the discovery/invocation subset.
            _ => {}
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}
