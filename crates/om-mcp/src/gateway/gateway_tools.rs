//! Tool aggregation and call routing
//!
//! `tools/list` fans out to every upstream in parallel, follows
//! pagination with a fallback ladder for strict servers, rewrites
//! tool names to `<upstream>__<tool>`, and filters by permission.
//! `tools/call` reverses the rewrite and forwards to one upstream.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use om_types::{AppError, AppResult};

use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, INVALID_PARAMS};
use crate::upstream::UpstreamClient;

use super::access_control::PermissionSet;
use super::gateway::Gateway;

/// Separator between the upstream name and the original tool name.
pub const NAMESPACE_SEPARATOR: &str = "__";

/// One page of a paginated `tools/list` result.
#[derive(Debug, Deserialize)]
struct ToolsPage {
    #[serde(default)]
    tools: Vec<Value>,

    #[serde(default, rename = "nextCursor")]
    next_cursor: String,
}

impl Gateway {
    /// Aggregate `tools/list` across every upstream.
    ///
    /// Upstream failures contribute nothing but never fail the
    /// listing as a whole.
    pub(crate) async fn handle_tools_list(
        &self,
        id: Value,
        permissions: &PermissionSet,
    ) -> JsonRpcResponse {
        let clients = self.snapshot();

        let fetches = clients.iter().map(|client| {
            let client = client.clone();
            async move {
                match fetch_upstream_tools(&client).await {
                    Ok(tools) => tools,
                    Err(e) => {
                        tracing::warn!(
                            upstream = %client.name(),
                            "tools/list contribution dropped: {}",
                            e
                        );
                        Vec::new()
                    }
                }
            }
        });
        let pages = futures::future::join_all(fetches).await;

        let mut all_tools: Vec<Value> = Vec::new();
        for (client, tools) in clients.iter().zip(pages) {
            let server_id = client.server_id();
            for mut tool in tools {
                let Some(name) = tool.get("name").and_then(|n| n.as_str()) else {
                    continue;
                };
                let prefixed = format!("{}{}{}", client.name(), NAMESPACE_SEPARATOR, name);
                if !permissions.allows(&server_id, &prefixed) {
                    continue;
                }
                if let Some(obj) = tool.as_object_mut() {
                    obj.insert("name".to_string(), json!(prefixed));
                    all_tools.push(tool);
                }
            }
        }

        tracing::debug!("aggregated {} tools", all_tools.len());
        JsonRpcResponse::success(id, json!({ "tools": all_tools }))
    }

    /// Route a `tools/call` to the upstream named by the prefix.
    pub(crate) async fn handle_tools_call(
        &self,
        id: Value,
        request: JsonRpcRequest,
        permissions: &PermissionSet,
    ) -> JsonRpcResponse {
        #[derive(Deserialize)]
        struct CallParams {
            name: String,
            #[serde(default)]
            arguments: Value,
        }

        let params: CallParams = match request.params.map(serde_json::from_value).transpose() {
            Ok(Some(p)) => p,
            _ => {
                return JsonRpcResponse::error(
                    id,
                    JsonRpcError::invalid_params("Missing tool name in params"),
                );
            }
        };

        let Some((upstream_name, tool_name)) = params.name.split_once(NAMESPACE_SEPARATOR) else {
            return JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_params("Invalid tool name format"),
            );
        };

        let Some(client) = self.get_upstream(upstream_name) else {
            return JsonRpcResponse::error(id, JsonRpcError::invalid_params("Server not found"));
        };

        if !permissions.allows(&client.server_id(), &params.name) {
            tracing::warn!(
                tool = %params.name,
                server_id = %client.server_id(),
                "permission denied"
            );
            return JsonRpcResponse::error(id, JsonRpcError::server_error("Permission denied"));
        }

        let upstream_params = json!({
            "name": tool_name,
            "arguments": params.arguments,
        });

        match client.call("tools/call", Some(upstream_params)).await {
            Ok(mut response) => {
                if let Some(error) = &response.error {
                    tracing::warn!(
                        upstream = %client.name(),
                        code = error.code,
                        "upstream returned error: {}",
                        error.message
                    );
                }
                // Pass through verbatim, re-correlated to the
                // downstream request.
                response.id = id;
                response
            }
            Err(e) => JsonRpcResponse::error(id, JsonRpcError::server_error(e.to_string())),
        }
    }

    /// Permission-free aggregation for the admin tool listing.
    pub async fn get_all_tools(&self) -> AppResult<Vec<Value>> {
        let response = self
            .handle_tools_list(json!(0), &PermissionSet::allow_all())
            .await;

        if let Some(error) = response.error {
            return Err(AppError::Internal(format!("rpc error: {}", error.message)));
        }

        let tools = response
            .result
            .and_then(|mut r| r.get_mut("tools").map(Value::take))
            .and_then(|t| match t {
                Value::Array(tools) => Some(tools),
                _ => None,
            })
            .unwrap_or_default();
        Ok(tools)
    }
}

/// Fetch every page of one upstream's tool catalog.
///
/// The first page is requested with no `params` at all; strict
/// servers that answer `-32602` get `{}` and then `{"cursor": null}`
/// before the upstream is given up on.
async fn fetch_upstream_tools(client: &Arc<UpstreamClient>) -> AppResult<Vec<Value>> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let mut response = match &cursor {
            None => client.call("tools/list", None).await?,
            Some(c) => {
                client
                    .call("tools/list", Some(json!({ "cursor": c })))
                    .await?
            }
        };

        if let Some(error) = &response.error {
            if cursor.is_none() && error.code == INVALID_PARAMS {
                tracing::debug!(
                    upstream = %client.name(),
                    "refused missing params, retrying with {{}}"
                );
                response = client.call("tools/list", Some(json!({}))).await?;

                let still_invalid = response
                    .error
                    .as_ref()
                    .is_some_and(|e| e.code == INVALID_PARAMS);
                if still_invalid {
                    tracing::debug!(
                        upstream = %client.name(),
                        "refused {{}}, retrying with null cursor"
                    );
                    response = client
                        .call("tools/list", Some(json!({ "cursor": null })))
                        .await?;
                }

                if let Some(error) = &response.error {
                    return Err(AppError::Upstream(format!(
                        "tools/list rejected every param shape ({}): {}",
                        error.code, error.message
                    )));
                }
            } else {
                return Err(AppError::Upstream(format!(
                    "tools/list failed ({}): {}",
                    error.code, error.message
                )));
            }
        }

        let page: ToolsPage = match response.result {
            None | Some(Value::Null) => break,
            Some(result) => serde_json::from_value(result)
                .map_err(|e| AppError::Upstream(format!("malformed tools/list result: {}", e)))?,
        };

        tools.extend(page.tools);

        if page.next_cursor.is_empty() {
            break;
        }
        cursor = Some(page.next_cursor);
    }

    Ok(tools)
}
