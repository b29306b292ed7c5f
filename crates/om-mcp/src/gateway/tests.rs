//! Gateway behavior tests against scripted upstream transports.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::protocol::{
    JsonRpcRequest, JsonRpcResponse, INVALID_PARAMS, METHOD_NOT_FOUND, SERVER_ERROR,
};
use crate::transport::testing::{test_config, MockTransport};
use crate::upstream::UpstreamClient;

use super::access_control::PermissionSet;
use super::gateway::Gateway;

/// Scripted upstream wired straight into a gateway, ready to serve.
fn mock_upstream(
    name: &str,
    id: i64,
    handler: impl Fn(&JsonRpcRequest) -> Option<JsonRpcResponse> + Send + Sync + 'static,
) -> (Arc<UpstreamClient>, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new(handler));
    let client = Arc::new(UpstreamClient::with_transport(
        test_config(name, id),
        transport.clone(),
    ));
    let delivery = client.clone();
    transport.set_on_message(Arc::new(move |bytes| delivery.deliver_raw(&bytes)));
    client.force_ready();
    (client, transport)
}

/// Upstream advertising a fixed single-page tool catalog.
fn catalog_upstream(name: &str, id: i64, tools: Vec<Value>) -> (Arc<UpstreamClient>, Arc<MockTransport>) {
    mock_upstream(name, id, move |req| {
        let id = req.id.clone()?;
        match req.method.as_str() {
            "tools/list" => Some(JsonRpcResponse::success(
                id,
                json!({ "tools": tools.clone(), "nextCursor": "" }),
            )),
            "tools/call" => Some(JsonRpcResponse::success(
                id,
                json!({ "content": [{ "type": "text", "text": "done" }] }),
            )),
            _ => Some(JsonRpcResponse::success(id, json!({}))),
        }
    })
}

async fn dispatch(
    gateway: &Gateway,
    permissions: &PermissionSet,
    request: Value,
) -> Option<JsonRpcResponse> {
    gateway
        .handle_message(request.to_string().as_bytes(), permissions)
        .await
        .unwrap()
}

fn tool_names(response: &JsonRpcResponse) -> Vec<String> {
    response.result.as_ref().unwrap()["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_initialize_succeeds_without_upstreams() {
    let gateway = Gateway::new();
    let response = dispatch(
        &gateway,
        &PermissionSet::allow_all(),
        json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"}),
    )
    .await
    .unwrap();

    let result = response.result.unwrap();
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert_eq!(result["serverInfo"]["name"], "one-mcp-gateway");
    assert_eq!(result["serverInfo"]["version"], "1.1.1");
    assert_eq!(result["capabilities"]["tools"]["listChanged"], true);
    assert_eq!(result["capabilities"]["resources"]["subscribe"], false);
}

#[tokio::test]
async fn test_tools_list_with_zero_upstreams_is_empty() {
    let gateway = Gateway::new();
    let response = dispatch(
        &gateway,
        &PermissionSet::allow_all(),
        json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
    )
    .await
    .unwrap();

    assert_eq!(response.result.unwrap(), json!({"tools": []}));
}

#[tokio::test]
async fn test_namespace_rewrite_and_strip() {
    let gateway = Gateway::new();
    let (client, transport) = catalog_upstream(
        "fs",
        1,
        vec![json!({"name": "read"}), json!({"name": "write"})],
    );
    gateway.insert_for_test(client);

    let response = dispatch(
        &gateway,
        &PermissionSet::allow_all(),
        json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"}),
    )
    .await
    .unwrap();
    let names = tool_names(&response);
    assert!(names.contains(&"fs__read".to_string()));
    assert!(names.contains(&"fs__write".to_string()));

    let response = dispatch(
        &gateway,
        &PermissionSet::allow_all(),
        json!({
            "jsonrpc": "2.0", "id": 4, "method": "tools/call",
            "params": {"name": "fs__read", "arguments": {"path": "/x"}}
        }),
    )
    .await
    .unwrap();
    assert!(response.error.is_none());
    assert_eq!(response.id, json!(4));

    // The upstream saw the stripped name and untouched arguments.
    let forwarded = transport
        .sent_requests()
        .into_iter()
        .find(|r| r.method == "tools/call")
        .unwrap();
    let params = forwarded.params.unwrap();
    assert_eq!(params["name"], "read");
    assert_eq!(params["arguments"], json!({"path": "/x"}));
}

#[tokio::test]
async fn test_tool_level_permissions_filter_and_deny() {
    let gateway = Gateway::new();
    let (client, _) = catalog_upstream(
        "fs",
        1,
        vec![json!({"name": "read"}), json!({"name": "write"})],
    );
    gateway.insert_for_test(client);

    let perms = PermissionSet::new(Vec::new(), Some(vec!["fs__read".to_string()]));

    let response = dispatch(
        &gateway,
        &perms,
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
    )
    .await
    .unwrap();
    assert_eq!(tool_names(&response), vec!["fs__read"]);

    let response = dispatch(
        &gateway,
        &perms,
        json!({
            "jsonrpc": "2.0", "id": 2, "method": "tools/call",
            "params": {"name": "fs__write", "arguments": {}}
        }),
    )
    .await
    .unwrap();
    let error = response.error.unwrap();
    assert_eq!(error.code, SERVER_ERROR);
    assert_eq!(error.message, "Permission denied");
}

#[tokio::test]
async fn test_server_level_permissions_filter_listing() {
    let gateway = Gateway::new();
    let (fs, _) = catalog_upstream("fs", 1, vec![json!({"name": "read"})]);
    let (git, _) = catalog_upstream("git", 2, vec![json!({"name": "log"})]);
    gateway.insert_for_test(fs);
    gateway.insert_for_test(git);

    let perms = PermissionSet::new(vec!["1".to_string()], None);
    let response = dispatch(
        &gateway,
        &perms,
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
    )
    .await
    .unwrap();
    assert_eq!(tool_names(&response), vec!["fs__read"]);
}

#[tokio::test]
async fn test_pagination_follows_next_cursor() {
    let gateway = Gateway::new();
    let (client, _) = mock_upstream("u", 1, |req| {
        let id = req.id.clone()?;
        if req.method != "tools/list" {
            return Some(JsonRpcResponse::success(id, json!({})));
        }
        let cursor = req
            .params
            .as_ref()
            .and_then(|p| p.get("cursor"))
            .and_then(|c| c.as_str())
            .unwrap_or("");
        let page = match cursor {
            "" => json!({"tools": [{"name": "a"}], "nextCursor": "p2"}),
            "p2" => json!({"tools": [{"name": "b"}], "nextCursor": ""}),
            other => panic!("unexpected cursor {other}"),
        };
        Some(JsonRpcResponse::success(id, page))
    });
    gateway.insert_for_test(client);

    let response = dispatch(
        &gateway,
        &PermissionSet::allow_all(),
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
    )
    .await
    .unwrap();
    assert_eq!(tool_names(&response), vec!["u__a", "u__b"]);
}

#[tokio::test]
async fn test_strict_upstream_fallback_to_empty_object() {
    let gateway = Gateway::new();
    // Refuses a missing params field, accepts {}.
    let (client, _) = mock_upstream("u", 1, |req| {
        let id = req.id.clone()?;
        if req.method != "tools/list" {
            return Some(JsonRpcResponse::success(id, json!({})));
        }
        match &req.params {
            None => Some(JsonRpcResponse::error(
                id,
                crate::protocol::JsonRpcError::invalid_params("params required"),
            )),
            Some(_) => Some(JsonRpcResponse::success(
                id,
                json!({"tools": [{"name": "a"}], "nextCursor": ""}),
            )),
        }
    });
    gateway.insert_for_test(client);

    let response = dispatch(
        &gateway,
        &PermissionSet::allow_all(),
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
    )
    .await
    .unwrap();
    assert_eq!(tool_names(&response), vec!["u__a"]);
}

#[tokio::test]
async fn test_fallback_ladder_reaches_null_cursor_shape() {
    let gateway = Gateway::new();
    // Accepts only the explicit {"cursor": null} shape.
    let (client, _) = mock_upstream("u", 1, |req| {
        let id = req.id.clone()?;
        if req.method != "tools/list" {
            return Some(JsonRpcResponse::success(id, json!({})));
        }
        let accepts = matches!(
            &req.params,
            Some(p) if p.get("cursor").map(Value::is_null).unwrap_or(false)
        );
        if accepts {
            Some(JsonRpcResponse::success(
                id,
                json!({"tools": [{"name": "a"}], "nextCursor": ""}),
            ))
        } else {
            Some(JsonRpcResponse::error(
                id,
                crate::protocol::JsonRpcError::invalid_params("strict"),
            ))
        }
    });
    gateway.insert_for_test(client);

    let response = dispatch(
        &gateway,
        &PermissionSet::allow_all(),
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
    )
    .await
    .unwrap();
    assert_eq!(tool_names(&response), vec!["u__a"]);
}

#[tokio::test]
async fn test_hopeless_upstream_contributes_nothing_without_failing_others() {
    let gateway = Gateway::new();
    // -32602 to every param shape.
    let (broken, _) = mock_upstream("broken", 1, |req| {
        let id = req.id.clone()?;
        Some(JsonRpcResponse::error(
            id,
            crate::protocol::JsonRpcError::invalid_params("never"),
        ))
    });
    let (healthy, _) = catalog_upstream("b", 2, vec![json!({"name": "t"})]);
    gateway.insert_for_test(broken);
    gateway.insert_for_test(healthy);

    let response = dispatch(
        &gateway,
        &PermissionSet::allow_all(),
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
    )
    .await
    .unwrap();
    assert_eq!(tool_names(&response), vec!["b__t"]);
    assert!(response.error.is_none());
}

#[tokio::test]
async fn test_unready_upstream_is_isolated() {
    let gateway = Gateway::new();

    // Never marked ready, so its calls are rejected client-side.
    let transport = Arc::new(MockTransport::silent());
    let dead = Arc::new(UpstreamClient::with_transport(
        test_config("a", 1),
        transport,
    ));
    let (healthy, _) = catalog_upstream("b", 2, vec![json!({"name": "t"})]);
    gateway.insert_for_test(dead);
    gateway.insert_for_test(healthy);

    let response = dispatch(
        &gateway,
        &PermissionSet::allow_all(),
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
    )
    .await
    .unwrap();
    assert_eq!(tool_names(&response), vec!["b__t"]);
}

#[tokio::test]
async fn test_invalid_tool_name_format() {
    let gateway = Gateway::new();
    let response = dispatch(
        &gateway,
        &PermissionSet::allow_all(),
        json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/call",
            "params": {"name": "no_namespace", "arguments": {}}
        }),
    )
    .await
    .unwrap();
    let error = response.error.unwrap();
    assert_eq!(error.code, INVALID_PARAMS);
    assert_eq!(error.message, "Invalid tool name format");
}

#[tokio::test]
async fn test_unknown_upstream_is_reported() {
    let gateway = Gateway::new();
    let response = dispatch(
        &gateway,
        &PermissionSet::allow_all(),
        json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/call",
            "params": {"name": "ghost__tool", "arguments": {}}
        }),
    )
    .await
    .unwrap();
    let error = response.error.unwrap();
    assert_eq!(error.code, INVALID_PARAMS);
    assert_eq!(error.message, "Server not found");
}

#[tokio::test]
async fn test_call_error_from_upstream_is_forwarded_verbatim() {
    let gateway = Gateway::new();
    let (client, _) = mock_upstream("u", 1, |req| {
        let id = req.id.clone()?;
        match req.method.as_str() {
            "tools/call" => Some(JsonRpcResponse::error(
                id,
                crate::protocol::JsonRpcError::new(-32050, "tool blew up"),
            )),
            _ => Some(JsonRpcResponse::success(id, json!({}))),
        }
    });
    gateway.insert_for_test(client);

    let response = dispatch(
        &gateway,
        &PermissionSet::allow_all(),
        json!({
            "jsonrpc": "2.0", "id": 77, "method": "tools/call",
            "params": {"name": "u__t", "arguments": {}}
        }),
    )
    .await
    .unwrap();

    // Upstream's own error passes through, re-correlated downstream.
    assert_eq!(response.id, json!(77));
    let error = response.error.unwrap();
    assert_eq!(error.code, -32050);
    assert_eq!(error.message, "tool blew up");
}

#[tokio::test]
async fn test_call_transport_failure_maps_to_server_error() {
    let gateway = Gateway::new();

    // Never initialized, so the client rejects the call immediately.
    let transport = Arc::new(MockTransport::silent());
    let client = Arc::new(UpstreamClient::with_transport(
        test_config("u", 1),
        transport,
    ));
    gateway.insert_for_test(client);

    let response = dispatch(
        &gateway,
        &PermissionSet::allow_all(),
        json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/call",
            "params": {"name": "u__t", "arguments": {}}
        }),
    )
    .await
    .unwrap();
    let error = response.error.unwrap();
    assert_eq!(error.code, SERVER_ERROR);
    assert!(error.message.contains("not ready"));
}

#[tokio::test]
async fn test_call_tool_alias_routes() {
    let gateway = Gateway::new();
    let (client, transport) = catalog_upstream("fs", 1, vec![json!({"name": "read"})]);
    gateway.insert_for_test(client);

    let response = dispatch(
        &gateway,
        &PermissionSet::allow_all(),
        json!({
            "jsonrpc": "2.0", "id": 1, "method": "callTool",
            "params": {"name": "fs__read", "arguments": {}}
        }),
    )
    .await
    .unwrap();
    assert!(response.error.is_none());
    assert!(transport
        .sent_requests()
        .iter()
        .any(|r| r.method == "tools/call"));
}

#[tokio::test]
async fn test_housekeeping_methods() {
    let gateway = Gateway::new();
    let perms = PermissionSet::allow_all();

    let response = dispatch(
        &gateway,
        &perms,
        json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}),
    )
    .await
    .unwrap();
    assert_eq!(response.result.unwrap(), json!({}));

    let response = dispatch(
        &gateway,
        &perms,
        json!({"jsonrpc": "2.0", "id": 2, "method": "logging/setLevel", "params": {"level": "debug"}}),
    )
    .await
    .unwrap();
    assert_eq!(response.result.unwrap(), json!({}));

    let response = dispatch(
        &gateway,
        &perms,
        json!({"jsonrpc": "2.0", "id": 3, "method": "completion/complete"}),
    )
    .await
    .unwrap();
    assert_eq!(
        response.result.unwrap(),
        json!({"completion": {"values": [], "total": 0, "hasMore": false}})
    );

    let none = dispatch(
        &gateway,
        &perms,
        json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
    )
    .await;
    assert!(none.is_none());

    let response = dispatch(
        &gateway,
        &perms,
        json!({"jsonrpc": "2.0", "id": 4, "method": "resources/list"}),
    )
    .await
    .unwrap();
    let error = response.error.unwrap();
    assert_eq!(error.code, METHOD_NOT_FOUND);
    assert_eq!(error.message, "Method not supported");
}

#[tokio::test]
async fn test_parse_failure_is_an_error_not_a_response() {
    let gateway = Gateway::new();
    let result = gateway
        .handle_message(b"not json at all", &PermissionSet::allow_all())
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_get_all_tools_bypasses_permissions() {
    let gateway = Gateway::new();
    let (client, _) = catalog_upstream("fs", 1, vec![json!({"name": "read"})]);
    gateway.insert_for_test(client);

    let tools = gateway.get_all_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "fs__read");
}
