//! Downstream SSE + message endpoint integration tests.

mod common;

use std::time::Duration;

use common::spawn_app;
use futures::StreamExt;
use serde_json::json;

use om_types::ApiKey;

fn test_key(key: &str, allowed_tools: &str) -> ApiKey {
    ApiKey {
        id: 0,
        key: key.to_string(),
        description: "test".to_string(),
        allowed_servers: String::new(),
        allowed_tools: allowed_tools.to_string(),
        created_at: None,
        updated_at: None,
    }
}

/// Accumulate SSE bytes until the buffer contains `needle`.
async fn read_until(
    stream: &mut (impl futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin),
    buffer: &mut String,
    needle: &str,
) {
    let deadline = Duration::from_secs(10);
    tokio::time::timeout(deadline, async {
        while !buffer.contains(needle) {
            let chunk = stream
                .next()
                .await
                .expect("stream ended early")
                .expect("stream error");
            buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {:?} in {:?}", needle, buffer));
}

fn extract_session_id(buffer: &str) -> String {
    let start = buffer.find("sessionId=").expect("endpoint event") + "sessionId=".len();
    buffer[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}

#[tokio::test]
async fn test_sse_requires_valid_api_key() {
    let (base, state) = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/mcp/sse", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    state.store.create_key(&test_key("sk-live", "")).unwrap();

    let response = client
        .get(format!("{}/mcp/sse", base))
        .bearer_auth("sk-wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = client
        .get(format!("{}/mcp/sse", base))
        .bearer_auth("sk-live")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
}

#[tokio::test]
async fn test_endpoint_event_then_initialize_roundtrip() {
    let (base, state) = spawn_app().await;
    state.store.create_key(&test_key("sk-live", "")).unwrap();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/mcp/sse", base))
        .bearer_auth("sk-live")
        .send()
        .await
        .unwrap();
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    // First emission is the endpoint event with the POST URL
    read_until(&mut stream, &mut buffer, "sessionId=").await;
    assert!(buffer.contains("event: endpoint"));
    assert!(buffer.contains("/mcp/messages?sessionId="));
    let session_id = extract_session_id(&buffer);
    assert_eq!(session_id.len(), 36);

    // Downstream initialize flows through the gateway and back out
    // over the SSE channel
    let response = client
        .post(format!("{}/mcp/messages?sessionId={}", base, session_id))
        .body(
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"}).to_string(),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);

    read_until(&mut stream, &mut buffer, "serverInfo").await;
    assert!(buffer.contains("event: message"));
    assert!(buffer.contains("one-mcp-gateway"));

    // Notifications produce no response event
    let response = client
        .post(format!("{}/mcp/messages?sessionId={}", base, session_id))
        .body(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);

    // tools/list with zero upstreams is an empty catalog
    let response = client
        .post(format!("{}/mcp/messages?sessionId={}", base, session_id))
        .body(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);
    read_until(&mut stream, &mut buffer, "\"tools\":[]").await;
}

#[tokio::test]
async fn test_messages_unknown_session_is_404() {
    let (base, _state) = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!(
            "{}/mcp/messages?sessionId=00000000-0000-0000-0000-000000000000",
            base
        ))
        .body(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_invalid_body_is_500() {
    let (base, state) = spawn_app().await;
    state.store.create_key(&test_key("sk-live", "")).unwrap();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/mcp/sse", base))
        .bearer_auth("sk-live")
        .send()
        .await
        .unwrap();
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    read_until(&mut stream, &mut buffer, "sessionId=").await;
    let session_id = extract_session_id(&buffer);

    let response = client
        .post(format!("{}/mcp/messages?sessionId={}", base, session_id))
        .body("this is not json-rpc")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
}

#[tokio::test]
async fn test_session_is_removed_on_disconnect() {
    let (base, state) = spawn_app().await;
    state.store.create_key(&test_key("sk-live", "")).unwrap();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/mcp/sse", base))
        .bearer_auth("sk-live")
        .send()
        .await
        .unwrap();
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    read_until(&mut stream, &mut buffer, "sessionId=").await;
    assert_eq!(state.sessions.len(), 1);

    drop(stream);

    // The writer notices the hangup and deregisters the session.
    tokio::time::timeout(Duration::from_secs(5), async {
        while !state.sessions.is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("session should be deregistered after disconnect");
}

#[tokio::test]
async fn test_origin_header_is_mirrored() {
    let (base, state) = spawn_app().await;
    state.store.create_key(&test_key("sk-live", "")).unwrap();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/mcp/sse", base))
        .bearer_auth("sk-live")
        .header("Origin", "http://dashboard.example")
        .send()
        .await
        .unwrap();
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "http://dashboard.example"
    );
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-credentials")
            .unwrap(),
        "true"
    );
}
