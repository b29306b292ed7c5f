//! Shared helpers for the server integration tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use om_mcp::Gateway;
use om_server::config::ServerConfig;
use om_server::state::AppState;
use om_server::{auth, build_app};
use om_store::Store;

/// Spin up a full app on an ephemeral port with an in-memory store.
/// Returns the base URL and the state for direct store access.
pub async fn spawn_app() -> (String, AppState) {
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        data_dir: std::env::temp_dir(),
        allowed_origins: None,
        web_dist: std::env::temp_dir().join("one-mcp-missing-dist"),
        jwt_secret: "integration-test-secret".to_string(),
    };

    let store = Store::open_in_memory().expect("in-memory store");
    let state = AppState::new(store, Arc::new(Gateway::new()), config);

    let app = build_app(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    (format!("http://{}", addr), state)
}

/// Seed an admin account and return a bearer token for it.
pub async fn admin_token(base: &str, state: &AppState) -> String {
    let hash = auth::hash_password("correct horse").expect("hash");
    state
        .store
        .create_admin("admin", &hash)
        .expect("seed admin");

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/api/login", base))
        .json(&serde_json::json!({"username": "admin", "password": "correct horse"}))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .expect("login request");
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.expect("login body");
    body["token"].as_str().expect("token").to_string()
}
