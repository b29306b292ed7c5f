//! Admin REST API
//!
//! JWT-protected CRUD over upstream servers and API keys, dashboard
//! login, and the permission-free tool listing. Every server mutation
//! triggers an upstream reload.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use om_mcp::transport::validate_command;
use om_types::{ApiKey, TransportType, UpstreamServerConfig};

use crate::auth;
use crate::middleware::admin_auth::AdminContext;
use crate::middleware::error::ApiErrorResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(credentials): Json<LoginRequest>,
) -> Response {
    let admin = match state.store.find_admin(&credentials.username) {
        Ok(Some(admin)) => admin,
        Ok(None) => {
            return ApiErrorResponse::unauthorized("Invalid credentials").into_response()
        }
        Err(e) => {
            tracing::error!("admin lookup failed: {}", e);
            return ApiErrorResponse::internal_error("login failed").into_response();
        }
    };

    if !auth::verify_password(&credentials.password, &admin.password) {
        return ApiErrorResponse::unauthorized("Invalid credentials").into_response();
    }

    match auth::issue_token(&state.config.jwt_secret, &admin.username) {
        Ok(token) => Json(json!({ "token": token })).into_response(),
        Err(e) => {
            tracing::error!("token issue failed: {}", e);
            ApiErrorResponse::internal_error("Failed to generate token").into_response()
        }
    }
}

/// Reject configs the gateway cannot safely run.
fn validate_server(config: &UpstreamServerConfig) -> Result<(), ApiErrorResponse> {
    if config.name.trim().is_empty() {
        return Err(ApiErrorResponse::bad_request("Server name is required"));
    }
    // `__` is the namespace separator in prefixed tool names.
    if config.name.contains("__") {
        return Err(ApiErrorResponse::bad_request(
            "Server name must not contain '__'",
        ));
    }
    if config.transport_type == TransportType::Stdio {
        let args = config
            .parsed_args()
            .map_err(|e| ApiErrorResponse::bad_request(e.to_string()))?;
        validate_command(&config.command, &args)
            .map_err(|e| ApiErrorResponse::bad_request(e.to_string()))?;
    }
    Ok(())
}

pub async fn list_servers(State(state): State<AppState>) -> Response {
    match state.store.list_servers() {
        Ok(servers) => Json(servers).into_response(),
        Err(e) => ApiErrorResponse::internal_error(e.to_string()).into_response(),
    }
}

pub async fn create_server(
    State(state): State<AppState>,
    Json(config): Json<UpstreamServerConfig>,
) -> Response {
    if let Err(e) = validate_server(&config) {
        return e.into_response();
    }

    let created = match state.store.create_server(&config) {
        Ok(created) => created,
        Err(e) => return ApiErrorResponse::bad_request(e.to_string()).into_response(),
    };

    if let Err(e) = state.reload_gateway() {
        tracing::error!("upstream reload failed: {}", e);
    }
    Json(created).into_response()
}

pub async fn update_server(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(config): Json<UpstreamServerConfig>,
) -> Response {
    match state.store.get_server(id) {
        Ok(Some(_)) => {}
        Ok(None) => return ApiErrorResponse::not_found("not found").into_response(),
        Err(e) => return ApiErrorResponse::internal_error(e.to_string()).into_response(),
    }

    if let Err(e) = validate_server(&config) {
        return e.into_response();
    }

    if let Err(e) = state.store.update_server(id, &config) {
        return ApiErrorResponse::bad_request(e.to_string()).into_response();
    }

    if let Err(e) = state.reload_gateway() {
        tracing::error!("upstream reload failed: {}", e);
    }

    match state.store.get_server(id) {
        Ok(Some(server)) => Json(server).into_response(),
        _ => ApiErrorResponse::internal_error("reload after update failed").into_response(),
    }
}

pub async fn delete_server(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    if let Err(e) = state.store.delete_server(id) {
        return ApiErrorResponse::internal_error(e.to_string()).into_response();
    }
    if let Err(e) = state.reload_gateway() {
        tracing::error!("upstream reload failed: {}", e);
    }
    Json(json!({ "status": "ok" })).into_response()
}

pub async fn list_keys(State(state): State<AppState>) -> Response {
    match state.store.list_keys() {
        Ok(keys) => Json(keys).into_response(),
        Err(e) => ApiErrorResponse::internal_error(e.to_string()).into_response(),
    }
}

pub async fn create_key(State(state): State<AppState>, Json(mut key): Json<ApiKey>) -> Response {
    if key.key.is_empty() {
        key.key = format!("sk-{}", Uuid::new_v4());
    }
    match state.store.create_key(&key) {
        Ok(created) => Json(created).into_response(),
        Err(e) => ApiErrorResponse::bad_request(e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateKeyRequest {
    #[serde(default)]
    description: String,
    #[serde(default)]
    allowed_servers: String,
    #[serde(default)]
    allowed_tools: String,
}

pub async fn update_key(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<UpdateKeyRequest>,
) -> Response {
    match state.store.update_key(
        id,
        &update.description,
        &update.allowed_servers,
        &update.allowed_tools,
    ) {
        Ok(updated) => Json(updated).into_response(),
        Err(e) => ApiErrorResponse::not_found(e.to_string()).into_response(),
    }
}

pub async fn delete_key(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.delete_key(id) {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(e) => ApiErrorResponse::internal_error(e.to_string()).into_response(),
    }
}

pub async fn list_all_tools(State(state): State<AppState>) -> Response {
    match state.gateway.get_all_tools().await {
        Ok(tools) => Json(tools).into_response(),
        Err(e) => ApiErrorResponse::internal_error(e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    old_password: String,
    new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Json(request): Json<ChangePasswordRequest>,
) -> Response {
    let account = match state.store.find_admin(&admin.username) {
        Ok(Some(account)) => account,
        Ok(None) => return ApiErrorResponse::not_found("User not found").into_response(),
        Err(e) => return ApiErrorResponse::internal_error(e.to_string()).into_response(),
    };

    if !auth::verify_password(&request.old_password, &account.password) {
        return ApiErrorResponse::bad_request("Incorrect old password").into_response();
    }

    let hash = match auth::hash_password(&request.new_password) {
        Ok(hash) => hash,
        Err(e) => return ApiErrorResponse::internal_error(e.to_string()).into_response(),
    };

    match state.store.update_admin_password(&admin.username, &hash) {
        Ok(()) => Json(json!({
            "status": "ok",
            "message": "Password changed successfully"
        }))
        .into_response(),
        Err(e) => ApiErrorResponse::internal_error(e.to_string()).into_response(),
    }
}
