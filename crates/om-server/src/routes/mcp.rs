//! Downstream MCP endpoints
//!
//! `GET /mcp/sse` authenticates an API key, opens a session, and
//! streams gateway responses as SSE `message` events after an initial
//! `endpoint` event carrying the message-POST URL. `POST
//! /mcp/messages` feeds downstream JSON-RPC into the gateway and
//! enqueues any response onto the session's queue.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use om_mcp::gateway::PermissionSet;

use crate::middleware::error::ApiErrorResponse;
use crate::session::SessionRegistry;
use crate::state::AppState;

/// Deregisters the session when the SSE stream is dropped, however
/// the connection ends.
struct SessionGuard {
    sessions: Arc<SessionRegistry>,
    session_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.remove(&self.session_id);
        tracing::debug!(session_id = %self.session_id, "session closed");
    }
}

fn bearer_token(headers: &HeaderMap) -> &str {
    let raw = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");
    raw.strip_prefix("Bearer ").unwrap_or(raw)
}

pub async fn sse_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let token = bearer_token(&headers);
    let api_key = match state.store.find_api_key(token) {
        Ok(Some(key)) => key,
        Ok(None) => return ApiErrorResponse::unauthorized("Unauthorized").into_response(),
        Err(e) => {
            tracing::error!("api key lookup failed: {}", e);
            return ApiErrorResponse::internal_error("key lookup failed").into_response();
        }
    };

    let permissions = PermissionSet::new(
        api_key.parsed_allowed_servers(),
        api_key.parsed_allowed_tools(),
    );
    let (session_id, mut rx) = state.sessions.create(permissions);

    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    // TLS is terminated upstream of us; honor the proxy's word.
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("http");
    let endpoint = format!(
        "{}://{}/mcp/messages?sessionId={}",
        scheme, host, session_id
    );

    tracing::info!(session_id = %session_id, key = %api_key.id, "SSE session opened");

    let guard = SessionGuard {
        sessions: state.sessions.clone(),
        session_id,
    };

    let stream = async_stream::stream! {
        let _guard = guard;

        yield Ok::<_, Infallible>(Event::default().event("endpoint").data(endpoint));

        while let Some(message) = rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => yield Ok(Event::default().event("message").data(json)),
                Err(e) => tracing::error!("response serialization failed: {}", e),
            }
        }
    };

    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response();

    let response_headers = response.headers_mut();
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    match headers.get(header::ORIGIN) {
        Some(origin) => {
            response_headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
            response_headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        None => {
            response_headers.insert(
                header::ACCESS_CONTROL_ALLOW_ORIGIN,
                HeaderValue::from_static("*"),
            );
        }
    }

    response
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

pub async fn messages_handler(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
    body: Bytes,
) -> Response {
    let session = match state.sessions.get(&query.session_id) {
        Some(session) => session,
        None => return ApiErrorResponse::not_found("Session not found").into_response(),
    };

    match state
        .gateway
        .handle_message(&body, &session.permissions)
        .await
    {
        Ok(Some(response)) => {
            session.enqueue(response);
            StatusCode::ACCEPTED.into_response()
        }
        Ok(None) => StatusCode::ACCEPTED.into_response(),
        Err(e) => ApiErrorResponse::internal_error(e.to_string()).into_response(),
    }
}
