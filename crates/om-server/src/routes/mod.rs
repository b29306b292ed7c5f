pub mod admin;
pub mod mcp;

use axum::response::{IntoResponse, Response};

use crate::middleware::error::ApiErrorResponse;

/// Fallback for unmatched API and MCP paths, so they never leak into
/// the SPA index fallback.
pub async fn not_found() -> Response {
    ApiErrorResponse::not_found("Not found").into_response()
}
