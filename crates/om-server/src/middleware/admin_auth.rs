//! JWT authentication for the admin API.
//!
//! Expects `Authorization: Bearer <jwt>` issued by `/api/login`. On
//! success the admin's username is attached to request extensions.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::auth;
use crate::middleware::error::ApiErrorResponse;
use crate::state::AppState;

/// Authenticated admin context for downstream handlers.
#[derive(Debug, Clone)]
pub struct AdminContext {
    pub username: String,
}

fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ")
}

pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let header = match req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
    {
        Some(h) => h,
        None => {
            return ApiErrorResponse::unauthorized("Authorization header required")
                .into_response();
        }
    };

    let token = match extract_bearer_token(header) {
        Some(t) => t,
        None => {
            return ApiErrorResponse::unauthorized("Invalid Authorization header format")
                .into_response();
        }
    };

    let username = match auth::verify_token(&state.config.jwt_secret, token) {
        Some(u) => u,
        None => {
            return ApiErrorResponse::unauthorized("Invalid or expired token").into_response();
        }
    };

    req.extensions_mut().insert(AdminContext { username });
    next.run(req).await
}
