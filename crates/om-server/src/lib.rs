//! Web server for the one-mcp gateway
//!
//! Exposes the downstream MCP endpoints (`/mcp/sse`, `/mcp/messages`)
//! and the JWT-protected admin REST API, plus static serving for the
//! dashboard SPA.

pub mod auth;
pub mod config;
pub mod middleware;
pub mod routes;
pub mod session;
pub mod state;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};

use crate::state::AppState;

/// Build the Axum app with all routes and middleware.
pub fn build_app(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route(
            "/servers",
            get(routes::admin::list_servers).post(routes::admin::create_server),
        )
        .route(
            "/servers/{id}",
            put(routes::admin::update_server).delete(routes::admin::delete_server),
        )
        .route(
            "/keys",
            get(routes::admin::list_keys).post(routes::admin::create_key),
        )
        .route(
            "/keys/{id}",
            put(routes::admin::update_key).delete(routes::admin::delete_key),
        )
        .route("/tools", get(routes::admin::list_all_tools))
        .route("/change-password", post(routes::admin::change_password))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::admin_auth::admin_auth_middleware,
        ));

    let cors = match &state.config.allowed_origins {
        Some(origins) => {
            let origins: Vec<_> = origins
                .iter()
                .filter_map(|o| o.parse::<axum::http::HeaderValue>().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers([
                    axum::http::header::ORIGIN,
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::AUTHORIZATION,
                ])
        }
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let api_routes = Router::new()
        .route("/login", post(routes::admin::login))
        .nest("/v1", admin_routes)
        .fallback(routes::not_found)
        .layer(cors);

    // The SSE handler mirrors the Origin header itself, so the MCP
    // routes stay outside the CORS layer.
    let mcp_routes = Router::new()
        .route("/sse", get(routes::mcp::sse_handler))
        .route("/messages", post(routes::mcp::messages_handler))
        .fallback(routes::not_found);

    // Dashboard SPA: unmatched non-API paths fall through to the
    // static tree, missing files to index.html.
    let index = state.config.web_dist.join("index.html");
    let static_service = ServeDir::new(&state.config.web_dist)
        .not_found_service(ServeFile::new(index));

    Router::new()
        .nest("/api", api_routes)
        .nest("/mcp", mcp_routes)
        .fallback_service(static_service)
        .with_state(state)
}
