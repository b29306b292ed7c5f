//! one-mcp gateway server binary.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use om_mcp::Gateway;
use om_server::config::ServerConfig;
use om_server::state::AppState;
use om_server::{auth, build_app};
use om_store::Store;
use om_types::AppResult;

/// Seed the `admin`/`admin` account on first start and nag while the
/// default password is still in use.
fn bootstrap_default_admin(store: &Store) -> AppResult<()> {
    if store.count_admins()? == 0 {
        let hash = auth::hash_password("admin")?;
        store.create_admin("admin", &hash)?;
        tracing::info!("Initialized default admin user: admin / admin");
        tracing::warn!(
            "!!! WARNING: Default password is in use. Please change it immediately via the Dashboard !!!"
        );
        return Ok(());
    }

    if let Some(admin) = store.find_admin("admin")? {
        if auth::verify_password("admin", &admin.password) {
            tracing::warn!(
                "!!! SECURITY WARNING: Default admin account still uses password 'admin'. Please change it immediately !!!"
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> AppResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Store::open(&config.data_dir.join("one-mcp.db"))?;
    bootstrap_default_admin(&store)?;

    if config.allowed_origins.is_none() {
        tracing::warn!(
            "ALLOWED_ORIGINS not set, allowing all origins (CORS). This is insecure for production."
        );
    }

    let gateway = Arc::new(Gateway::new());
    let state = AppState::new(store, gateway.clone(), config.clone());
    state.reload_gateway()?;

    let app = build_app(state);

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    tracing::info!("listening on http://{}:{}", config.host, config.port);

    axum::serve(listener, app).await?;

    gateway.shutdown();
    Ok(())
}
