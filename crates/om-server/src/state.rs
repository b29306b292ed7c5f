//! Shared application state.

use std::sync::Arc;

use om_mcp::Gateway;
use om_store::Store;
use om_types::AppResult;

use crate::config::ServerConfig;
use crate::session::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub gateway: Arc<Gateway>,
    pub sessions: Arc<SessionRegistry>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(store: Store, gateway: Arc<Gateway>, config: ServerConfig) -> Self {
        Self {
            store,
            gateway,
            sessions: Arc::new(SessionRegistry::new()),
            config: Arc::new(config),
        }
    }

    /// Rebuild the gateway's upstream set from the store.
    pub fn reload_gateway(&self) -> AppResult<()> {
        let configs = self.store.list_enabled_servers()?;
        self.gateway.reload_upstreams(configs);
        Ok(())
    }
}
