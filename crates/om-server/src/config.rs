//! Environment-driven server configuration.

use std::env;
use std::path::PathBuf;

/// Development fallback; override with `JWT_SECRET` in any real
/// deployment.
const DEFAULT_JWT_SECRET: &str = "one-mcp-secret-key-change-me";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Directory holding the SQLite database.
    pub data_dir: PathBuf,

    /// Comma-separated CORS allowlist; `None` means permissive.
    pub allowed_origins: Option<Vec<String>>,

    /// Built dashboard assets.
    pub web_dist: PathBuf,

    pub jwt_secret: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            data_dir: PathBuf::from("data"),
            allowed_origins: None,
            web_dist: PathBuf::from("../web/dist"),
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let allowed_origins = env::var("ALLOWED_ORIGINS").ok().and_then(|raw| {
            let origins: Vec<String> = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if origins.is_empty() {
                None
            } else {
                Some(origins)
            }
        });

        Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            allowed_origins,
            web_dist: env::var("WEB_DIST")
                .map(PathBuf::from)
                .unwrap_or(defaults.web_dist),
            jwt_secret: env::var("JWT_SECRET").unwrap_or(defaults.jwt_secret),
        }
    }
}
