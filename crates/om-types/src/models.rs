//! Persistent data model for the gateway.
//!
//! `args`, `env`, and `tool_config` are stored and transported as
//! JSON-serialized strings, mirroring what the admin API accepts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

/// Transport style used to reach an upstream server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    #[default]
    Sse,
    Stdio,
    Http,
}

/// Configuration for one upstream MCP server.
///
/// `name` is unique across non-deleted rows and is used both as the
/// map key and as the tool-name prefix, so it must not contain the
/// `__` namespace separator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamServerConfig {
    #[serde(default)]
    pub id: i64,

    pub name: String,

    #[serde(default)]
    pub transport_type: TransportType,

    /// SSE endpoint URL, or the wrapped REST endpoint for `http`.
    #[serde(default)]
    pub url: String,

    /// Optional bearer token presented to the upstream.
    #[serde(default)]
    pub auth_token: String,

    /// Executable for `stdio` transports.
    #[serde(default)]
    pub command: String,

    /// JSON array of argument strings.
    #[serde(default)]
    pub args: String,

    /// JSON object of environment variables.
    #[serde(default)]
    pub env: String,

    /// JSON tool definition for `http` transports.
    #[serde(default)]
    pub tool_config: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl UpstreamServerConfig {
    /// Decode the `args` column into an argument vector.
    pub fn parsed_args(&self) -> AppResult<Vec<String>> {
        if self.args.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&self.args)
            .map_err(|e| AppError::Config(format!("invalid args for '{}': {}", self.name, e)))
    }

    /// Decode the `env` column into an environment map.
    pub fn parsed_env(&self) -> AppResult<HashMap<String, String>> {
        if self.env.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&self.env)
            .map_err(|e| AppError::Config(format!("invalid env for '{}': {}", self.name, e)))
    }

    /// Decimal string form of the row id, used in permission checks.
    pub fn server_id(&self) -> String {
        self.id.to_string()
    }
}

/// Downstream API key with its permission encoding.
///
/// Exactly one of the two encodings applies: a non-empty
/// `allowed_tools` column is authoritative, otherwise
/// `allowed_servers` is consulted (empty list meaning "allow all").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    #[serde(default)]
    pub id: i64,

    pub key: String,

    #[serde(default)]
    pub description: String,

    /// JSON list of stringified upstream server ids.
    #[serde(default)]
    pub allowed_servers: String,

    /// JSON list of prefixed tool names, or `["*"]` for all.
    #[serde(default)]
    pub allowed_tools: String,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    /// Server-id list, empty when the column is blank or malformed.
    pub fn parsed_allowed_servers(&self) -> Vec<String> {
        parse_string_list(&self.allowed_servers).unwrap_or_default()
    }

    /// Tool list, `None` when the column was never set.
    ///
    /// A stored literal `[]` comes back as `Some(vec![])`, which the
    /// permission evaluator treats as "no tool access".
    pub fn parsed_allowed_tools(&self) -> Option<Vec<String>> {
        parse_string_list(&self.allowed_tools)
    }
}

fn parse_string_list(raw: &str) -> Option<Vec<String>> {
    if raw.trim().is_empty() {
        return None;
    }
    serde_json::from_str(raw).ok()
}

/// Dashboard administrator account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Admin {
    #[serde(default)]
    pub id: i64,

    pub username: String,

    /// Bcrypt hash, never serialized out.
    #[serde(skip_serializing)]
    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}
