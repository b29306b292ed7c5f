//! Shared types for the one-mcp gateway workspace.

pub mod errors;
pub mod models;

pub use errors::{AppError, AppResult};
pub use models::{Admin, ApiKey, TransportType, UpstreamServerConfig};
