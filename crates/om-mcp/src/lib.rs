//! Core of the one-mcp gateway: JSON-RPC protocol types, pluggable
//! upstream transports, the upstream client with request/response
//! correlation, and the aggregating gateway dispatcher.

pub mod gateway;
pub mod protocol;
pub mod transport;
pub mod upstream;

pub use gateway::Gateway;
pub use upstream::UpstreamClient;
