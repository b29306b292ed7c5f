//! Aggregation gateway
//!
//! Multiplexes downstream JSON-RPC onto the set of upstream clients:
//! method dispatch, parallel tool-list aggregation with namespace
//! rewriting, permission-filtered routing of tool calls.

pub mod access_control;
#[allow(clippy::module_inception)]
mod gateway;
mod gateway_tools;

#[cfg(test)]
mod tests;

pub use access_control::PermissionSet;
pub use gateway::Gateway;
