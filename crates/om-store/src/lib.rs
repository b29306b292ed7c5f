//! SQLite persistence for upstream servers, API keys, and admins.
//!
//! Soft deletion is used for `upstream_servers` and `api_keys`: rows
//! keep a `deleted_at` timestamp and every read filters on
//! `deleted_at IS NULL`. The gateway core only ever reads enabled
//! upstream servers and looks up API keys by exact `key`.

mod store;

pub use store::Store;
