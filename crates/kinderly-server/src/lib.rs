//! # kinderly-server
//!
//! HTTP server binary for the Kinderly backend. Wires the authorization
//! route cache from [`kinderly_authz`] into an axum application: warmup
//! before the listener opens, the change watcher for the cache's lifetime,
//! and the admin cache surface under `/api/admin/permission-cache`.

pub mod config;
pub mod observability;
pub mod server;

pub use config::{AppConfig, ConfigError};
pub use server::{ServerError, build_router, build_state, run};
