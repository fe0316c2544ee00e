//! # kinderly-authz
//!
//! Route-level authorization cache for the Kinderly backend.
//!
//! Role and permission assignments live in the permission store and change
//! rarely; every request needs them. This crate keeps a compiled, immutable
//! snapshot of the role→route→permission bindings in memory and rebuilds it
//! when permissions change, so request-path authorization never queries the
//! store.
//!
//! ## Overview
//!
//! - Request handlers read the current [`snapshot::RouteSnapshot`] through
//!   [`cache::RouteCache`] with a lock-free atomic pointer load.
//! - Admin CRUD publishes [`events::ChangeEvent`]s into the
//!   [`events::ChangeNotifier`]; the [`watcher::RouteWatcher`] debounces
//!   bursts of edits into a single rebuild.
//! - Rebuild failures keep serving the previous snapshot; the only state
//!   that denies everything is the empty bootstrap snapshot (fail-closed).
//!
//! ## Modules
//!
//! - [`config`] - Tunables: debounce window, query timeout, log capacity
//! - [`types`] - Bindings, compiled rules and Express-style path matching
//! - [`store`] - Storage trait for binding queries, plus an in-memory store
//! - [`snapshot`] - Immutable compiled snapshot and its builder
//! - [`cache`] - The atomically swapped cache with coalesced refresh
//! - [`events`] - Change events, the notifier and the bounded change log
//! - [`watcher`] - Debounced refresh scheduling over change events
//! - [`health`] - 0–100 health scoring for the admin panel
//! - [`middleware`] - Fail-closed per-request authorization layer
//! - [`http`] - Axum admin handlers (status, refresh, change history)

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod http;
pub mod middleware;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod watcher;

pub use cache::{CacheMetrics, CacheStatus, RefreshOutcome, RouteCache};
pub use config::AuthzConfig;
pub use error::{AuthzResult, BuildError};
pub use events::{ChangeEntity, ChangeEvent, ChangeKind, ChangeLog, ChangeNotifier};
pub use health::{HealthReport, HealthStatus, evaluate};
pub use http::{AuthzState, ChangeHistory, PermissionCacheStatus, admin_router};
pub use middleware::{ADMIN_ROLES, DenyReason, UserContext, authorize, authorize_request};
pub use snapshot::{BuildMetrics, RouteSnapshot, SnapshotBuilder};
pub use store::{MemoryRouteStore, RouteStore};
pub use types::{RouteBinding, RouteMatch, RouteRule, normalize_method, pattern_matches};
pub use watcher::{RouteWatcher, WatcherStatus};
