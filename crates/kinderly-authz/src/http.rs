//! Admin HTTP surface for the route cache.
//!
//! The operational endpoints behind the admin UI's permission-cache panel:
//! status with health scoring, manual refresh variants, and the change
//! history. The server nests this router under
//! `/api/admin/permission-cache`, behind its admin authentication.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cache::{CacheMetrics, CacheStatus, RefreshOutcome, RouteCache};
use crate::error::BuildError;
use crate::events::ChangeEvent;
use crate::health::{self, HealthReport};
use crate::watcher::{RouteWatcher, WatcherStatus};

// =============================================================================
// State
// =============================================================================

/// Shared handles for the admin handlers.
#[derive(Clone)]
pub struct AuthzState {
    /// The route cache.
    pub cache: Arc<RouteCache>,

    /// The watcher (owns the change log).
    pub watcher: Arc<RouteWatcher>,
}

// =============================================================================
// Response Types
// =============================================================================

/// Composite status payload: everything the admin panel renders in one call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionCacheStatus {
    /// Cache state.
    pub cache: CacheStatus,

    /// Build timings and error count.
    pub metrics: CacheMetrics,

    /// Watcher state.
    pub watcher: WatcherStatus,

    /// Derived health report.
    pub health: HealthReport,
}

/// Change history payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeHistory {
    /// Retained events, most recent first.
    pub events: Vec<ChangeEvent>,

    /// Monotonic total of all events ever observed.
    pub total: u64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    /// Maximum events to return (default 50).
    pub limit: Option<usize>,
}

// =============================================================================
// Error Responses
// =============================================================================

impl IntoResponse for BuildError {
    fn into_response(self) -> Response {
        let status = if self.is_store_unavailable() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });

        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /status — composite cache/watcher/health status.
pub async fn get_status(State(state): State<AuthzState>) -> Json<PermissionCacheStatus> {
    let cache = state.cache.status();
    let metrics = state.cache.metrics();
    let health = health::evaluate(&cache, &metrics);

    Json(PermissionCacheStatus {
        cache,
        metrics,
        watcher: state.watcher.status(),
        health,
    })
}

/// POST /refresh — synchronous rebuild, bypassing the debounce.
pub async fn refresh(
    State(state): State<AuthzState>,
) -> Result<Json<RefreshOutcome>, BuildError> {
    let outcome = state.cache.refresh().await?;
    Ok(Json(outcome))
}

/// POST /force-refresh — immediate rebuild; restarts the watcher if stopped.
pub async fn force_refresh(
    State(state): State<AuthzState>,
) -> Result<Json<RefreshOutcome>, BuildError> {
    let outcome = state.watcher.force_refresh().await?;
    Ok(Json(outcome))
}

/// POST /warmup — same machinery as refresh, used before accepting traffic.
pub async fn warmup(State(state): State<AuthzState>) -> Result<Json<RefreshOutcome>, BuildError> {
    let outcome = state.cache.warmup().await?;
    Ok(Json(outcome))
}

/// GET /changes — recent permission change events, most recent first.
pub async fn get_change_history(
    State(state): State<AuthzState>,
    Query(params): Query<HistoryParams>,
) -> Json<ChangeHistory> {
    let log = state.watcher.change_log();
    let limit = params.limit.unwrap_or(50);

    Json(ChangeHistory {
        events: log.list(limit),
        total: log.total(),
    })
}

/// DELETE /changes — clear the retained history (the monotonic event counter
/// is unaffected).
pub async fn clear_change_history(State(state): State<AuthzState>) -> StatusCode {
    state.watcher.change_log().clear();
    StatusCode::NO_CONTENT
}

/// The admin router for this subsystem.
pub fn admin_router() -> Router<AuthzState> {
    Router::new()
        .route("/status", get(get_status))
        .route("/refresh", post(refresh))
        .route("/force-refresh", post(force_refresh))
        .route("/warmup", post(warmup))
        .route(
            "/changes",
            get(get_change_history).delete(clear_change_history),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthzConfig;
    use crate::events::{ChangeEntity, ChangeKind, ChangeLog, ChangeNotifier};
    use crate::store::MemoryRouteStore;
    use crate::types::RouteBinding;

    fn binding(id: &str) -> RouteBinding {
        RouteBinding {
            id: id.to_string(),
            role_code: "teacher".to_string(),
            method: "GET".to_string(),
            path_pattern: "/api/students".to_string(),
            permission_code: None,
            active: true,
        }
    }

    fn state_with_store(store: Arc<MemoryRouteStore>) -> AuthzState {
        let config = AuthzConfig::for_testing();
        let cache = Arc::new(RouteCache::new(store, &config));
        let notifier = Arc::new(ChangeNotifier::new(config.notifier_capacity));
        let log = Arc::new(ChangeLog::new(config.change_log_capacity));
        let watcher = Arc::new(RouteWatcher::new(cache.clone(), notifier, log, &config));
        AuthzState { cache, watcher }
    }

    #[tokio::test]
    async fn test_status_payload_shape() {
        let state = state_with_store(Arc::new(MemoryRouteStore::with_bindings(vec![binding(
            "b1",
        )])));
        state.cache.warmup().await.unwrap();

        let Json(status) = get_status(State(state)).await;
        assert!(status.cache.is_healthy);
        assert_eq!(status.cache.route_count, 1);
        assert_eq!(status.health.score, 100);
        assert!(!status.watcher.is_watching);

        // The serialized payload is camelCase for the admin UI
        let value = serde_json::to_value(&status).unwrap();
        assert!(value["cache"]["routeCount"].is_number());
        assert!(value["metrics"]["errorCount"].is_number());
        assert!(value["watcher"]["isWatching"].is_boolean());
        assert!(value["health"]["recommendations"].is_array());
    }

    #[tokio::test]
    async fn test_refresh_handler_reports_counts() {
        let store = Arc::new(MemoryRouteStore::with_bindings(vec![binding("b1")]));
        let state = state_with_store(store.clone());

        let Json(outcome) = refresh(State(state.clone())).await.unwrap();
        assert_eq!(outcome.version, 1);
        assert_eq!(outcome.previous_route_count, 0);
        assert_eq!(outcome.route_count, 1);

        store.upsert(binding("b2")).await;
        let Json(outcome) = refresh(State(state)).await.unwrap();
        assert_eq!(outcome.version, 2);
        // b1 and b2 merge into one rule (same method + pattern)
        assert_eq!(outcome.route_count, 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_maps_to_service_unavailable() {
        let store = Arc::new(MemoryRouteStore::new());
        store.fail_next(1);
        let state = state_with_store(store);

        let err = refresh(State(state)).await.unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_change_history_roundtrip() {
        let state = state_with_store(Arc::new(MemoryRouteStore::new()));
        let log = state.watcher.change_log();
        for i in 0..3 {
            log.append(ChangeEvent::now(
                ChangeKind::Updated,
                ChangeEntity::RouteBinding,
                format!("b{i}"),
            ));
        }

        let Json(history) = get_change_history(
            State(state.clone()),
            Query(HistoryParams { limit: Some(2) }),
        )
        .await;
        assert_eq!(history.events.len(), 2);
        assert_eq!(history.total, 3);
        assert_eq!(history.events[0].entity_id, "b2");

        let status = clear_change_history(State(state.clone())).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let Json(history) =
            get_change_history(State(state), Query(HistoryParams { limit: None })).await;
        assert!(history.events.is_empty());
        assert_eq!(history.total, 3);
    }

    #[tokio::test]
    async fn test_force_refresh_restarts_watcher() {
        let state = state_with_store(Arc::new(MemoryRouteStore::with_bindings(vec![binding(
            "b1",
        )])));
        assert!(!state.watcher.is_watching());

        let Json(outcome) = force_refresh(State(state.clone())).await.unwrap();
        assert_eq!(outcome.version, 1);
        assert!(state.watcher.is_watching());

        state.watcher.stop();
    }
}
