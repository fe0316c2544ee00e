//! Application assembly: state wiring, router and the serve loop.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Extension, Json, Router, middleware, routing::get};
use kinderly_authz::{
    AuthzState, ChangeLog, ChangeNotifier, MemoryRouteStore, RouteCache, RouteMatch, RouteWatcher,
    admin_router, authorize,
};
use serde_json::json;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AppConfig;

/// Server runtime failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Wire up the authorization subsystem from configuration.
#[must_use]
pub fn build_state(config: &AppConfig) -> AuthzState {
    let store = Arc::new(MemoryRouteStore::with_bindings(config.seed_bindings()));
    let cache = Arc::new(RouteCache::new(store, &config.authz));
    let notifier = Arc::new(ChangeNotifier::new(config.authz.notifier_capacity));
    let log = Arc::new(ChangeLog::new(config.authz.change_log_capacity));
    let watcher = Arc::new(RouteWatcher::new(
        cache.clone(),
        notifier,
        log,
        &config.authz,
    ));
    AuthzState { cache, watcher }
}

/// Build the application router.
///
/// Business routes under `/api` go through the fail-closed authorization
/// middleware; the admin cache surface and `/health` do not (the admin
/// surface is expected to sit behind the deployment's admin gateway).
#[must_use]
pub fn build_router(state: AuthzState) -> Router {
    let api = Router::new()
        .route("/probe", get(route_probe))
        .layer(middleware::from_fn_with_state(
            state.cache.clone(),
            authorize,
        ));

    Router::new()
        .route("/health", get(health))
        .nest(
            "/api/admin/permission-cache",
            admin_router().with_state(state),
        )
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Echo which authorization rule matched. Useful for verifying bindings.
async fn route_probe(Extension(matched): Extension<RouteMatch>) -> Json<serde_json::Value> {
    Json(json!({
        "matchedPatterns": matched.matched_patterns,
        "allowedRoles": matched.allowed_roles,
        "requiredPermissions": matched.required_permissions,
    }))
}

/// Run the server until shutdown.
///
/// The cache is warmed before the listener opens so the first request never
/// sees an unprimed cache. A failed warmup is logged and the server starts
/// anyway: the empty snapshot denies everything until a change event or an
/// operator refresh succeeds.
///
/// # Errors
///
/// Fails when the listen address cannot be bound or the accept loop dies.
pub async fn run(config: AppConfig) -> Result<(), ServerError> {
    let state = build_state(&config);

    match state.cache.warmup().await {
        Ok(outcome) => {
            tracing::info!(
                routes = outcome.route_count,
                version = outcome.version,
                elapsed_ms = outcome.elapsed_ms,
                "Route cache warmed"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "Route cache warmup failed, serving fail-closed until refreshed");
        }
    }

    state.watcher.start();

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let router = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.watcher.stop();
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
