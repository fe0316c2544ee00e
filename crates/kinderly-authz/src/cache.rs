//! The route cache: one atomically-replaceable snapshot pointer.
//!
//! Lookups are lock-free reads against the current [`RouteSnapshot`]
//! (a single `ArcSwap` load); they never block and never touch the store.
//! Rebuilds run under a tokio mutex so at most one build is in flight, and
//! publication is a single atomic pointer store. A refresh that was queued
//! behind another one returns the newer result instead of building again.
//!
//! Fail-closed bootstrap: before the first successful build the cache serves
//! the empty version-0 snapshot and reports unhealthy, so the consuming
//! middleware denies everything. After that, a failed refresh leaves the
//! last-known-good snapshot in place and is only surfaced through
//! `error_count` and the health report.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use arc_swap::ArcSwap;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::config::AuthzConfig;
use crate::error::AuthzResult;
use crate::snapshot::{RouteSnapshot, SnapshotBuilder};
use crate::store::RouteStore;
use crate::types::RouteMatch;

// =============================================================================
// Status and Metrics
// =============================================================================

/// Read-only view of the cache state, for the admin API and health checks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    /// Number of compiled rules in the current snapshot.
    pub route_count: usize,

    /// Number of distinct roles referenced by the current snapshot.
    pub role_count: usize,

    /// When the current snapshot was published; `None` before the first
    /// successful build.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_load_time: Option<OffsetDateTime>,

    /// Age of the current snapshot in milliseconds; `None` before the first
    /// successful build.
    pub cache_age_ms: Option<u64>,

    /// Version of the current snapshot (0 = empty bootstrap snapshot).
    pub version: u64,

    /// False until the first successful build; stays true afterwards even
    /// when a later refresh fails (serve-stale-on-error).
    pub is_healthy: bool,
}

/// Cache metrics: most-recent build timings plus the cumulative error count.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetrics {
    /// Total duration of the last successful refresh (build + swap), ms.
    pub load_time_ms: u64,

    /// Store query time of the current snapshot's build, ms.
    pub query_time_ms: u64,

    /// Compile/index time of the current snapshot's build, ms.
    pub processing_time_ms: u64,

    /// Cumulative number of failed builds. Never reset.
    pub error_count: u64,
}

/// Result of a `refresh()`/`warmup()` call.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshOutcome {
    /// Route count before this refresh.
    pub previous_route_count: usize,

    /// Route count after this refresh.
    pub route_count: usize,

    /// Version now being served.
    pub version: u64,

    /// Wall-clock time spent in this call, ms.
    pub elapsed_ms: u64,

    /// True when this call did not build: it waited behind an in-flight
    /// refresh and adopted that newer result.
    pub coalesced: bool,
}

// =============================================================================
// Route Cache
// =============================================================================

/// Process-wide authorization route cache.
///
/// Owned by the application's dependency-injection root and shared by handle
/// (`Arc<RouteCache>`) with the authorization middleware, the watcher and the
/// admin API.
pub struct RouteCache {
    /// Current snapshot. Written only by `load_snapshot`, read by everyone.
    current: ArcSwap<RouteSnapshot>,

    builder: SnapshotBuilder,

    /// Serializes build-then-swap sequences.
    build_guard: Mutex<()>,

    /// Cumulative failed builds.
    error_count: AtomicU64,

    /// False until the first successful build.
    healthy: AtomicBool,

    /// Unix timestamp (ms) of the last successful publish; 0 = never.
    last_load_unix_ms: AtomicI64,

    /// Duration of the last successful refresh (build + swap), ms.
    last_load_time_ms: AtomicU64,
}

impl RouteCache {
    /// Create a cache over the given store. The cache starts empty and
    /// unhealthy; call [`RouteCache::warmup`] before accepting traffic.
    #[must_use]
    pub fn new(store: Arc<dyn RouteStore>, config: &AuthzConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(RouteSnapshot::empty()),
            builder: SnapshotBuilder::new(store, config.query_timeout),
            build_guard: Mutex::new(()),
            error_count: AtomicU64::new(0),
            healthy: AtomicBool::new(false),
            last_load_unix_ms: AtomicI64::new(0),
            last_load_time_ms: AtomicU64::new(0),
        }
    }

    /// Look up the rules applying to a request.
    ///
    /// Lock-free: a single atomic load of the current snapshot, no I/O, no
    /// awaiting. The returned match is copied out, so no reference to the
    /// snapshot outlives this call.
    #[must_use]
    pub fn lookup(&self, method: &str, path: &str) -> Option<RouteMatch> {
        self.current.load().lookup(method, path)
    }

    /// Snapshot of the current cache state.
    #[must_use]
    pub fn status(&self) -> CacheStatus {
        let snapshot = self.current.load();
        let last_load = self.last_load_time();

        CacheStatus {
            route_count: snapshot.route_count(),
            role_count: snapshot.role_count(),
            last_load_time: last_load,
            cache_age_ms: last_load.map(|t| {
                let age = OffsetDateTime::now_utc() - t;
                u64::try_from(age.whole_milliseconds()).unwrap_or(0)
            }),
            version: snapshot.version,
            is_healthy: self.healthy.load(Ordering::Acquire),
        }
    }

    /// Most-recent build timings plus the cumulative error count.
    #[must_use]
    pub fn metrics(&self) -> CacheMetrics {
        let snapshot = self.current.load();
        CacheMetrics {
            load_time_ms: self.last_load_time_ms.load(Ordering::Relaxed),
            query_time_ms: snapshot.build.query_time_ms,
            processing_time_ms: snapshot.build.processing_time_ms,
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }

    /// Rebuild from the store and atomically publish the result.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::BuildError`] when the build fails; the
    /// previously published snapshot keeps serving and `error_count` is
    /// incremented.
    pub async fn refresh(&self) -> AuthzResult<RefreshOutcome> {
        self.load_snapshot("refresh").await
    }

    /// Same machinery as [`RouteCache::refresh`]; called at process start
    /// before traffic is accepted.
    pub async fn warmup(&self) -> AuthzResult<RefreshOutcome> {
        self.load_snapshot("warmup").await
    }

    async fn load_snapshot(&self, reason: &'static str) -> AuthzResult<RefreshOutcome> {
        let started = std::time::Instant::now();
        let observed_version = self.current.load().version;

        let _guard = self.build_guard.lock().await;

        // Another refresh published while we waited for the guard: adopt its
        // result rather than building again. Versions only move forward.
        let current = self.current.load_full();
        if current.version > observed_version {
            tracing::debug!(
                version = current.version,
                reason = reason,
                "Refresh coalesced into newer snapshot"
            );
            return Ok(RefreshOutcome {
                previous_route_count: current.route_count(),
                route_count: current.route_count(),
                version: current.version,
                elapsed_ms: started.elapsed().as_millis() as u64,
                coalesced: true,
            });
        }

        let next_version = current.version + 1;
        match self.builder.build(next_version).await {
            Ok(snapshot) => {
                let previous_route_count = current.route_count();
                let route_count = snapshot.route_count();
                let build = snapshot.build;

                // Single atomic pointer swap: in-flight lookups keep the old
                // snapshot, new lookups see the new one.
                self.current.store(Arc::new(snapshot));
                self.healthy.store(true, Ordering::Release);
                self.last_load_unix_ms.store(
                    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
                    Ordering::Relaxed,
                );
                let elapsed_ms = started.elapsed().as_millis() as u64;
                self.last_load_time_ms.store(elapsed_ms, Ordering::Relaxed);

                tracing::info!(
                    version = next_version,
                    routes = route_count,
                    previous_routes = previous_route_count,
                    query_ms = build.query_time_ms,
                    processing_ms = build.processing_time_ms,
                    reason = reason,
                    "Route cache refreshed"
                );

                Ok(RefreshOutcome {
                    previous_route_count,
                    route_count,
                    version: next_version,
                    elapsed_ms,
                    coalesced: false,
                })
            }
            Err(e) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    error = %e,
                    serving_version = current.version,
                    reason = reason,
                    "Route cache refresh failed, keeping current snapshot"
                );
                Err(e)
            }
        }
    }

    fn last_load_time(&self) -> Option<OffsetDateTime> {
        let ms = self.last_load_unix_ms.load(Ordering::Relaxed);
        if ms == 0 {
            return None;
        }
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()
    }
}

impl std::fmt::Debug for RouteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.current.load();
        f.debug_struct("RouteCache")
            .field("version", &snapshot.version)
            .field("routes", &snapshot.route_count())
            .field("healthy", &self.healthy.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRouteStore;
    use crate::types::RouteBinding;
    use async_trait::async_trait;
    use std::time::Duration;

    fn binding(id: &str, role: &str, method: &str, pattern: &str) -> RouteBinding {
        RouteBinding {
            id: id.to_string(),
            role_code: role.to_string(),
            method: method.to_string(),
            path_pattern: pattern.to_string(),
            permission_code: None,
            active: true,
        }
    }

    fn seeded_store() -> Arc<MemoryRouteStore> {
        Arc::new(MemoryRouteStore::with_bindings(vec![
            binding("b1", "teacher", "GET", "/api/students"),
            binding("b2", "principal", "POST", "/api/students"),
        ]))
    }

    #[tokio::test]
    async fn test_fail_closed_bootstrap() {
        let cache = RouteCache::new(seeded_store(), &AuthzConfig::for_testing());

        let status = cache.status();
        assert!(!status.is_healthy);
        assert_eq!(status.route_count, 0);
        assert_eq!(status.version, 0);
        assert!(status.last_load_time.is_none());
        assert!(cache.lookup("GET", "/api/students").is_none());
    }

    #[tokio::test]
    async fn test_warmup_publishes_first_snapshot() {
        let cache = RouteCache::new(seeded_store(), &AuthzConfig::for_testing());

        let outcome = cache.warmup().await.unwrap();
        assert_eq!(outcome.version, 1);
        assert_eq!(outcome.previous_route_count, 0);
        assert_eq!(outcome.route_count, 2);
        assert!(!outcome.coalesced);

        let status = cache.status();
        assert!(status.is_healthy);
        assert_eq!(status.version, 1);
        assert!(status.last_load_time.is_some());
        assert!(cache.lookup("GET", "/api/students").is_some());
    }

    #[tokio::test]
    async fn test_failed_first_build_stays_unhealthy() {
        let store = seeded_store();
        store.fail_next(1);
        let cache = RouteCache::new(store, &AuthzConfig::for_testing());

        assert!(cache.warmup().await.is_err());

        let status = cache.status();
        assert!(!status.is_healthy);
        assert_eq!(status.version, 0);
        assert_eq!(cache.metrics().error_count, 1);
        // Fail-closed: still no routes
        assert!(cache.lookup("GET", "/api/students").is_none());
    }

    #[tokio::test]
    async fn test_serve_stale_on_error() {
        let store = seeded_store();
        let cache = RouteCache::new(store.clone(), &AuthzConfig::for_testing());
        cache.warmup().await.unwrap();

        store.fail_next(1);
        assert!(cache.refresh().await.is_err());

        // Last-known-good snapshot still serves
        let status = cache.status();
        assert!(status.is_healthy);
        assert_eq!(status.version, 1);
        assert_eq!(status.route_count, 2);
        assert_eq!(cache.metrics().error_count, 1);
        assert!(cache.lookup("GET", "/api/students").is_some());
    }

    #[tokio::test]
    async fn test_refresh_picks_up_changes() {
        let store = seeded_store();
        let cache = RouteCache::new(store.clone(), &AuthzConfig::for_testing());
        cache.warmup().await.unwrap();

        store
            .upsert(binding("b3", "nurse", "GET", "/api/health-records"))
            .await;
        let outcome = cache.refresh().await.unwrap();

        assert_eq!(outcome.version, 2);
        assert_eq!(outcome.previous_route_count, 2);
        assert_eq!(outcome.route_count, 3);
        assert!(cache.lookup("GET", "/api/health-records").is_some());
    }

    #[tokio::test]
    async fn test_versions_monotonic_across_refreshes() {
        let cache = RouteCache::new(seeded_store(), &AuthzConfig::for_testing());

        let mut last = 0;
        for _ in 0..5 {
            let outcome = cache.refresh().await.unwrap();
            assert!(outcome.version > last);
            last = outcome.version;
        }
        assert_eq!(cache.status().version, 5);
    }

    // Store that delays each query, for exercising concurrent refreshes.
    struct SlowStore {
        inner: MemoryRouteStore,
        delay: Duration,
    }

    #[async_trait]
    impl RouteStore for SlowStore {
        async fn list_active_bindings(&self) -> AuthzResult<Vec<RouteBinding>> {
            tokio::time::sleep(self.delay).await;
            self.inner.list_active_bindings().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refresh_coalesces() {
        let store = Arc::new(SlowStore {
            inner: MemoryRouteStore::with_bindings(vec![binding(
                "b1",
                "teacher",
                "GET",
                "/api/students",
            )]),
            delay: Duration::from_millis(100),
        });
        let mut config = AuthzConfig::for_testing();
        config.query_timeout = Duration::from_secs(5);
        let cache = Arc::new(RouteCache::new(store, &config));

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.refresh().await })
        };
        // Let the first refresh take the build guard
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.refresh().await })
        };

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        assert!(!first.coalesced);
        assert_eq!(first.version, 1);
        // The queued refresh adopts the published result, no second build
        assert!(second.coalesced);
        assert_eq!(second.version, 1);
        assert_eq!(cache.status().version, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_timeout_is_build_error() {
        let store = Arc::new(SlowStore {
            inner: MemoryRouteStore::new(),
            delay: Duration::from_secs(30),
        });
        let mut config = AuthzConfig::for_testing();
        config.query_timeout = Duration::from_secs(1);
        let cache = RouteCache::new(store, &config);

        let err = cache.refresh().await.unwrap_err();
        assert!(err.is_store_unavailable());
        assert_eq!(cache.metrics().error_count, 1);

        // The guard is released: a later refresh can still run
        assert!(cache.refresh().await.is_err());
        assert_eq!(cache.metrics().error_count, 2);
    }
}
