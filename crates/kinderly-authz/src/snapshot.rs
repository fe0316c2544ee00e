//! Immutable route snapshots and the builder that compiles them.
//!
//! A [`RouteSnapshot`] is one fully-built generation of the authorization
//! cache. It is constructed off to the side, never mutated after
//! construction, and published by the cache with a single atomic pointer
//! swap. Concurrent readers therefore never need a lock: they either see the
//! whole old generation or the whole new one.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use crate::error::{AuthzResult, BuildError};
use crate::store::RouteStore;
use crate::types::{RouteBinding, RouteMatch, RouteRule, normalize_method};

// =============================================================================
// Build Metrics
// =============================================================================

/// Timings and counts recorded while building one snapshot.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildMetrics {
    /// Wall-clock time of the store query, in milliseconds.
    pub query_time_ms: u64,

    /// Wall-clock time of rule compilation and indexing, in milliseconds.
    pub processing_time_ms: u64,

    /// Number of compiled rules.
    pub route_count: usize,
}

// =============================================================================
// Route Snapshot
// =============================================================================

/// One immutable, fully-built generation of the route cache.
#[derive(Debug)]
pub struct RouteSnapshot {
    /// Generation number, strictly increasing across published snapshots.
    /// Version 0 is the empty bootstrap snapshot that exists before the
    /// first successful build.
    pub version: u64,

    /// All compiled rules, in deterministic (method, pattern) order.
    pub routes: Vec<RouteRule>,

    /// Role code → indices into `routes`. Built once, never mutated.
    pub routes_by_role: HashMap<String, Vec<usize>>,

    /// Uppercase method → indices into `routes`, for lookup.
    by_method: HashMap<String, Vec<usize>>,

    /// When this snapshot was built.
    pub built_at: OffsetDateTime,

    /// Timings recorded during the build.
    pub build: BuildMetrics,
}

impl RouteSnapshot {
    /// The empty snapshot served before the first successful build.
    ///
    /// Zero routes: every lookup misses, so the consuming middleware
    /// fail-closes until a real snapshot is published.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version: 0,
            routes: Vec::new(),
            routes_by_role: HashMap::new(),
            by_method: HashMap::new(),
            built_at: OffsetDateTime::UNIX_EPOCH,
            build: BuildMetrics::default(),
        }
    }

    /// Look up the rules applying to a request.
    ///
    /// Scans only the rules registered for the request's method and merges
    /// every match. Returns `None` when no rule matches.
    #[must_use]
    pub fn lookup(&self, method: &str, path: &str) -> Option<RouteMatch> {
        let method = normalize_method(method);
        let indices = self.by_method.get(&method)?;

        let mut allowed_roles = BTreeSet::new();
        let mut required_permissions = BTreeSet::new();
        let mut matched_patterns = Vec::new();

        for &i in indices {
            let rule = &self.routes[i];
            if crate::types::pattern_matches(&rule.path_pattern, path) {
                allowed_roles.extend(rule.allowed_roles.iter().cloned());
                required_permissions.extend(rule.required_permissions.iter().cloned());
                matched_patterns.push(rule.path_pattern.clone());
            }
        }

        if matched_patterns.is_empty() {
            None
        } else {
            Some(RouteMatch {
                allowed_roles,
                required_permissions,
                matched_patterns,
            })
        }
    }

    /// Number of compiled rules.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Number of distinct roles referenced by any rule.
    #[must_use]
    pub fn role_count(&self) -> usize {
        self.routes_by_role.len()
    }
}

// =============================================================================
// Snapshot Builder
// =============================================================================

/// Compiles the current permission-store state into a [`RouteSnapshot`].
///
/// Building is side-effect free on the live cache: the builder only returns
/// a candidate, publication is the cache's job.
pub struct SnapshotBuilder {
    store: Arc<dyn RouteStore>,
    query_timeout: Duration,
}

impl SnapshotBuilder {
    /// Create a builder over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn RouteStore>, query_timeout: Duration) -> Self {
        Self {
            store,
            query_timeout,
        }
    }

    /// Build a snapshot with the given version number.
    ///
    /// Runs one batched store query bounded by the configured timeout, drops
    /// malformed rows with a warning, and compiles the remaining bindings
    /// into rules and indexes.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] if the query fails or times out. Individual
    /// bad rows never fail the build.
    pub async fn build(&self, version: u64) -> AuthzResult<RouteSnapshot> {
        let query_started = std::time::Instant::now();
        let bindings = tokio::time::timeout(self.query_timeout, self.store.list_active_bindings())
            .await
            .map_err(|_| BuildError::timeout(self.query_timeout.as_millis() as u64))??;
        let query_time_ms = query_started.elapsed().as_millis() as u64;

        let processing_started = std::time::Instant::now();
        let routes = compile_rules(bindings);

        let mut routes_by_role: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_method: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, rule) in routes.iter().enumerate() {
            for role in &rule.allowed_roles {
                routes_by_role.entry(role.clone()).or_default().push(i);
            }
            by_method.entry(rule.method.clone()).or_default().push(i);
        }
        let processing_time_ms = processing_started.elapsed().as_millis() as u64;

        let build = BuildMetrics {
            query_time_ms,
            processing_time_ms,
            route_count: routes.len(),
        };

        tracing::debug!(
            version = version,
            routes = routes.len(),
            roles = routes_by_role.len(),
            query_ms = query_time_ms,
            processing_ms = processing_time_ms,
            "Route snapshot built"
        );

        Ok(RouteSnapshot {
            version,
            routes,
            routes_by_role,
            by_method,
            built_at: OffsetDateTime::now_utc(),
            build,
        })
    }
}

/// Merge bindings into rules keyed by (method, path pattern).
///
/// Malformed bindings are dropped with a warning; one bad row must never
/// abort a build.
fn compile_rules(bindings: Vec<RouteBinding>) -> Vec<RouteRule> {
    let mut merged: BTreeMap<(String, String), RouteRule> = BTreeMap::new();

    for binding in bindings {
        if let Err(reason) = binding.validate() {
            tracing::warn!(
                binding_id = %binding.id,
                reason = %reason,
                "Dropping malformed route binding"
            );
            continue;
        }

        let method = normalize_method(&binding.method);
        let key = (method.clone(), binding.path_pattern.clone());
        let rule = merged.entry(key).or_insert_with(|| RouteRule {
            method,
            path_pattern: binding.path_pattern.clone(),
            allowed_roles: BTreeSet::new(),
            required_permissions: BTreeSet::new(),
        });

        rule.allowed_roles.insert(binding.role_code);
        if let Some(code) = binding.permission_code {
            rule.required_permissions.insert(code);
        }
    }

    merged.into_values().collect()
}
