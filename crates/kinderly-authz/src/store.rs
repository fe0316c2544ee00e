//! Permission store abstraction.
//!
//! The snapshot builder's only external dependency: a source of active
//! role→route→permission bindings, queryable in a single batch call. The
//! production implementation is backed by the backend's SQL store and lives
//! with the rest of the persistence layer; this crate ships an in-memory
//! implementation used by tests and by the standalone server binary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{AuthzResult, BuildError};
use crate::types::RouteBinding;

// =============================================================================
// Route Store Trait
// =============================================================================

/// Source of role/route/permission bindings.
#[async_trait]
pub trait RouteStore: Send + Sync {
    /// Fetch every active binding in one batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable or the query fails.
    async fn list_active_bindings(&self) -> AuthzResult<Vec<RouteBinding>>;
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// In-memory [`RouteStore`] with failure injection.
///
/// Used by tests and by the standalone server binary when no SQL store is
/// wired in. `fail_next(n)` makes the next `n` queries fail, which is how
/// tests exercise the serve-stale-on-error path.
#[derive(Default)]
pub struct MemoryRouteStore {
    bindings: RwLock<HashMap<String, RouteBinding>>,
    query_count: AtomicUsize,
    fail_remaining: AtomicUsize,
}

impl MemoryRouteStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with bindings.
    #[must_use]
    pub fn with_bindings(bindings: Vec<RouteBinding>) -> Self {
        let map = bindings.into_iter().map(|b| (b.id.clone(), b)).collect();
        Self {
            bindings: RwLock::new(map),
            ..Self::default()
        }
    }

    /// Insert or replace a binding.
    pub async fn upsert(&self, binding: RouteBinding) {
        self.bindings
            .write()
            .await
            .insert(binding.id.clone(), binding);
    }

    /// Remove a binding by id.
    pub async fn remove(&self, id: &str) -> bool {
        self.bindings.write().await.remove(id).is_some()
    }

    /// Make the next `n` queries fail with a store error.
    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Number of queries served so far, including failed ones.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouteStore for MemoryRouteStore {
    async fn list_active_bindings(&self) -> AuthzResult<Vec<RouteBinding>> {
        self.query_count.fetch_add(1, Ordering::SeqCst);

        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(BuildError::query("injected store failure"));
        }

        let mut bindings: Vec<RouteBinding> = self
            .bindings
            .read()
            .await
            .values()
            .filter(|b| b.active)
            .cloned()
            .collect();

        // Deterministic order so snapshots are reproducible
        bindings.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(bindings)
    }
}
