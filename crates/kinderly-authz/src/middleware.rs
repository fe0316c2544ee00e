//! Fail-closed authorization middleware.
//!
//! Runs on every request before business logic: resolves the route's rule
//! from the cache and checks it against the authenticated user's roles and
//! permission codes. Authentication itself is out of scope; an upstream
//! layer is expected to insert a [`UserContext`] request extension.
//!
//! Deny-by-default: no user context, no matching rule, or an empty
//! not-yet-warmed cache all produce a 403. A stale cache still authorizes
//! (serve-stale-on-error is the cache's policy); an empty one never does.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cache::RouteCache;
use crate::types::RouteMatch;

/// Roles that pass any matched rule without per-rule role checks.
pub const ADMIN_ROLES: &[&str] = &["admin", "super_admin"];

// =============================================================================
// User Context
// =============================================================================

/// Authenticated principal, inserted as a request extension by the
/// authentication layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    /// User identifier.
    pub user_id: String,

    /// Role codes assigned to the user.
    pub roles: Vec<String>,

    /// Permission codes granted through the user's roles.
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl UserContext {
    /// Whether the user holds an administrative role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| ADMIN_ROLES.contains(&r.as_str()))
    }
}

// =============================================================================
// Authorization Decision
// =============================================================================

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No authenticated user context on the request.
    NoUser,
    /// No rule matches the method + path (includes the empty bootstrap
    /// cache: fail-closed).
    NoMatchingRule,
    /// A rule matched but none of the user's roles is allowed.
    RoleNotAllowed,
    /// Roles matched but a required permission code is missing.
    MissingPermission,
}

impl DenyReason {
    /// Human-readable denial message for the response body.
    #[must_use]
    pub fn message(&self) -> &'static str {
        match self {
            Self::NoUser => "Authentication required",
            Self::NoMatchingRule => "No authorization rule for this route",
            Self::RoleNotAllowed => "Role not permitted for this route",
            Self::MissingPermission => "Required permission not granted",
        }
    }
}

/// Resolve an authorization decision for one request.
///
/// Pure with respect to the cache's current snapshot; does not block.
pub fn authorize_request(
    cache: &RouteCache,
    user: Option<&UserContext>,
    method: &str,
    path: &str,
) -> Result<RouteMatch, DenyReason> {
    // Lookup first: an unmatched route denies even for admins, so a
    // misconfigured (empty) cache cannot silently open everything up.
    let matched = cache
        .lookup(method, path)
        .ok_or(DenyReason::NoMatchingRule)?;

    let user = user.ok_or(DenyReason::NoUser)?;

    if user.is_admin() {
        return Ok(matched);
    }

    if !matched.allows_any_role(user.roles.iter().map(String::as_str)) {
        return Err(DenyReason::RoleNotAllowed);
    }

    if !matched
        .required_permissions
        .iter()
        .all(|p| user.permissions.contains(p))
    {
        return Err(DenyReason::MissingPermission);
    }

    Ok(matched)
}

// =============================================================================
// Axum Layer
// =============================================================================

/// Authorization middleware for `axum::middleware::from_fn_with_state`.
///
/// On success the [`RouteMatch`] is attached as a request extension for
/// downstream handlers; on denial the request is rejected with a 403.
pub async fn authorize(
    State(cache): State<Arc<RouteCache>>,
    mut request: Request,
    next: Next,
) -> Response {
    let method = request.method().as_str().to_string();
    let path = request.uri().path().to_string();
    let user = request.extensions().get::<UserContext>().cloned();

    match authorize_request(&cache, user.as_ref(), &method, &path) {
        Ok(matched) => {
            request.extensions_mut().insert(matched);
            next.run(request).await
        }
        Err(reason) => {
            tracing::debug!(
                method = %method,
                path = %path,
                user = user.as_ref().map(|u| u.user_id.as_str()).unwrap_or("-"),
                reason = ?reason,
                "Request denied"
            );
            deny_response(reason)
        }
    }
}

fn deny_response(reason: DenyReason) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "error": {
                "code": "access_denied",
                "message": reason.message(),
            }
        })),
    )
        .into_response()
}
