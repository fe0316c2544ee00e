//! Core types for route authorization rules.
//!
//! A [`RouteBinding`] is one raw row from the permission store. Bindings are
//! compiled into [`RouteRule`]s (one rule per method + path pattern, roles
//! and permission codes merged) by the snapshot builder.
//!
//! Path patterns use Express-style syntax, matching the route definitions of
//! the consuming backend:
//!
//! - literal segments match exactly (`/api/students`)
//! - `:param` segments match any single segment (`/api/students/:id`)
//! - a trailing `*` matches any remainder, including nothing (`/api/files/*`)

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

// =============================================================================
// Route Binding
// =============================================================================

/// One role→route→permission assignment row as stored.
///
/// Bindings are the unit of change: administrators create, update and delete
/// bindings; the builder compiles whatever is active at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteBinding {
    /// Row identifier in the permission store.
    pub id: String,

    /// Role code granted access (e.g. `"teacher"`, `"principal"`).
    pub role_code: String,

    /// HTTP method, any case. Normalized to uppercase during compilation.
    pub method: String,

    /// Express-style path pattern.
    pub path_pattern: String,

    /// Permission code additionally required by this binding, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_code: Option<String>,

    /// Inactive bindings are ignored by the builder.
    pub active: bool,
}

impl RouteBinding {
    /// Validate a binding before compilation.
    ///
    /// Returns a description of the problem for malformed rows. The builder
    /// drops such rows with a warning rather than failing the build.
    pub fn validate(&self) -> Result<(), String> {
        if self.role_code.trim().is_empty() {
            return Err("empty role code".to_string());
        }
        if self.method.trim().is_empty() {
            return Err("empty method".to_string());
        }
        if !self.path_pattern.starts_with('/') {
            return Err(format!(
                "path pattern {:?} does not start with '/'",
                self.path_pattern
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Route Rule
// =============================================================================

/// One compiled authorization rule: method + path pattern with the union of
/// all roles and permission codes bound to it. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRule {
    /// Uppercase HTTP method.
    pub method: String,

    /// Express-style path pattern.
    pub path_pattern: String,

    /// Roles allowed to call this route.
    pub allowed_roles: BTreeSet<String>,

    /// Permission codes required in addition to a role match.
    pub required_permissions: BTreeSet<String>,
}

impl RouteRule {
    /// Check whether this rule applies to the given request.
    ///
    /// The method must match exactly; the path is matched segment-wise
    /// against the pattern.
    #[must_use]
    pub fn matches(&self, method: &str, path: &str) -> bool {
        self.method == method && pattern_matches(&self.path_pattern, path)
    }
}

// =============================================================================
// Route Match
// =============================================================================

/// Result of a cache lookup: the union of every rule matching the request.
///
/// More than one rule can match a single path (a literal rule and a `:param`
/// rule, say); the consuming middleware sees the merged role and permission
/// sets plus the patterns that contributed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteMatch {
    /// Roles allowed by at least one matching rule.
    pub allowed_roles: BTreeSet<String>,

    /// Permission codes required by at least one matching rule.
    pub required_permissions: BTreeSet<String>,

    /// Path patterns of the rules that matched, in snapshot order.
    pub matched_patterns: Vec<String>,
}

impl RouteMatch {
    /// Check whether any of the given roles is allowed.
    #[must_use]
    pub fn allows_any_role<'a, I>(&self, roles: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        roles.into_iter().any(|r| self.allowed_roles.contains(r))
    }
}

// =============================================================================
// Pattern Matching
// =============================================================================

/// Normalize an HTTP method for rule storage and lookup.
#[must_use]
pub fn normalize_method(method: &str) -> String {
    method.trim().to_ascii_uppercase()
}

/// Match a request path against an Express-style pattern.
///
/// Trailing slashes on the request path are ignored (`/api/students/` is the
/// same route as `/api/students`).
#[must_use]
pub fn pattern_matches(pattern: &str, path: &str) -> bool {
    let path = if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    };

    let mut pattern_segs = pattern.split('/').filter(|s| !s.is_empty());
    let mut path_segs = path.split('/').filter(|s| !s.is_empty());

    loop {
        match (pattern_segs.next(), path_segs.next()) {
            (Some("*"), _) => return true,
            (Some(p), Some(s)) => {
                if !p.starts_with(':') && p != s {
                    return false;
                }
            }
            (Some(_), None) => return false,
            (None, Some(_)) => return false,
            (None, None) => return true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(role: &str, method: &str, pattern: &str) -> RouteBinding {
        RouteBinding {
            id: "b1".to_string(),
            role_code: role.to_string(),
            method: method.to_string(),
            path_pattern: pattern.to_string(),
            permission_code: None,
            active: true,
        }
    }

    #[test]
    fn test_binding_validation() {
        assert!(binding("teacher", "GET", "/api/students").validate().is_ok());
        assert!(binding("", "GET", "/api/students").validate().is_err());
        assert!(binding("teacher", "", "/api/students").validate().is_err());
        assert!(binding("teacher", "GET", "api/students").validate().is_err());
    }

    #[test]
    fn test_normalize_method() {
        assert_eq!(normalize_method("get"), "GET");
        assert_eq!(normalize_method(" Post "), "POST");
    }

    #[test]
    fn test_literal_pattern() {
        assert!(pattern_matches("/api/students", "/api/students"));
        assert!(pattern_matches("/api/students", "/api/students/"));
        assert!(!pattern_matches("/api/students", "/api/teachers"));
        assert!(!pattern_matches("/api/students", "/api/students/42"));
        assert!(!pattern_matches("/api/students/42", "/api/students"));
    }

    #[test]
    fn test_param_pattern() {
        assert!(pattern_matches("/api/students/:id", "/api/students/42"));
        assert!(pattern_matches(
            "/api/classes/:classId/students/:id",
            "/api/classes/3/students/42"
        ));
        assert!(!pattern_matches("/api/students/:id", "/api/students"));
        assert!(!pattern_matches("/api/students/:id", "/api/students/42/notes"));
    }

    #[test]
    fn test_wildcard_pattern() {
        assert!(pattern_matches("/api/files/*", "/api/files/a/b/c"));
        assert!(pattern_matches("/api/files/*", "/api/files"));
        assert!(!pattern_matches("/api/files/*", "/api/photos/a"));
    }

    #[test]
    fn test_root_path() {
        assert!(pattern_matches("/", "/"));
        assert!(!pattern_matches("/", "/api"));
    }

    #[test]
    fn test_rule_matches() {
        let rule = RouteRule {
            method: "GET".to_string(),
            path_pattern: "/api/students/:id".to_string(),
            allowed_roles: BTreeSet::from(["teacher".to_string()]),
            required_permissions: BTreeSet::new(),
        };
        assert!(rule.matches("GET", "/api/students/42"));
        assert!(!rule.matches("POST", "/api/students/42"));
        assert!(!rule.matches("GET", "/api/students"));
    }

    #[test]
    fn test_route_match_allows_any_role() {
        let m = RouteMatch {
            allowed_roles: BTreeSet::from(["teacher".to_string(), "principal".to_string()]),
            required_permissions: BTreeSet::new(),
            matched_patterns: vec!["/api/students".to_string()],
        };
        assert!(m.allows_any_role(["teacher"]));
        assert!(m.allows_any_role(["parent", "principal"]));
        assert!(!m.allows_any_role(["parent"]));
    }
}
