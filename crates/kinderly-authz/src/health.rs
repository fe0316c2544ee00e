//! Health scoring for the route cache.
//!
//! A pure function from observed cache state to a 0–100 score, a status
//! bucket and per-problem recommendations. Administrators see this instead
//! of raw errors.

use serde::Serialize;

use crate::cache::{CacheMetrics, CacheStatus};

/// Cache age beyond which staleness is flagged, in milliseconds (24 hours).
const STALE_AGE_MS: u64 = 24 * 3600 * 1000;

/// Load time above which a refresh is considered slow, in milliseconds.
const SLOW_LOAD_MS: u64 = 5000;

/// Query time above which the store query is considered slow, in milliseconds.
const SLOW_QUERY_MS: u64 = 1000;

// =============================================================================
// Health Report
// =============================================================================

/// Status bucket derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Score ≥ 90.
    Excellent,
    /// Score ≥ 75.
    Good,
    /// Score ≥ 60.
    Fair,
    /// Score ≥ 40.
    Poor,
    /// Score < 40.
    Critical,
}

impl HealthStatus {
    fn from_score(score: u8) -> Self {
        match score {
            90..=100 => Self::Excellent,
            75..=89 => Self::Good,
            60..=74 => Self::Fair,
            40..=59 => Self::Poor,
            _ => Self::Critical,
        }
    }
}

/// Derived health summary for the admin API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// 0–100, deductions applied cumulatively with a floor at 0.
    pub score: u8,

    /// Bucketed status.
    pub status: HealthStatus,

    /// One recommendation per violated rule; a single "no action needed"
    /// message when nothing is wrong.
    pub recommendations: Vec<String>,
}

// =============================================================================
// Evaluation
// =============================================================================

/// Evaluate cache health from its status and metrics.
///
/// Deterministic: the same inputs always produce the same report.
#[must_use]
pub fn evaluate(status: &CacheStatus, metrics: &CacheMetrics) -> HealthReport {
    let mut deductions: u32 = 0;
    let mut recommendations = Vec::new();

    if !status.is_healthy {
        deductions += 30;
        recommendations.push("Cache is unhealthy, refresh immediately".to_string());
    }

    if status.route_count == 0 {
        deductions += 20;
        recommendations.push("No routes loaded, check the permission store".to_string());
    }

    if metrics.load_time_ms > SLOW_LOAD_MS {
        deductions += 15;
        recommendations.push(format!(
            "Last refresh took {}ms, investigate store performance",
            metrics.load_time_ms
        ));
    }

    if metrics.query_time_ms > SLOW_QUERY_MS {
        deductions += 10;
        recommendations.push(format!(
            "Store query took {}ms, consider indexing the binding tables",
            metrics.query_time_ms
        ));
    }

    if metrics.error_count > 0 {
        deductions += 10 * u32::try_from(metrics.error_count).unwrap_or(u32::MAX / 10);
        recommendations.push(format!(
            "{} failed build(s) recorded, inspect the logs",
            metrics.error_count
        ));
    }

    if status.cache_age_ms.is_some_and(|age| age > STALE_AGE_MS) {
        deductions += 15;
        recommendations.push("Cache is older than 24h, consider refreshing".to_string());
    }

    if recommendations.is_empty() {
        recommendations.push("Cache is healthy, no action needed".to_string());
    }

    let score = 100u32.saturating_sub(deductions) as u8;
    HealthReport {
        score,
        status: HealthStatus::from_score(score),
        recommendations,
    }
}
