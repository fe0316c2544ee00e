//! Authorization cache configuration.
//!
//! All durations deserialize from humantime strings (`"3s"`, `"24h"`).
//!
//! # Example (TOML)
//!
//! ```toml
//! [authz]
//! debounce_window = "3s"
//! query_timeout = "10s"
//! change_log_capacity = 100
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the route cache, watcher and change log.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthzConfig {
    /// Quiet period after the last detected change before a rebuild fires.
    /// A burst of edits inside this window collapses into one rebuild.
    #[serde(with = "humantime_serde")]
    pub debounce_window: Duration,

    /// Upper bound on the permission-store query during a build.
    /// Exceeding it fails the build; the previous snapshot keeps serving.
    #[serde(with = "humantime_serde")]
    pub query_timeout: Duration,

    /// How many change events are retained for the admin history.
    /// Older entries are evicted; the monotonic event counter is unaffected.
    pub change_log_capacity: usize,

    /// Capacity of the change notification channel.
    pub notifier_capacity: usize,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_secs(3),
            query_timeout: Duration::from_secs(10),
            change_log_capacity: 100,
            notifier_capacity: 64,
        }
    }
}

impl AuthzConfig {
    /// Configuration with short timings for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            debounce_window: Duration::from_millis(50),
            query_timeout: Duration::from_secs(1),
            change_log_capacity: 16,
            notifier_capacity: 16,
        }
    }
}
