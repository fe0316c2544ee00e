//! Change watcher: turns bursts of permission edits into single rebuilds.
//!
//! The watcher subscribes to the [`ChangeNotifier`], records every event in
//! the [`ChangeLog`], and schedules a debounced [`RouteCache::refresh`]: each
//! new event pushes the deadline out to `now + debounce_window`, so a burst
//! of edits collapses into one rebuild fired one window after the *last*
//! edit. A failed debounced refresh is not retried on a timer; recovery
//! comes from the next detected change or an operator force-refresh, which
//! keeps a down database from being hammered in a tight loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cache::{RefreshOutcome, RouteCache};
use crate::config::AuthzConfig;
use crate::error::AuthzResult;
use crate::events::{ChangeLog, ChangeNotifier};

// =============================================================================
// Watcher Status
// =============================================================================

/// Read-only view of the watcher, for the admin API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherStatus {
    /// Whether the watch loop is running.
    pub is_watching: bool,

    /// Monotonic count of all change events ever observed.
    pub event_count: u64,

    /// Timestamp of the most recent retained event.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_event_time: Option<OffsetDateTime>,

    /// Whether a debounced refresh is currently pending.
    pub refresh_scheduled: bool,

    /// When the pending refresh will fire, if one is scheduled.
    #[serde(with = "time::serde::rfc3339::option")]
    pub debounce_deadline: Option<OffsetDateTime>,
}

// =============================================================================
// Route Watcher
// =============================================================================

/// Debounced refresh scheduler over a [`RouteCache`].
///
/// Stopped until [`RouteWatcher::start`] is called; [`RouteWatcher::stop`]
/// cancels any pending debounce without firing it. The watcher never touches
/// cache state directly, it only requests rebuilds.
pub struct RouteWatcher {
    cache: Arc<RouteCache>,
    notifier: Arc<ChangeNotifier>,
    log: Arc<ChangeLog>,
    debounce_window: Duration,

    watching: AtomicBool,
    refresh_scheduled: AtomicBool,
    /// Unix ms of the pending debounce deadline; 0 = none. Status only.
    deadline_unix_ms: AtomicI64,

    task: std::sync::Mutex<Option<WatchTask>>,
}

struct WatchTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RouteWatcher {
    /// Create a stopped watcher.
    #[must_use]
    pub fn new(
        cache: Arc<RouteCache>,
        notifier: Arc<ChangeNotifier>,
        log: Arc<ChangeLog>,
        config: &AuthzConfig,
    ) -> Self {
        Self {
            cache,
            notifier,
            log,
            debounce_window: config.debounce_window,
            watching: AtomicBool::new(false),
            refresh_scheduled: AtomicBool::new(false),
            deadline_unix_ms: AtomicI64::new(0),
            task: std::sync::Mutex::new(None),
        }
    }

    /// Start the watch loop. Idempotent: starting a running watcher is a
    /// no-op.
    pub fn start(self: &Arc<Self>) {
        if self.watching.swap(true, Ordering::SeqCst) {
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let receiver = self.notifier.subscribe();
        let watcher = Arc::clone(self);
        let handle = tokio::spawn(async move {
            watcher.run(receiver, shutdown_rx).await;
        });

        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        *task = Some(WatchTask {
            shutdown: shutdown_tx,
            handle,
        });

        tracing::info!(debounce_ms = self.debounce_window.as_millis() as u64, "Route watcher started");
    }

    /// Stop the watch loop, cancelling any pending debounce without firing.
    pub fn stop(&self) {
        if !self.watching.swap(false, Ordering::SeqCst) {
            return;
        }

        let task = {
            let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
            task.take()
        };
        if let Some(task) = task {
            // Wake the loop; it exits without firing the pending refresh
            let _ = task.shutdown.send(true);
            task.handle.abort();
        }

        self.refresh_scheduled.store(false, Ordering::SeqCst);
        self.deadline_unix_ms.store(0, Ordering::SeqCst);
        tracing::info!("Route watcher stopped");
    }

    /// Whether the watch loop is running.
    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.watching.load(Ordering::SeqCst)
    }

    /// Refresh immediately, bypassing the debounce. Restarts the watch loop
    /// if it was found stopped.
    ///
    /// # Errors
    ///
    /// Propagates the [`crate::error::BuildError`] of a failed refresh; the
    /// watcher restart still happens.
    pub async fn force_refresh(self: &Arc<Self>) -> AuthzResult<RefreshOutcome> {
        if !self.is_watching() {
            tracing::warn!("Force refresh found watcher stopped, restarting it");
            self.start();
        }
        self.cache.refresh().await
    }

    /// The change log this watcher records into.
    #[must_use]
    pub fn change_log(&self) -> &Arc<ChangeLog> {
        &self.log
    }

    /// The notifier this watcher subscribes to.
    #[must_use]
    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    /// Read-only status snapshot.
    #[must_use]
    pub fn status(&self) -> WatcherStatus {
        let deadline_ms = self.deadline_unix_ms.load(Ordering::SeqCst);
        WatcherStatus {
            is_watching: self.is_watching(),
            event_count: self.log.total(),
            last_event_time: self.log.last_event_time(),
            refresh_scheduled: self.refresh_scheduled.load(Ordering::SeqCst),
            debounce_deadline: (deadline_ms != 0)
                .then(|| {
                    OffsetDateTime::from_unix_timestamp_nanos(i128::from(deadline_ms) * 1_000_000)
                        .ok()
                })
                .flatten(),
        }
    }

    async fn run(
        self: Arc<Self>,
        mut receiver: broadcast::Receiver<crate::events::ChangeEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        // Loop-local deadline; the atomic mirror exists only for status
        let mut deadline: Option<Instant> = None;

        loop {
            let pending = deadline.is_some();
            let sleep_until = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                _ = shutdown.changed() => {
                    // Cancelled: drop any pending debounce without firing
                    break;
                }

                result = receiver.recv() => {
                    match result {
                        Ok(event) => {
                            tracing::debug!(
                                entity = ?event.entity,
                                kind = ?event.kind,
                                entity_id = %event.entity_id,
                                "Permission change detected"
                            );
                            self.log.append(event);
                            self.schedule(&mut deadline);
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            // Changes definitely happened, the details are gone
                            tracing::warn!(missed = missed, "Missed change notifications, scheduling refresh");
                            self.schedule(&mut deadline);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!("Change notifier closed, watcher exiting");
                            break;
                        }
                    }
                }

                _ = tokio::time::sleep_until(sleep_until), if pending => {
                    deadline = None;
                    self.refresh_scheduled.store(false, Ordering::SeqCst);
                    self.deadline_unix_ms.store(0, Ordering::SeqCst);

                    // No retry on failure: the next change (or an operator
                    // force-refresh) is the recovery path
                    if let Err(e) = self.cache.refresh().await {
                        tracing::error!(error = %e, "Debounced refresh failed");
                    }
                }
            }
        }

        self.refresh_scheduled.store(false, Ordering::SeqCst);
        self.deadline_unix_ms.store(0, Ordering::SeqCst);
    }

    /// Extend the debounce deadline to one window from now.
    fn schedule(&self, deadline: &mut Option<Instant>) {
        *deadline = Some(Instant::now() + self.debounce_window);
        self.refresh_scheduled.store(true, Ordering::SeqCst);

        let fires_at = OffsetDateTime::now_utc()
            + time::Duration::try_from(self.debounce_window).unwrap_or(time::Duration::ZERO);
        self.deadline_unix_ms.store(
            (fires_at.unix_timestamp_nanos() / 1_000_000) as i64,
            Ordering::SeqCst,
        );
    }
}

impl std::fmt::Debug for RouteWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteWatcher")
            .field("watching", &self.is_watching())
            .field("events", &self.log.total())
            .finish()
    }
}
