//! Permission change events: the notifier that carries them and the bounded
//! log that retains them for the admin history.
//!
//! Events are pure evidence. Appending one has no effect on the cache; the
//! watcher consumes them to schedule debounced rebuilds, and the admin API
//! reads the log to explain why a refresh happened.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use uuid::Uuid;

// =============================================================================
// Change Event
// =============================================================================

/// What happened to the changed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// A new row was created.
    Created,
    /// An existing row was updated.
    Updated,
    /// A row was deleted.
    Deleted,
}

/// Which kind of entity changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeEntity {
    /// A role definition.
    Role,
    /// A permission definition.
    Permission,
    /// A role→route→permission binding.
    RouteBinding,
}

/// One permission-change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Unique event id, assigned at creation.
    pub id: Uuid,

    /// What happened.
    pub kind: ChangeKind,

    /// What kind of entity it happened to.
    pub entity: ChangeEntity,

    /// Identifier of the changed entity.
    pub entity_id: String,

    /// When the change was detected.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ChangeEvent {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn now(kind: ChangeKind, entity: ChangeEntity, entity_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            entity,
            entity_id: entity_id.into(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

// =============================================================================
// Change Log
// =============================================================================

/// Bounded, append-only history of change events.
///
/// Oldest entries are silently evicted once capacity is exceeded. The total
/// event counter is monotonic and unaffected by eviction or [`ChangeLog::clear`].
pub struct ChangeLog {
    entries: Mutex<VecDeque<ChangeEvent>>,
    capacity: usize,
    total: AtomicU64,
}

impl ChangeLog {
    /// Create a log retaining at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            total: AtomicU64::new(0),
        }
    }

    /// Append an event, evicting the oldest entry when full.
    pub fn append(&self, event: ChangeEvent) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        while entries.len() >= self.capacity.max(1) {
            entries.pop_front();
        }
        entries.push_back(event);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// The retained events, most recent first, at most `limit`.
    #[must_use]
    pub fn list(&self, limit: usize) -> Vec<ChangeEvent> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// Timestamp of the most recent retained event.
    #[must_use]
    pub fn last_event_time(&self) -> Option<OffsetDateTime> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.back().map(|e| e.timestamp)
    }

    /// Drop all retained entries. Does not reset the total counter.
    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }

    /// Monotonic count of all events ever appended.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Number of currently retained entries.
    #[must_use]
    pub fn retained(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

// =============================================================================
// Change Notifier
// =============================================================================

/// Broadcast channel for permission change notifications.
///
/// This is the subsystem's change source: admin CRUD handlers (and, when
/// wired, database triggers) publish into it, the watcher subscribes.
/// Multiple producers and multiple subscribers are fine; notifications sent
/// with no subscriber are dropped.
pub struct ChangeNotifier {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeNotifier {
    /// Create a notifier with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a change to all subscribers.
    pub fn notify(&self, event: ChangeEvent) {
        // Ignore send errors (no receivers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to future change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}
