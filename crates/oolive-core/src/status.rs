// ── Connection status registry ──
//
// Process-wide map from event id to the current connection status of its
// stream task. An optional observer is told about every change; it is
// always invoked after the map lock is released so a slow or re-entrant
// observer cannot deadlock writers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;

use crate::event::EventId;

/// Connection status of one event's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    /// No connection to the subscriber could be established (yet).
    ServerNotReachable,
    /// Connected, but no snapshot was ever acknowledged.
    AccessDenied,
    /// The subscriber does not know the event.
    EventNotFound,
    /// The last snapshot was rejected or the subscriber misbehaved.
    Error,
    /// The last snapshot was acknowledged.
    Ok,
}

/// Notified whenever an event's status is created, changed or removed.
#[async_trait]
pub trait StatusObserver: Send + Sync {
    async fn status_changed(&self, event_id: EventId);
}

/// Shared per-event status map.
#[derive(Default)]
pub struct StatusRegistry {
    entries: Mutex<HashMap<EventId, Status>>,
    observer: RwLock<Option<Arc<dyn StatusObserver>>>,
}

impl std::fmt::Debug for StatusRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusRegistry")
            .field("entries", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(observer: Arc<dyn StatusObserver>) -> Self {
        let registry = Self::new();
        registry.register(Some(observer));
        registry
    }

    /// Install or clear the observer.
    pub fn register(&self, observer: Option<Arc<dyn StatusObserver>>) {
        *self.observer.write().unwrap_or_else(PoisonError::into_inner) = observer;
    }

    pub fn get(&self, event_id: EventId) -> Option<Status> {
        self.lock().get(&event_id).copied()
    }

    /// Store a status. The observer only hears about actual changes.
    pub async fn set(&self, event_id: EventId, status: Status) {
        let changed = self.lock().insert(event_id, status) != Some(status);
        if changed {
            tracing::debug!(event_id, %status, "stream status changed");
            self.notify(event_id).await;
        }
    }

    /// Remove an event's status. The observer is notified even when no
    /// status was stored.
    pub async fn delete(&self, event_id: EventId) {
        self.lock().remove(&event_id);
        self.notify(event_id).await;
    }

    /// Copy of all current entries.
    pub fn snapshot(&self) -> HashMap<EventId, Status> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EventId, Status>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn notify(&self, event_id: EventId) {
        let observer = self
            .observer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(observer) = observer {
            observer.status_changed(event_id).await;
        }
    }
}
