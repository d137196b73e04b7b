// ── Events and result snapshots ──
//
// The streaming side only sees events through these types. Where events
// are stored and how class results are computed belongs to the host
// application, which plugs in through `EventStore` and `ResultsSource`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ResultsError, StoreError, StreamError};

/// Identifier of a competition event.
pub type EventId = i64;

/// Streaming configuration of one event.
#[derive(Clone, PartialEq, Eq)]
pub struct EventStreamConfig {
    pub id: EventId,
    /// Subscriber address, `host[:port]`.
    pub address: String,
    /// Shared secret presented to the subscriber.
    pub key: String,
    pub enabled: bool,
}

impl fmt::Debug for EventStreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStreamConfig")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("key", &"[REDACTED]")
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl EventStreamConfig {
    /// Whether a stream task should run for this event.
    pub fn streams(&self) -> bool {
        self.enabled && !self.address.is_empty() && !self.key.is_empty()
    }
}

/// Class results of one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassResults {
    pub name: String,
    pub results: Vec<serde_json::Value>,
}

impl ClassResults {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            results: Vec::new(),
        }
    }
}

/// Event metadata plus the results of every class, as computed at one
/// instant. Two snapshots are equal when their contents are equal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSnapshot {
    pub event: serde_json::Value,
    pub classes: Vec<ClassResults>,
}

/// Source of configured events.
pub trait EventStore: Send + Sync {
    fn get_events(&self) -> Result<Vec<EventStreamConfig>, StoreError>;
}

/// Computes the current results of an event.
///
/// Implementations may block (database access). Stream tasks always call
/// this on the blocking pool.
pub trait ResultsSource: Send + Sync + 'static {
    fn event_class_results(&self, event_id: EventId) -> Result<ResultSnapshot, ResultsError>;
}

/// Turns a snapshot into the JSON document sent to the subscriber.
pub trait ResultListEncoder: Send + Sync {
    fn encode(&self, snapshot: &ResultSnapshot) -> Result<Vec<u8>, StreamError>;
}

/// Plain JSON serialization of the snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonResultList;

impl ResultListEncoder for JsonResultList {
    fn encode(&self, snapshot: &ResultSnapshot) -> Result<Vec<u8>, StreamError> {
        serde_json::to_vec(snapshot).map_err(|e| StreamError::Encode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    fn config() -> EventStreamConfig {
        EventStreamConfig {
            id: 1,
            address: "live.example.org".into(),
            key: "secret".into(),
            enabled: true,
        }
    }

    #[test]
    fn streams_requires_address_and_key() {
        assert!(config().streams());
        assert!(!EventStreamConfig { enabled: false, ..config() }.streams());
        assert!(!EventStreamConfig { address: String::new(), ..config() }.streams());
        assert!(!EventStreamConfig { key: String::new(), ..config() }.streams());
    }

    #[test]
    fn debug_hides_key() {
        assert!(!format!("{:?}", config()).contains("secret"));
    }

    #[test]
    fn snapshots_compare_by_content() {
        let a = ResultSnapshot {
            event: json!({"name": "Sprint"}),
            classes: vec![ClassResults::new("H21")],
        };
        let mut b = a.clone();
        assert_eq!(a, b);
        b.classes[0].results.push(json!({"rank": 1}));
        assert_ne!(a, b);
    }

    #[test]
    fn json_encoder_writes_snapshot() {
        let snapshot = ResultSnapshot {
            event: json!({"name": "Sprint"}),
            classes: vec![ClassResults::new("D21")],
        };
        let bytes = JsonResultList.encode(&snapshot).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["classes"][0]["name"], "D21");
    }
}
