//! In-memory fakes for the connection seam and the host collaborators.
#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use oolive_api::{Connection, Connector, Endpoint, Error, Received, codec};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::ResultsError;
use crate::event::{ClassResults, EventId, ResultSnapshot, ResultsSource};
use crate::status::StatusObserver;

// ── Connector ────────────────────────────────────────────────────────

/// Computes the reply to a decoded outbound frame. `None` stays silent.
pub(crate) type Responder = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

pub(crate) fn reply_result(result: &'static str) -> Responder {
    Arc::new(move |_| Some(serde_json::json!({ "result": result })))
}

pub(crate) fn silent() -> Responder {
    Arc::new(|_| None)
}

/// Replies in order; the last reply repeats.
pub(crate) fn reply_sequence(results: &[&'static str]) -> Responder {
    let queue = Mutex::new(results.iter().copied().collect::<VecDeque<_>>());
    Arc::new(move |_| {
        let mut queue = queue.lock().unwrap();
        let result = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            *queue.front().unwrap()
        };
        Some(serde_json::json!({ "result": result }))
    })
}

/// Inbound event for a fake connection. `None` closes it from the peer side.
type Inbound = Option<Vec<u8>>;

#[derive(Default)]
struct ConnectorState {
    failures_left: usize,
    tls_failures: bool,
    drop_on_connect: bool,
    peers: Vec<mpsc::UnboundedSender<Inbound>>,
}

pub(crate) struct FakeConnector {
    state: Mutex<ConnectorState>,
    responder: Mutex<Responder>,
    attempts: AtomicUsize,
    connected_at: Mutex<Vec<Instant>>,
    sent: Arc<Mutex<Vec<Value>>>,
}

impl FakeConnector {
    pub(crate) fn new(responder: Responder) -> Arc<Self> {
        Self::failing_first(0, responder)
    }

    /// Refuses the first `failures` connection attempts.
    pub(crate) fn failing_first(failures: usize, responder: Responder) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ConnectorState {
                failures_left: failures,
                tls_failures: false,
                drop_on_connect: false,
                peers: Vec::new(),
            }),
            responder: Mutex::new(responder),
            attempts: AtomicUsize::new(0),
            connected_at: Mutex::default(),
            sent: Arc::default(),
        })
    }

    /// Like [`failing_first`](Self::failing_first), but the attempts fail
    /// the TLS setup.
    pub(crate) fn rejecting_tls_first(failures: usize, responder: Responder) -> Arc<Self> {
        let connector = Self::failing_first(failures, responder);
        connector.state.lock().unwrap().tls_failures = true;
        connector
    }

    /// Accepts every connection, then closes it from the peer side before
    /// anything can be read.
    pub(crate) fn dropping_connections(responder: Responder) -> Arc<Self> {
        let connector = Self::new(responder);
        connector.state.lock().unwrap().drop_on_connect = true;
        connector
    }

    /// When each connection attempt was made.
    pub(crate) fn connect_times(&self) -> Vec<Instant> {
        self.connected_at.lock().unwrap().clone()
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn connections(&self) -> usize {
        self.state.lock().unwrap().peers.len()
    }

    /// Every frame sent over any connection, decoded.
    pub(crate) fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }

    /// Push an unsolicited frame into connection `index`.
    pub(crate) fn inject(&self, index: usize, frame: Vec<u8>) {
        let state = self.state.lock().unwrap();
        let _ = state.peers[index].send(Some(frame));
    }

    /// Close connection `index` from the peer side.
    pub(crate) fn close_peer(&self, index: usize) {
        let state = self.state.lock().unwrap();
        let _ = state.peers[index].send(None);
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.connected_at.lock().unwrap().push(Instant::now());
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock().unwrap();
            if state.failures_left > 0 {
                state.failures_left -= 1;
                if state.tls_failures {
                    return Err(Error::Tls("invalid peer certificate".into()));
                }
                return Err(Error::Connect {
                    uri: endpoint.uri.clone(),
                    reason: "connection refused".into(),
                });
            }
            if state.drop_on_connect {
                let _ = tx.send(None);
            }
            state.peers.push(tx.clone());
        }
        Ok(Box::new(FakeConnection {
            inbound: rx,
            loopback: tx,
            responder: self.responder.lock().unwrap().clone(),
            sent: Arc::clone(&self.sent),
            closed: false,
        }))
    }
}

struct FakeConnection {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    loopback: mpsc::UnboundedSender<Inbound>,
    responder: Responder,
    sent: Arc<Mutex<Vec<Value>>>,
    closed: bool,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), Error> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        let value: Value = codec::decode(&frame)?;
        if let Some(reply) = (self.responder)(&value) {
            let _ = self.loopback.send(Some(serde_json::to_vec(&reply)?));
        }
        self.sent.lock().unwrap().push(value);
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Received {
        if self.closed {
            return Received::Closed;
        }
        match tokio::time::timeout(timeout, self.inbound.recv()).await {
            Ok(Some(Some(frame))) => Received::Frame(frame),
            Ok(Some(None) | None) => {
                self.closed = true;
                Received::Closed
            }
            Err(_) => Received::Timeout,
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

// ── Collaborators ────────────────────────────────────────────────────

/// Snapshot with the given class names and no results.
pub(crate) fn snapshot(classes: &[&str]) -> ResultSnapshot {
    ResultSnapshot {
        event: serde_json::json!({ "name": "Test Event" }),
        classes: classes.iter().map(|c| ClassResults::new(*c)).collect(),
    }
}

/// Returns scripted results in order; the last `Ok` repeats.
#[derive(Default)]
pub(crate) struct ScriptedResults {
    script: Mutex<VecDeque<Result<ResultSnapshot, ResultsError>>>,
    last: Mutex<Option<ResultSnapshot>>,
    calls: AtomicUsize,
}

impl ScriptedResults {
    pub(crate) fn new(
        script: impl IntoIterator<Item = Result<ResultSnapshot, ResultsError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        })
    }

    pub(crate) fn always(snapshot: ResultSnapshot) -> Arc<Self> {
        Self::new([Ok(snapshot)])
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ResultsSource for ScriptedResults {
    fn event_class_results(&self, event_id: EventId) -> Result<ResultSnapshot, ResultsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(snapshot)) => {
                *self.last.lock().unwrap() = Some(snapshot.clone());
                Ok(snapshot)
            }
            Some(Err(e)) => Err(e),
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or(ResultsError::EventNotFound { event_id }),
        }
    }
}

#[derive(Default)]
pub(crate) struct RecordingObserver {
    calls: Mutex<Vec<EventId>>,
}

impl RecordingObserver {
    pub(crate) fn calls(&self) -> Vec<EventId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusObserver for RecordingObserver {
    async fn status_changed(&self, event_id: EventId) {
        self.calls.lock().unwrap().push(event_id);
    }
}

/// Poll `condition` every 100ms until it holds, for at most `limit`.
pub(crate) async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + limit;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {limit:?}"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
