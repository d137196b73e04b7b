// ── Stream task ──
//
// One long-running task per streamed event. It keeps a connection to the
// subscriber open, recomputes the event's results on a fixed cadence and
// transmits a snapshot only when it differs from the last one the
// subscriber acknowledged on the current connection.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use oolive_api::{Connection, Connector, Endpoint, Received, ReplyResult, codec};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{StreamTimings, StreamingConfig};
use crate::error::StreamError;
use crate::event::{EventId, EventStreamConfig, ResultListEncoder, ResultSnapshot, ResultsSource};
use crate::status::{Status, StatusRegistry};

/// How a stream task ended.
#[derive(Debug)]
pub(crate) enum Termination {
    Cancelled,
    Stopped(StreamError),
}

/// Outcome of pushing one snapshot.
enum Push {
    /// The subscriber answered with a classifiable result.
    Answered(ReplyResult),
    /// The reply timed out or could not be decoded.
    Unanswered(String),
    /// The connection is gone.
    Lost(oolive_api::Error),
}

pub(crate) struct StreamTask {
    event_id: EventId,
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    results: Arc<dyn ResultsSource>,
    encoder: Arc<dyn ResultListEncoder>,
    status: Arc<StatusRegistry>,
    timings: StreamTimings,
}

impl StreamTask {
    pub(crate) fn new(
        event: &EventStreamConfig,
        config: &StreamingConfig,
        connector: Arc<dyn Connector>,
        results: Arc<dyn ResultsSource>,
        encoder: Arc<dyn ResultListEncoder>,
        status: Arc<StatusRegistry>,
    ) -> Self {
        Self {
            event_id: event.id,
            endpoint: Endpoint::streaming(
                &event.address,
                SecretString::from(event.key.clone()),
                config.tls(),
            ),
            connector,
            results,
            encoder,
            status,
            timings: config.timings,
        }
    }

    /// Run until cancelled or until the task stops on its own.
    pub(crate) async fn run(self, cancel: CancellationToken) -> Termination {
        info!(event_id = self.event_id, uri = %self.endpoint.uri, "streaming task started");
        tokio::select! {
            biased;
            () = cancel.cancelled() => Termination::Cancelled,
            result = self.stream() => match result {
                Ok(never) => match never {},
                Err(e) => Termination::Stopped(e),
            },
        }
    }

    async fn stream(&self) -> Result<Infallible, StreamError> {
        self.status
            .set(self.event_id, Status::ServerNotReachable)
            .await;
        loop {
            let mut conn = self.connect().await;
            let outcome = self.serve(conn.as_mut()).await;
            conn.close().await;
            outcome?;
            debug!(event_id = self.event_id, "connection closed, reconnecting");
        }
    }

    /// Connect, retrying forever.
    async fn connect(&self) -> Box<dyn Connection> {
        loop {
            match self.connector.connect(&self.endpoint).await {
                Ok(conn) => {
                    info!(event_id = self.event_id, uri = %self.endpoint.uri, "connected to subscriber");
                    return conn;
                }
                Err(e) => {
                    let retry_secs = self.timings.connect_retry.as_secs();
                    if e.is_transient() {
                        warn!(event_id = self.event_id, error = %e, retry_secs, "subscriber not reachable");
                    } else {
                        // Needs a configuration change; retried anyway.
                        error!(event_id = self.event_id, error = %e, retry_secs, "cannot connect to subscriber");
                    }
                    self.status
                        .set(self.event_id, Status::ServerNotReachable)
                        .await;
                    tokio::time::sleep(self.timings.connect_retry).await;
                }
            }
        }
    }

    /// Snapshot cycle on one open connection. Returns once the connection
    /// is closed; an error ends the task.
    async fn serve(&self, conn: &mut dyn Connection) -> Result<(), StreamError> {
        let id = self.event_id;
        let mut acknowledged: Option<ResultSnapshot> = None;
        let mut answered = false;

        loop {
            let mut wait = self.timings.default_wait;
            let snapshot = self.fetch_snapshot().await?;

            if acknowledged.as_ref() == Some(&snapshot) {
                debug!(event_id = id, "results unchanged, nothing to send");
            } else {
                match self.push(conn, &snapshot).await? {
                    Push::Answered(ReplyResult::Ok) => {
                        answered = true;
                        debug!(event_id = id, "snapshot acknowledged");
                        self.status.set(id, Status::Ok).await;
                        acknowledged = Some(snapshot);
                    }
                    Push::Answered(ReplyResult::EventNotFound) => {
                        warn!(event_id = id, "subscriber does not know this event");
                        self.status.set(id, Status::EventNotFound).await;
                        tokio::time::sleep(self.timings.not_found_wait).await;
                        return Err(StreamError::EventNotFound { event_id: id });
                    }
                    Push::Answered(ReplyResult::Error(reason)) => {
                        answered = true;
                        warn!(event_id = id, %reason, "snapshot rejected");
                        acknowledged = None;
                        self.status.set(id, Status::Error).await;
                    }
                    Push::Unanswered(reason) => {
                        warn!(event_id = id, %reason, "no usable reply to snapshot");
                        acknowledged = None;
                        let status = if answered {
                            Status::Error
                        } else {
                            Status::AccessDenied
                        };
                        self.status.set(id, status).await;
                    }
                    Push::Lost(e) => {
                        warn!(event_id = id, error = %e, "connection lost while sending");
                        conn.close().await;
                        self.status.set(id, Status::ServerNotReachable).await;
                    }
                }
            }

            // The subscriber only speaks when spoken to.
            if !conn.is_closed() {
                match conn.receive(self.timings.idle_listen).await {
                    Received::Timeout => wait = Duration::ZERO,
                    Received::Frame(_) => {
                        warn!(event_id = id, "unexpected frame from subscriber, dropping connection");
                        conn.close().await;
                        self.status.set(id, Status::Error).await;
                    }
                    Received::Closed => {
                        info!(event_id = id, "subscriber closed the connection");
                        self.status.set(id, Status::ServerNotReachable).await;
                    }
                }
            }

            tokio::time::sleep(wait).await;
            if conn.is_closed() {
                return Ok(());
            }
        }
    }

    async fn fetch_snapshot(&self) -> Result<ResultSnapshot, StreamError> {
        let results = Arc::clone(&self.results);
        let id = self.event_id;
        let snapshot = tokio::task::spawn_blocking(move || results.event_class_results(id))
            .await
            .map_err(|e| StreamError::Results(format!("results task failed: {e}")))??;
        Ok(snapshot)
    }

    async fn push(
        &self,
        conn: &mut dyn Connection,
        snapshot: &ResultSnapshot,
    ) -> Result<Push, StreamError> {
        let payload = self.encoder.encode(snapshot)?;
        let frame = codec::compress(&payload)?;
        debug!(event_id = self.event_id, bytes = frame.len(), "sending snapshot");

        if let Err(e) = conn.send(frame).await {
            return Ok(Push::Lost(e));
        }

        Ok(match conn.receive(self.timings.reply_timeout).await {
            Received::Frame(bytes) => match codec::decode::<serde_json::Value>(&bytes) {
                Ok(reply) => Push::Answered(ReplyResult::from_value(&reply)),
                Err(e) => Push::Unanswered(e.to_string()),
            },
            Received::Timeout => Push::Unanswered(format!(
                "no reply within {}s",
                self.timings.reply_timeout.as_secs()
            )),
            Received::Closed => Push::Lost(oolive_api::Error::Closed {
                reason: "closed while waiting for reply".into(),
            }),
        })
    }
}
