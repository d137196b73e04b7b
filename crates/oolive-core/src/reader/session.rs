// ── Reader session client ──
//
// One persistent connection from a card-reader station to the results
// server. A background task owns the connection: it reconnects forever,
// re-announces the current reader state after every (re)connect and puts
// every decoded reply into a single-slot mailbox. Callers get strict
// request/response semantics on top of that.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local};
use oolive_api::{
    CardReaderEntry, Connection, Connector, Endpoint, EntryType, Received, ServerReply, codec,
};
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const OUTBOUND_CHANNEL_SIZE: usize = 16;
/// How long the connection task waits for inbound frames between checks
/// of the outbound queue and the cancel token.
const RECEIVE_SLICE: Duration = Duration::from_secs(1);

/// Last state announced by this station.
#[derive(Debug, Clone)]
struct ReaderState {
    entry_type: EntryType,
    entry_time: DateTime<FixedOffset>,
    card: Option<String>,
}

impl ReaderState {
    fn announcement(&self) -> CardReaderEntry {
        CardReaderEntry::state(self.entry_type, self.entry_time, self.card.clone())
    }
}

/// Single-slot mailbox for server replies. A newer reply replaces an
/// unconsumed older one.
#[derive(Default)]
struct ReplySlot {
    slot: Mutex<Option<ServerReply>>,
    notify: Notify,
}

impl ReplySlot {
    fn put(&self, reply: ServerReply) {
        let stale = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(reply);
        if stale.is_some() {
            debug!("discarding unconsumed reply");
        }
        self.notify.notify_one();
    }

    fn clear(&self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    async fn take(&self) -> ServerReply {
        loop {
            let taken = self
                .slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(reply) = taken {
                return reply;
            }
            self.notify.notified().await;
        }
    }
}

struct SessionInner {
    state: Mutex<ReaderState>,
    opened: watch::Sender<bool>,
    outbound: mpsc::Sender<Vec<u8>>,
    replies: ReplySlot,
    /// One request in flight at a time.
    request: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    reply_timeout: Option<Duration>,
}

/// Request/response client for the results server.
///
/// Cheaply cloneable. While the connection is down, requests are dropped
/// with a warning and answered with an empty [`ServerReply`].
#[derive(Clone)]
pub struct ReaderSessionClient {
    inner: Arc<SessionInner>,
}

impl ReaderSessionClient {
    /// Start the connection task. The session stays alive until `cancel`
    /// fires or [`shutdown`](Self::shutdown) is called.
    ///
    /// `reply_timeout` bounds every wait for a reply; `None` waits until a
    /// reply arrives or the connection drops.
    pub fn connect(
        endpoint: Endpoint,
        connector: Arc<dyn Connector>,
        reconnect_delay: Duration,
        reply_timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_SIZE);
        let (opened, _) = watch::channel(false);
        let inner = Arc::new(SessionInner {
            state: Mutex::new(ReaderState {
                entry_type: EntryType::ReaderDisconnected,
                entry_time: Local::now().fixed_offset(),
                card: None,
            }),
            opened,
            outbound,
            replies: ReplySlot::default(),
            request: tokio::sync::Mutex::new(()),
            cancel,
            reply_timeout,
        });

        let handle = tokio::spawn(connection_task(
            Arc::clone(&inner),
            endpoint,
            connector,
            reconnect_delay,
            outbound_rx,
        ));
        (Self { inner }, handle)
    }

    pub fn is_opened(&self) -> bool {
        *self.inner.opened.borrow()
    }

    /// Resolves once the connection is open (immediately if it already is).
    pub async fn wait_opened(&self) {
        let mut opened = self.inner.opened.subscribe();
        let _ = opened.wait_for(|open| *open).await;
    }

    /// Record a new reader state and announce it.
    pub async fn set_state(
        &self,
        entry_type: EntryType,
        entry_time: DateTime<FixedOffset>,
        card: Option<String>,
    ) -> ServerReply {
        let entry = {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *state = ReaderState {
                entry_type,
                entry_time,
                card,
            };
            state.announcement()
        };
        self.send_and_receive(&entry, self.inner.reply_timeout).await
    }

    /// Send one entry and wait for exactly one reply.
    ///
    /// Any reply still in the mailbox is discarded first so an old answer is
    /// never attributed to this request.
    pub async fn send_and_receive(
        &self,
        entry: &CardReaderEntry,
        timeout: Option<Duration>,
    ) -> ServerReply {
        let _request = self.inner.request.lock().await;
        self.clear();

        let frame = match codec::encode(entry) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "cannot encode entry");
                return ServerReply::default();
            }
        };
        if !self.send(frame).await {
            return ServerReply::default();
        }
        self.receive(timeout).await
    }

    /// Drop any unconsumed reply.
    pub fn clear(&self) {
        self.inner.replies.clear();
    }

    /// Stop the connection task.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    async fn send(&self, frame: Vec<u8>) -> bool {
        if !self.is_opened() {
            warn!("not connected to server, could not send data");
            return false;
        }
        if self.inner.outbound.send(frame).await.is_err() {
            warn!("connection task stopped, could not send data");
            return false;
        }
        true
    }

    async fn receive(&self, timeout: Option<Duration>) -> ServerReply {
        let mut opened = self.inner.opened.subscribe();
        let closed = async move {
            let _ = opened.wait_for(|open| !*open).await;
        };
        let reply = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, self.inner.replies.take())
                    .await
                    .ok(),
                None => Some(self.inner.replies.take().await),
            }
        };

        tokio::select! {
            reply = reply => reply.unwrap_or_else(|| {
                warn!("no reply from server within timeout");
                ServerReply::default()
            }),
            () = closed => {
                warn!("connection closed while waiting for reply");
                ServerReply::default()
            }
        }
    }
}

async fn connection_task(
    inner: Arc<SessionInner>,
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    reconnect_delay: Duration,
    mut outbound_rx: mpsc::Receiver<Vec<u8>>,
) {
    let cancel = inner.cancel.clone();
    loop {
        info!(uri = %endpoint.uri, "connecting to results server");
        let attempt = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            attempt = connector.connect(&endpoint) => attempt,
        };

        match attempt {
            Ok(mut conn) => {
                info!(uri = %endpoint.uri, "connection to results server established");
                inner.opened.send_replace(true);
                announce_state(&inner, conn.as_mut()).await;
                pump(&inner, conn.as_mut(), &mut outbound_rx, &cancel).await;
                conn.close().await;
                inner.opened.send_replace(false);
                while outbound_rx.try_recv().is_ok() {
                    warn!("dropping frame queued while the connection closed");
                }
                info!("connection to results server closed");
            }
            Err(e) if e.is_transient() => {
                warn!(error = %e, "connection to results server failed");
            }
            Err(e) => error!(error = %e, "cannot connect to results server, check the settings"),
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(reconnect_delay) => {}
        }
    }
    inner.opened.send_replace(false);
    debug!("reader session stopped");
}

/// Tell the server the current state after every (re)connect.
async fn announce_state(inner: &SessionInner, conn: &mut dyn Connection) {
    let entry = inner
        .state
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .announcement();
    let frame = match codec::encode(&entry) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "cannot encode state announcement");
            return;
        }
    };
    if let Err(e) = conn.send(frame).await {
        warn!(error = %e, "cannot announce reader state");
    }
}

async fn pump(
    inner: &SessionInner,
    conn: &mut dyn Connection,
    outbound_rx: &mut mpsc::Receiver<Vec<u8>>,
    cancel: &CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else { return };
                if let Err(e) = conn.send(frame).await {
                    warn!(error = %e, "sending to results server failed");
                    if e.is_closed() {
                        return;
                    }
                }
            }
            received = conn.receive(RECEIVE_SLICE) => match received {
                Received::Frame(bytes) => match codec::decode::<ServerReply>(&bytes) {
                    Ok(reply) => {
                        debug!(?reply, "reply from results server");
                        inner.replies.put(reply);
                    }
                    Err(e) => warn!(error = %e, "discarding undecodable reply"),
                },
                Received::Timeout => {}
                Received::Closed => return,
            },
        }
    }
}
