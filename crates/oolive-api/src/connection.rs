//! Framed, authenticated connection to a streaming peer.
//!
//! The [`Connector`] / [`Connection`] pair is the seam between the
//! connection state machines in `oolive-core` and the network. Every
//! connection is owned by exactly one task and replaced wholesale on
//! reconnect; there is no shared socket state.
//!
//! [`WsConnector`] is the production implementation: a WebSocket over
//! rustls with the transport headers the peer uses for routing and auth.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::Error;
use crate::tls::TlsOptions;

// ── Endpoint ─────────────────────────────────────────────────────────

const CONTENT_TYPE: &str = "application/octet-stream";
const SUFFIX: &str = ".json";

/// Where and how to connect: URI, shared event key and TLS settings.
#[derive(Clone)]
pub struct Endpoint {
    pub uri: String,
    pub key: SecretString,
    pub tls: TlsOptions,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("uri", &self.uri)
            .field("key", &"[REDACTED]")
            .field("tls", &self.tls)
            .finish()
    }
}

impl Endpoint {
    /// Subscriber endpoint for pushing result snapshots of one event.
    pub fn streaming(address: &str, key: SecretString, tls: TlsOptions) -> Self {
        Self {
            uri: format!("wss://{address}/import"),
            key,
            tls,
        }
    }

    /// Results-server endpoint for a card-reader station.
    pub fn card_reader(host: &str, port: u16, key: SecretString, tls: TlsOptions) -> Self {
        Self {
            uri: format!("wss://{host}:{port}/cardreader"),
            key,
            tls,
        }
    }

    /// Transport headers attached to the connection upgrade request.
    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            ("Content-Type", CONTENT_TYPE.to_owned()),
            ("X-Event-Key", self.key.expose_secret().to_owned()),
            ("X-Suffix", SUFFIX.to_owned()),
        ]
    }
}

// ── Connection seam ──────────────────────────────────────────────────

/// Outcome of waiting for one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Frame(Vec<u8>),
    /// Nothing arrived within the timeout. Not an error.
    Timeout,
    /// The connection is closed; no more frames will arrive.
    Closed,
}

/// One open connection.
#[async_trait]
pub trait Connection: Send {
    /// Transmit one binary frame.
    ///
    /// Fails with [`Error::NotConnected`] once the connection is closed.
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), Error>;

    /// Wait up to `timeout` for the next frame.
    ///
    /// Returns immediately when a frame is already buffered. Must be
    /// cancel-safe: dropping the future loses no frame.
    async fn receive(&mut self, timeout: Duration) -> Received;

    fn is_closed(&self) -> bool;

    /// Close the connection. Idempotent.
    async fn close(&mut self);
}

/// Opens connections to an [`Endpoint`].
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish one connection. Blocks until success or the first
    /// failure; callers own the retry policy.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, Error>;
}

// ── WebSocket implementation ─────────────────────────────────────────

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects over WebSocket (rustls for `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, Error> {
        tracing::debug!(uri = %endpoint.uri, "opening WebSocket connection");

        let uri: tungstenite::http::Uri =
            endpoint
                .uri
                .parse()
                .map_err(|e: tungstenite::http::uri::InvalidUri| Error::InvalidUri {
                    uri: endpoint.uri.clone(),
                    reason: e.to_string(),
                })?;

        let mut request = ClientRequestBuilder::new(uri);
        for (name, value) in endpoint.headers() {
            request = request.with_header(name, value);
        }

        let tls = endpoint.tls.client_config()?;
        let (stream, _response) = tokio_tungstenite::connect_async_tls_with_config(
            request,
            None,
            false,
            Some(tokio_tungstenite::Connector::Rustls(tls)),
        )
        .await
        .map_err(|e| Error::Connect {
            uri: endpoint.uri.clone(),
            reason: e.to_string(),
        })?;

        tracing::debug!(uri = %endpoint.uri, "WebSocket connected");
        Ok(Box::new(WsConnection {
            stream,
            closed: false,
        }))
    }
}

/// An open WebSocket connection.
pub struct WsConnection {
    stream: WsStream,
    closed: bool,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), Error> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        tracing::trace!(bytes = frame.len(), "sending frame");
        self.stream
            .send(tungstenite::Message::Binary(frame.into()))
            .await
            .map_err(|e| {
                self.closed = true;
                Error::Closed {
                    reason: e.to_string(),
                }
            })
    }

    async fn receive(&mut self, timeout: Duration) -> Received {
        if self.closed {
            return Received::Closed;
        }
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let Ok(frame) = tokio::time::timeout_at(deadline, self.stream.next()).await else {
                return Received::Timeout;
            };
            match frame {
                Some(Ok(tungstenite::Message::Binary(data))) => return Received::Frame(data.to_vec()),
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Received::Frame(text.as_str().as_bytes().to_vec());
                }
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    if let Some(ref cf) = frame {
                        tracing::info!(code = %cf.code, reason = %cf.reason, "close frame received");
                    } else {
                        tracing::info!("close frame received (no payload)");
                    }
                    self.closed = true;
                    return Received::Closed;
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket read failed");
                    self.closed = true;
                    return Received::Closed;
                }
                None => {
                    tracing::debug!("WebSocket stream ended");
                    self.closed = true;
                    return Received::Closed;
                }
                // tungstenite answers pings itself
                Some(Ok(_)) => {}
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "error while closing WebSocket");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SecretString {
        SecretString::from("4711".to_string())
    }

    #[test]
    fn streaming_endpoint_uri() {
        let ep = Endpoint::streaming("live.example.org", key(), TlsOptions::streaming(None));
        assert_eq!(ep.uri, "wss://live.example.org/import");
    }

    #[test]
    fn card_reader_endpoint_uri() {
        let ep = Endpoint::card_reader("localhost", 8081, key(), TlsOptions::default());
        assert_eq!(ep.uri, "wss://localhost:8081/cardreader");
    }

    #[test]
    fn headers_carry_key_and_markers() {
        let ep = Endpoint::streaming("a", key(), TlsOptions::default());
        let headers = ep.headers();
        assert!(headers.contains(&("Content-Type", "application/octet-stream".into())));
        assert!(headers.contains(&("X-Event-Key", "4711".into())));
        assert!(headers.contains(&("X-Suffix", ".json".into())));
    }

    #[test]
    fn debug_redacts_key() {
        let ep = Endpoint::streaming("a", key(), TlsOptions::default());
        let dbg = format!("{ep:?}");
        assert!(!dbg.contains("4711"));
        assert!(dbg.contains("REDACTED"));
    }
}
