use thiserror::Error;

/// Top-level error type for the `oolive-api` crate.
///
/// Covers every failure mode of a single streaming connection: TLS setup,
/// the WebSocket handshake, frame transmission and payload decoding.
/// `oolive-core` decides which of these are retried and which end a task.
#[derive(Debug, Error)]
pub enum Error {
    // ── Connection ──────────────────────────────────────────────────
    /// A frame was sent while no connection is open.
    #[error("Not connected -- could not send frame")]
    NotConnected,

    /// Connection attempt failed (DNS, refused, handshake rejected, ...).
    #[error("Connection to {uri} failed: {reason}")]
    Connect { uri: String, reason: String },

    /// The peer closed the connection or the socket failed mid-stream.
    #[error("Connection closed: {reason}")]
    Closed { reason: String },

    /// The endpoint URI could not be turned into a WebSocket request.
    #[error("Invalid endpoint URI {uri}: {reason}")]
    InvalidUri { uri: String, reason: String },

    /// TLS configuration or certificate loading error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Data ────────────────────────────────────────────────────────
    /// Compression or decompression of a frame failed.
    #[error("Frame codec error: {0}")]
    Codec(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("Malformed payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` if the connection is gone and must be re-established.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Closed { .. })
    }

    /// Returns `true` for failures worth retrying after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Connect { .. } | Self::Closed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_errors_are_transient() {
        let err = Error::Closed {
            reason: "reset".into(),
        };
        assert!(err.is_closed());
        assert!(err.is_transient());
    }

    #[test]
    fn tls_errors_are_permanent() {
        let err = Error::Tls("bad pem".into());
        assert!(!err.is_closed());
        assert!(!err.is_transient());
    }
}
