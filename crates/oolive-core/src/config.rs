// ── Runtime configuration ──
//
// These types describe how the state machines behave. They never touch
// disk: `oolive-config` loads the file and environment and builds them.

use std::path::PathBuf;
use std::time::Duration;

use oolive_api::{Endpoint, TlsOptions};
use secrecy::SecretString;

/// Waits used by a stream task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamTimings {
    /// Pause between failed connection attempts.
    pub connect_retry: Duration,
    /// Pause between snapshot cycles when the subscriber stayed quiet.
    pub default_wait: Duration,
    /// How long to wait for the reply to a snapshot.
    pub reply_timeout: Duration,
    /// How long to listen for unsolicited frames after each cycle.
    pub idle_listen: Duration,
    /// Pause before a task ends after the subscriber reported an unknown event.
    pub not_found_wait: Duration,
}

impl Default for StreamTimings {
    fn default() -> Self {
        Self {
            connect_retry: Duration::from_secs(10),
            default_wait: Duration::from_secs(15),
            reply_timeout: Duration::from_secs(10),
            idle_listen: Duration::from_secs(30),
            not_found_wait: Duration::from_secs(30),
        }
    }
}

/// Configuration shared by every stream task of a supervisor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamingConfig {
    /// PEM trust anchor for subscriber certificates. Web roots when unset.
    pub ca_cert: Option<PathBuf>,
    pub timings: StreamTimings,
}

impl StreamingConfig {
    pub fn tls(&self) -> TlsOptions {
        TlsOptions::streaming(self.ca_cert.clone())
    }
}

/// Configuration of a card-reader station.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Results-server host.
    pub host: String,
    pub port: u16,
    /// Event key presented to the server.
    pub key: SecretString,
    pub tls: TlsOptions,
    /// Only use the reader with this USB serial number.
    pub serial_number: Option<String>,
    /// Directory of the daily card logs.
    pub log_dir: PathBuf,
    /// Pause before reconnecting to the server.
    pub reconnect_delay: Duration,
    /// Device poll interval while waiting for a card.
    pub poll_interval: Duration,
    /// Pause before retrying after a device fault.
    pub device_retry: Duration,
}

impl ReaderConfig {
    pub fn new(host: impl Into<String>, port: u16, key: SecretString) -> Self {
        Self {
            host: host.into(),
            port,
            key,
            tls: TlsOptions::default(),
            serial_number: None,
            log_dir: PathBuf::from("."),
            reconnect_delay: Duration::from_secs(5),
            poll_interval: Duration::from_millis(200),
            device_retry: Duration::from_secs(5),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::card_reader(&self.host, self.port, self.key.clone(), self.tls.clone())
    }
}
