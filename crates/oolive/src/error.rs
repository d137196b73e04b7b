//! CLI error types with miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use oolive_config::ConfigError;
use oolive_core::{DeviceError, ReplayError};

/// Process exit codes.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const CONNECTION: i32 = 7;
    pub const DATA: i32 = 9;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────

    #[error("Configuration error")]
    #[diagnostic(
        code(oolive::config),
        help(
            "Check the [cardreader] section of {path}.\n\
             Run: oolive config show"
        )
    )]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not connect to results server at {uri}")]
    #[diagnostic(
        code(oolive::connection_failed),
        help(
            "Check host, port and event key in the [cardreader] section.\n\
             For self-signed certificates set ssl_cert or ssl_verify = false."
        )
    )]
    ConnectionFailed { uri: String },

    // ── Data ─────────────────────────────────────────────────────────

    #[error("Replay failed")]
    #[diagnostic(code(oolive::replay))]
    Replay(#[from] ReplayError),

    #[error("Card reader error")]
    #[diagnostic(code(oolive::device))]
    Device(#[from] DeviceError),

    #[error("I/O error: {0}")]
    #[diagnostic(code(oolive::io))]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => exit_code::CONFIG,
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Replay(ReplayError::InvalidRecord { .. }) => exit_code::DATA,
            Self::Replay(_) | Self::Device(_) | Self::Io(_) => exit_code::GENERAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        let err = CliError::ConnectionFailed {
            uri: "wss://x:8081/cardreader".into(),
        };
        assert_eq!(err.exit_code(), exit_code::CONNECTION);

        let err = CliError::Replay(ReplayError::InvalidRecord {
            line: 3,
            reason: "bad".into(),
        });
        assert_eq!(err.exit_code(), exit_code::DATA);

        let err = CliError::Config {
            path: "config.toml".into(),
            source: ConfigError::NoKey,
        };
        assert_eq!(err.exit_code(), exit_code::CONFIG);
        assert_ne!(err.exit_code(), exit_code::SUCCESS);
        assert_ne!(err.exit_code(), exit_code::USAGE);
    }
}
