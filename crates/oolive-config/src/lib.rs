//! Configuration for oolive.
//!
//! A TOML file plus `OOLIVE_`-prefixed environment variables, merged with
//! figment and translated into the runtime settings of `oolive_core`
//! (`ReaderConfig`, `StreamingConfig`). Core never reads config files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use oolive_api::{TlsOptions, TlsVerification};
use oolive_core::{ReaderConfig, StreamTimings, StreamingConfig};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "OOLIVE_";
const REDACTED: &str = "********";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("section [{section}] missing")]
    MissingSection { section: &'static str },

    #[error("no event key configured (set 'key' or 'key_env' in [cardreader])")]
    NoKey,

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Card-reader station settings. Required by `replay`.
    pub cardreader: Option<CardReaderSection>,

    #[serde(default)]
    pub streaming: StreamingSection,
}

/// `[cardreader]`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CardReaderSection {
    /// Results-server host name.
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Event key (plaintext; prefer `key_env`).
    pub key: Option<String>,

    /// Environment variable holding the event key.
    pub key_env: Option<String>,

    /// PEM trust anchor for the server certificate.
    pub ssl_cert: Option<PathBuf>,

    /// Verify the server certificate. Off for self-signed test servers.
    #[serde(default = "default_true")]
    pub ssl_verify: bool,

    /// Only use the reader with this USB serial number.
    pub serial_number: Option<String>,

    /// Directory of the daily card logs.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

/// `[streaming]`, waits in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamingSection {
    pub ca_cert: Option<PathBuf>,
    pub connect_retry: u64,
    pub default_wait: u64,
    pub reply_timeout: u64,
    pub idle_listen: u64,
    pub not_found_wait: u64,
}

impl Default for StreamingSection {
    fn default() -> Self {
        let t = StreamTimings::default();
        Self {
            ca_cert: None,
            connect_retry: t.connect_retry.as_secs(),
            default_wait: t.default_wait.as_secs(),
            reply_timeout: t.reply_timeout.as_secs(),
            idle_listen: t.idle_listen.as_secs(),
            not_found_wait: t.not_found_wait.as_secs(),
        }
    }
}

fn default_port() -> u16 {
    8081
}
fn default_true() -> bool {
    true
}
fn default_log_dir() -> PathBuf {
    PathBuf::from(".")
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "ooresults", "oolive").map_or_else(
        || {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".config");
            p.push("oolive");
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the config from the default path and the environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the config from `path` and the environment. A missing file is
/// not an error.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()?;
    Ok(config)
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Card-reader settings, validated.
    pub fn reader_config(&self) -> Result<ReaderConfig, ConfigError> {
        let section = self.cardreader.as_ref().ok_or(ConfigError::MissingSection {
            section: "cardreader",
        })?;
        section.to_reader_config()
    }

    /// Streaming settings, validated.
    pub fn streaming_config(&self) -> Result<StreamingConfig, ConfigError> {
        self.streaming.to_streaming_config()
    }

    /// TOML rendering with the event key masked.
    pub fn to_toml_redacted(&self) -> Result<String, ConfigError> {
        let mut shown = self.clone();
        if let Some(section) = shown.cardreader.as_mut() {
            if section.key.is_some() {
                section.key = Some(REDACTED.into());
            }
        }
        Ok(toml::to_string_pretty(&shown)?)
    }
}

impl CardReaderSection {
    /// Resolve the event key: `key_env` first, then the plaintext `key`.
    pub fn resolve_key(&self) -> Result<SecretString, ConfigError> {
        if let Some(ref env_name) = self.key_env {
            if let Ok(val) = std::env::var(env_name) {
                return Ok(SecretString::from(val));
            }
        }
        match &self.key {
            Some(key) if !key.is_empty() => Ok(SecretString::from(key.clone())),
            _ => Err(ConfigError::NoKey),
        }
    }

    pub fn to_reader_config(&self) -> Result<ReaderConfig, ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: "cardreader.host".into(),
                reason: "must not be empty".into(),
            });
        }
        let ca_cert = checked_cert("cardreader.ssl_cert", self.ssl_cert.as_ref())?;
        let key = self.resolve_key()?;

        let mut config = ReaderConfig::new(self.host.clone(), self.port, key);
        config.tls = TlsOptions {
            verification: if self.ssl_verify {
                TlsVerification::VerifyPeer
            } else {
                TlsVerification::AcceptAny
            },
            check_hostname: true,
            ca_cert,
        };
        config.serial_number = self.serial_number.clone().filter(|s| !s.is_empty());
        config.log_dir.clone_from(&self.log_dir);
        Ok(config)
    }
}

impl StreamingSection {
    pub fn to_streaming_config(&self) -> Result<StreamingConfig, ConfigError> {
        let secs = |field: &str, value: u64| {
            if value == 0 && field != "default_wait" {
                Err(ConfigError::Validation {
                    field: format!("streaming.{field}"),
                    reason: "must be at least 1 second".into(),
                })
            } else {
                Ok(Duration::from_secs(value))
            }
        };
        Ok(StreamingConfig {
            ca_cert: checked_cert("streaming.ca_cert", self.ca_cert.as_ref())?,
            timings: StreamTimings {
                connect_retry: secs("connect_retry", self.connect_retry)?,
                default_wait: secs("default_wait", self.default_wait)?,
                reply_timeout: secs("reply_timeout", self.reply_timeout)?,
                idle_listen: secs("idle_listen", self.idle_listen)?,
                not_found_wait: secs("not_found_wait", self.not_found_wait)?,
            },
        })
    }
}

fn checked_cert(field: &str, path: Option<&PathBuf>) -> Result<Option<PathBuf>, ConfigError> {
    match path {
        Some(p) if !p.exists() => Err(ConfigError::Validation {
            field: field.into(),
            reason: format!("certificate file {} not found", p.display()),
        }),
        other => Ok(other.cloned()),
    }
}
