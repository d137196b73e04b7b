//! Wire layer for oolive live-results streaming.
//!
//! Everything that touches bytes on the socket lives here:
//!
//! - **[`message`]**: Card-reader entries sent by a reader station and the
//!   `{"result": ...}` replies sent back by a results server or subscriber.
//! - **[`codec`]**: JSON + bzip2 frame encoding. Replies are accepted either
//!   compressed or as plain JSON text.
//! - **[`tls`]**: rustls client configuration: peer verification, optional
//!   custom trust anchor, optional hostname check.
//! - **[`connection`]**: The [`Connector`] / [`Connection`] seam used by the
//!   long-lived streaming roles, plus the WebSocket implementation
//!   ([`WsConnector`]).

pub mod codec;
pub mod connection;
pub mod error;
pub mod message;
pub mod tls;

pub use connection::{Connection, Connector, Endpoint, Received, WsConnection, WsConnector};
pub use error::Error;
pub use message::{CardData, CardReaderEntry, EntryType, Punch, ReplyResult, ServerReply};
pub use tls::{TlsOptions, TlsVerification};
