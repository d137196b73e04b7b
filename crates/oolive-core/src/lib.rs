//! Connection state machines for oolive live-results streaming.
//!
//! Two roles share the same problem: keeping a long-lived, authenticated
//! connection alive across an unreliable network without losing or
//! duplicating data.
//!
//! - **[`StreamingSupervisor`]**: Server side. Owns one stream task per
//!   event configured for outbound streaming and starts, restarts or stops
//!   tasks as event configuration changes. Each task pushes result
//!   snapshots to a subscriber and only transmits when the snapshot
//!   changed since the last acknowledged one.
//!
//! - **[`ReaderSessionClient`]**: Card-reader side. One persistent
//!   connection to the results server with request/response semantics,
//!   reconnecting forever and re-announcing the reader state after every
//!   reconnect.
//!
//! - **[`HardwareIngestLoop`]**: Polls a card-reader device on its own
//!   worker thread, logs every card read and forwards it through the
//!   session. [`replay`](reader::replay) re-sends a recorded card log.
//!
//! - **[`StatusRegistry`]**: Per-event connection status shared between
//!   stream tasks and an injectable [`StatusObserver`].

pub mod config;
pub mod error;
pub mod event;
pub mod reader;
pub mod status;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{ReaderConfig, StreamTimings, StreamingConfig};
pub use error::{DeviceError, ReplayError, ResultsError, StoreError, StreamError};
pub use event::{
    ClassResults, EventId, EventStore, EventStreamConfig, JsonResultList, ResultListEncoder,
    ResultSnapshot, ResultsSource,
};
pub use reader::{
    CardLog, CardPresence, CardReaderDevice, DeviceDiscovery, HardwareIngestLoop, PunchRecord,
    ReaderSessionClient,
};
pub use status::{Status, StatusObserver, StatusRegistry};
pub use stream::{Collaborators, StreamingSupervisor};
