// ── Core error types ──
//
// Failures surfaced by the streaming supervisor and the card-reader side.
// Transport errors from `oolive-api` are wrapped, not re-modelled: the
// state machines classify them at the call site and only the faults that
// end a task or a session reach these types.

use thiserror::Error;

use crate::event::EventId;

/// Why a stream task stopped on its own.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The event no longer exists locally or the subscriber does not know it.
    #[error("Event {event_id} not found")]
    EventNotFound { event_id: EventId },

    #[error("Results computation failed: {0}")]
    Results(String),

    #[error("Result list encoding failed: {0}")]
    Encode(String),

    #[error(transparent)]
    Api(#[from] oolive_api::Error),
}

impl From<ResultsError> for StreamError {
    fn from(err: ResultsError) -> Self {
        match err {
            ResultsError::EventNotFound { event_id } => Self::EventNotFound { event_id },
            ResultsError::Failed(reason) => Self::Results(reason),
        }
    }
}

/// Failure of the results computation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResultsError {
    #[error("Event {event_id} not found")]
    EventNotFound { event_id: EventId },

    #[error("{0}")]
    Failed(String),
}

/// Failure loading event configuration.
#[derive(Debug, Error)]
#[error("Cannot load events: {message}")]
pub struct StoreError {
    pub message: String,
}

/// Card-reader device failure.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No matching reader is attached.
    #[error("No card reader found: {0}")]
    NotFound(String),

    /// The card was pulled out of the reader mid-read.
    #[error("Card removed during read")]
    CardChanged,

    /// The station answered with an unexpected frame or rejected a command.
    #[error("Reader protocol error: {0}")]
    Protocol(String),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure replaying a recorded card log.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Cannot read card log: {0}")]
    Io(#[from] std::io::Error),

    /// A record does not match the card-reader entry layout.
    #[error("Invalid record on line {line}: {reason}")]
    InvalidRecord { line: usize, reason: String },

    #[error("Prompt failed: {0}")]
    Prompt(String),
}
