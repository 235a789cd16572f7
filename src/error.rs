//! Errors returned by the light source driver.

use std::time::Duration;

use thiserror::Error;

use crate::reply::QueryKind;

/// Everything that can go wrong between a command and its parsed reply.
///
/// Nothing here is retried by the driver; every variant propagates unchanged to
/// the caller of the session operation that produced it.
#[derive(Debug, Error)]
pub enum LightError {
    /// Opening or configuring the serial port failed.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Writing a frame or reading a reply failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No terminator arrived before the read deadline.
    #[error("No reply within {0:?}")]
    Timeout(Duration),

    /// The command body cannot be sent as a single ASCII frame.
    #[error("Command {command:?} is not framable (non-ASCII or contains the terminator)")]
    Encoding { command: String },

    /// The reply contained non-ASCII bytes.
    #[error("Reply is not ASCII: {reply:?}")]
    Decode { reply: Vec<u8> },

    /// The reply is too short for the fixed-offset layout of its query.
    #[error("Reply {reply:?} to {kind} is too short")]
    Protocol { kind: QueryKind, reply: String },

    /// The extracted field is not a valid number or flag.
    #[error("Cannot read {kind} from field {field:?}")]
    Format { kind: QueryKind, field: String },

    /// A thread panicked while it held the session lock.
    #[error("Session lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, LightError>;
