//! Error types for parley-session

use std::time::Duration;
use thiserror::Error;

/// Result type alias using parley-session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur on a conversation session
#[derive(Error, Debug)]
pub enum Error {
    /// Frame lacks the `<digits>:` prefix
    #[error("received unrecognized websocket message: \"{0}\"")]
    MalformedFrame(String),

    /// Frame is well formed but carries an unknown event code
    #[error("received unrecognized websocket event: \"{0}\"")]
    UnknownEvent(String),

    /// An error from the completion backend
    #[error(transparent)]
    Backend(#[from] parley_ai::Error),

    /// The turn ran past its wall-clock timeout
    #[error("completion timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The user cancelled the turn
    #[error("completion cancelled")]
    Cancelled,

    /// Reading from or writing to the connection failed
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
}

impl Error {
    /// Whether this error must terminate the connection
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::MalformedFrame(_) | Error::ConnectionClosed(_))
    }
}
