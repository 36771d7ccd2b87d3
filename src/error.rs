//! Error types for NadiIO

use crate::protocol::ChannelKind;
use crate::session::SessionState;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// NadiIO error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connect, send or receive failure on the server socket
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// Socket read timeout elapsed without data
    #[error("Communication timeout")]
    Timeout,

    /// A control command got no acknowledgement or a negative one
    #[error("Control command '{operation}' failed: {reason}")]
    Control {
        /// Wire name of the failed command
        operation: &'static str,
        /// Server response or transport failure
        reason: String,
    },

    /// Framing violation (line too long, peer never sends a delimiter)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A data line with a known tag that could not be parsed
    #[error("Malformed {channel} sample '{line}': {reason}")]
    MalformedSample {
        /// Channel the line was tagged with
        channel: ChannelKind,
        /// Offending line
        line: String,
        /// What was wrong with it
        reason: String,
    },

    /// Control operation requested from a state that does not allow it
    #[error("Operation '{operation}' not allowed in state {state}")]
    InvalidState {
        /// Operation name
        operation: &'static str,
        /// State the session was in
        state: SessionState,
    },

    /// Row writer failure
    #[error("Sink error: {0}")]
    Sink(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn control(operation: &'static str, reason: impl Into<String>) -> Self {
        Error::Control {
            operation,
            reason: reason.into(),
        }
    }

    /// Whether a reconnect (or simply carrying on) can clear this condition.
    ///
    /// Protocol violations are fatal to the current stream; everything else
    /// maps to a state the operator can recover from.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Protocol(_))
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
