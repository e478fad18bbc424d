//! # Error Types
//!
//! Every fallible operation in `lib_fixnet` returns a [`FixNetError`]. Transport
//! failures never reach a caller as an error: they only drive the reconnect loop
//! of the `TransportLink` and show up as a connection state transition.
//!
//! [`ProtocolError`] covers frames that could not be decoded. These are logged
//! and discarded by the receive path; the link keeps running.

use thiserror::Error;

/// A malformed or undecodable frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    EmptyFrame,

    #[error("frame is not valid UTF-8 ({len} bytes discarded)")]
    InvalidUtf8 { len: usize },

    #[error("unterminated frame exceeded {limit} bytes and was discarded")]
    FrameTooLong { limit: usize },

    #[error("response frame without a tag letter")]
    MissingTag,

    #[error("bad data sentence '{0}'")]
    BadSentence(String),

    #[error("bad quality flag bits '{0}'")]
    BadFlags(String),

    #[error("report has {found} fields, expected at least {expected}")]
    ShortReport { found: usize, expected: usize },

    #[error("unknown data type '{0}'")]
    UnknownDataType(String),

    #[error("unexpected response payload '{0}'")]
    UnexpectedPayload(String),
}

/// The error type shared by the request channel, replica store and data points.
#[derive(Debug, Error)]
pub enum FixNetError {
    #[error("not connected to server")]
    NotConnected,

    #[error("timeout waiting on response '{tag}'")]
    ResponseTimeout { tag: char },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("unknown flag: {0}")]
    UnknownFlag(String),

    #[error("server error {code} for '{key}'")]
    Server { key: String, code: String },

    #[error("bad value '{input}' for {key} ({dtype})")]
    Conversion {
        key: String,
        input: String,
        dtype: String,
    },

    #[error("no aux '{aux}' for {key}")]
    UnknownAux { key: String, aux: String },

    #[error("unknown data point '{0}'")]
    UnknownKey(String),

    #[error("I/O error occurred: {0}")]
    Io(#[from] std::io::Error),
}

impl FixNetError {
    /// Maps an error code found after `!` in a response payload to a typed error.
    ///
    /// `001` is "key not found" and `002` is "unknown flag"; everything else is
    /// reported as a generic server error. `subject` is the text in front of the
    /// `!` (usually the key) or the flag name for flag requests.
    pub fn from_server_code(subject: &str, code: &str) -> Self {
        match code {
            "001" => FixNetError::KeyNotFound(subject.to_string()),
            "002" => FixNetError::UnknownFlag(subject.to_string()),
            other => FixNetError::Server {
                key: subject.to_string(),
                code: other.to_string(),
            },
        }
    }

    /// True for the errors the reconnect logic treats as "link is down".
    pub fn is_disconnect(&self) -> bool {
        matches!(self, FixNetError::NotConnected | FixNetError::Io(_))
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, FixNetError>;
