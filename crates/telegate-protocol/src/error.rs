//! Error types for frame extraction and dialect parsing
//!
//! The two enums mirror the two failure domains: [`FrameError`] is raised by
//! the stream codec when the byte stream can no longer be framed (fatal to a
//! connection, since an enveloped stream cannot resynchronize after a bad
//! length field), while [`ParseError`] is raised per frame and only costs the
//! offending message.

use thiserror::Error;

/// Errors raised while parsing a single extracted frame
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Frame is shorter than the dialect's fixed envelope
    #[error("frame too short: {len} bytes, envelope needs {min}")]
    Truncated { len: usize, min: usize },

    /// Frame does not start with the dialect's header literal
    #[error("invalid frame header")]
    InvalidHeader,

    /// Body checksum does not match the checksum field
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// The `CP=&&` data-region marker is absent
    #[error("missing CP=&& data region marker")]
    MissingDataMarker,

    /// A field the dialect requires is absent or empty
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// JSON payload failed to decode (Rdd command envelope, Tc body)
    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),

    /// Frame bytes are not valid UTF-8 where the dialect requires text
    #[error("frame is not valid UTF-8")]
    NotUtf8,
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        ParseError::InvalidJson(err.to_string())
    }
}

/// Errors raised by the stream frame codec
///
/// Any of these means the framing boundaries are lost and the connection
/// should be torn down.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Stream does not start with the dialect's header literal
    #[error("invalid frame header on stream")]
    InvalidHeader,

    /// Length field is not fixed-width ASCII decimal
    #[error("invalid length field: {0:?}")]
    InvalidLength(String),

    /// Terminator absent at the offset the length field promised
    #[error("terminator missing at declared frame end")]
    MissingTerminator,

    /// Accumulated more than the allowed bytes without finding a frame
    #[error("frame exceeds {max} bytes")]
    FrameTooLarge { max: usize },

    /// Transport error surfaced through the codec
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
