//! Error types for the gateway engine

use thiserror::Error;

/// Errors surfaced to the embedding application
#[derive(Debug, Error)]
pub enum ServerError {
    /// No live connection is registered for the identity
    #[error("identity not connected: {0}")]
    IdentityNotConnected(String),

    /// The target connection is closing and no longer accepts writes
    #[error("connection closed")]
    ConnectionClosed,

    /// `run` was called twice on the same server
    #[error("server already running")]
    AlreadyRunning,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stream framing error
    #[error("frame error: {0}")]
    Frame(#[from] telegate_protocol::FrameError),
}
