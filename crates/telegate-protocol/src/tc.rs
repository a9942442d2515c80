//! Tc dialect: delimiter-framed JSON messages
//!
//! # Format
//! - Frame: bare JSON object + `\r\n`
//! - No header, length, or checksum segment; only the terminator separates
//!   frames on the stream
//! - Device identity is `header.token`
//!
//! ```json
//! {
//!   "header": {
//!     "sequence": 12, "timestamp": 1578974400, "token": "TC-001",
//!     "id": 7, "message": {"type": 1, "length": 42}
//!   },
//!   "body": {"length": 42, "flag": 0, "content": {...}}
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Terminator separating Tc frames
pub const TERMINATOR: &[u8] = b"\r\n";

/// Message metadata nested inside the Tc header
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TcMessageMeta {
    /// Message type discriminator (`message.type`)
    #[serde(rename = "type", default)]
    pub message_type: u32,
    /// Declared message length (`message.length`)
    #[serde(default)]
    pub length: u32,
}

/// Tc frame header
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TcHeader {
    /// Monotonic sequence number
    #[serde(default)]
    pub sequence: u64,
    /// Sender timestamp
    #[serde(default)]
    pub timestamp: i64,
    /// Device identity
    #[serde(default)]
    pub token: String,
    /// System identifier (`id`)
    #[serde(rename = "id", default)]
    pub system_id: u32,
    /// Nested message metadata
    #[serde(default)]
    pub message: TcMessageMeta,
}

/// Tc frame body
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TcBody {
    /// Declared body length
    #[serde(default)]
    pub length: u32,
    /// Compression flag
    #[serde(default)]
    pub flag: u8,
    /// Payload content mapping
    #[serde(default)]
    pub content: serde_json::Map<String, serde_json::Value>,
}

/// A parsed Tc message
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TcRecord {
    /// Frame header
    #[serde(default)]
    pub header: TcHeader,
    /// Frame body
    #[serde(default)]
    pub body: TcBody,
}

/// Parse one Tc frame (terminator already stripped by the codec).
pub fn parse(frame: &[u8]) -> Result<TcRecord, ParseError> {
    Ok(serde_json::from_slice(frame)?)
}

/// Pack a pre-encoded JSON payload into a wire frame by appending the
/// terminator. No validation is performed on the payload.
pub fn pack(payload: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + TERMINATOR.len());
    out.extend_from_slice(payload.as_bytes());
    out.extend_from_slice(TERMINATOR);
    out
}
