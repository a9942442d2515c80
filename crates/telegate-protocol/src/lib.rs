//! Telegate Protocol Library
//!
//! This crate provides framing, checksum, and parsing for the wire dialects
//! spoken by telemetry/control devices:
//!
//! - **NS**: length+checksum envelope with a semicolon-keyed text payload
//! - **Rdd**: wide length+checksum envelope with a JSON command payload
//! - **Tc**: terminator-delimited bare JSON messages
//!
//! # Architecture
//!
//! Each dialect module provides:
//! - A record struct describing one parsed message
//! - `parse(frame)` from a complete frame (terminator stripped)
//! - `pack(payload)` to complete wire bytes
//!
//! [`FrameCodec`] extracts complete frames from a byte stream and is usable
//! with `tokio_util::codec::{FramedRead, FramedWrite}`; [`Dialect`] ties a
//! framing strategy to its parser so servers stay generic over the wire
//! format.
//!
//! # Example
//!
//! ```rust
//! use telegate_protocol::{Dialect, ParsedMessage};
//!
//! let wire = Dialect::Ns.pack("ST=32;CN=2011;MN=WXTC20191121196;Flag=0;CP=&&&&");
//! // The stream codec strips the terminator before parse is called.
//! let msg = Dialect::Ns.parse(&wire[..wire.len() - 2]).unwrap();
//! assert_eq!(msg.device_id(), "WXTC20191121196");
//! assert!(matches!(msg, ParsedMessage::Ns(_)));
//! ```

pub mod checksum;
pub mod error;
pub mod frame;
pub mod message;
pub mod ns;
pub mod rdd;
pub mod tc;

pub use checksum::checksum;
pub use error::{FrameError, ParseError};
pub use frame::{Envelope, FrameCodec, Framing};
pub use message::ParsedMessage;

/// Identifies which wire dialect a device speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Dialect {
    /// Length+checksum envelope, semicolon-keyed text payload
    Ns,
    /// Wide length+checksum envelope, JSON command payload
    Rdd,
    /// Delimiter-framed bare JSON
    Tc,
}

impl Dialect {
    /// Human-readable name of the dialect
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Ns => "NS",
            Dialect::Rdd => "Rdd",
            Dialect::Tc => "Tc",
        }
    }

    /// Terminator byte sequence closing every frame of this dialect
    pub fn terminator(&self) -> &'static [u8] {
        self.framing().terminator()
    }

    /// Stream framing strategy for this dialect
    pub fn framing(&self) -> Framing {
        match self {
            Dialect::Ns => Framing::Enveloped(ns::ENVELOPE),
            Dialect::Rdd => Framing::Enveloped(rdd::ENVELOPE),
            Dialect::Tc => Framing::Delimited {
                terminator: tc::TERMINATOR,
            },
        }
    }

    /// Create a stream codec for this dialect
    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.framing())
    }

    /// Parse one complete frame (terminator stripped) into a tagged message
    pub fn parse(&self, frame: &[u8]) -> Result<ParsedMessage, ParseError> {
        match self {
            Dialect::Ns => ns::parse(frame).map(ParsedMessage::Ns),
            Dialect::Rdd => rdd::parse(frame).map(ParsedMessage::Rdd),
            Dialect::Tc => tc::parse(frame).map(ParsedMessage::Tc),
        }
    }

    /// Pack a pre-encoded payload into complete wire bytes for this dialect
    pub fn pack(&self, payload: &str) -> Vec<u8> {
        match self {
            Dialect::Ns => ns::pack(payload),
            Dialect::Rdd => rdd::pack(payload),
            Dialect::Tc => tc::pack(payload),
        }
    }
}
