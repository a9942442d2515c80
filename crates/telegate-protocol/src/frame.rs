//! Stream frame extraction
//!
//! [`FrameCodec`] turns a raw TCP byte stream into discrete frames. Two
//! strategies exist, selected by the dialect:
//!
//! - **Enveloped** (NS, Rdd): fixed header literal, fixed-width ASCII decimal
//!   length of the body, body, 4-hex-digit checksum, terminator. The length
//!   field tells the codec exactly how many bytes the frame occupies, so a
//!   frame spanning several reads is assembled without rescanning.
//! - **Delimited** (Tc): scan for the terminator byte sequence; everything
//!   before it is the frame.
//!
//! The decoded item is the full frame *excluding* the terminator; checksum
//! and payload validation happen in the dialect parser so a corrupt body
//! costs one message, not the connection.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FrameError;

/// Upper bound on a single frame, shared by both strategies.
///
/// Enveloped length fields top out at 8 decimal digits, but a hostile peer
/// could still declare an absurd length; delimited streams have no length
/// field at all. Anything past this is treated as an unframeable stream.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Fixed envelope parameters for a length+checksum framed dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    /// Header literal opening every frame
    pub header: &'static [u8],
    /// Width of the ASCII decimal body-length field
    pub len_digits: usize,
    /// Width of the hex checksum field
    pub checksum_digits: usize,
    /// Terminator closing every frame
    pub terminator: &'static [u8],
}

impl Envelope {
    /// Bytes occupied by a frame with a `body_len`-byte body.
    pub fn frame_len(&self, body_len: usize) -> usize {
        self.header.len() + self.len_digits + body_len + self.checksum_digits + self.terminator.len()
    }
}

/// Framing strategy for a dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Header + length + body + checksum + terminator
    Enveloped(Envelope),
    /// Terminator-delimited, no length or checksum segment
    Delimited { terminator: &'static [u8] },
}

impl Framing {
    /// The terminator byte sequence for this framing
    pub fn terminator(&self) -> &'static [u8] {
        match self {
            Framing::Enveloped(env) => env.terminator,
            Framing::Delimited { terminator } => terminator,
        }
    }
}

/// `tokio_util::codec` implementation over a [`Framing`] strategy
///
/// Decoding is restartable: partial frames yield `Ok(None)` and the buffer
/// is re-examined on the next read; several frames arriving in one read are
/// drained one `decode` call at a time.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    framing: Framing,
}

impl FrameCodec {
    /// Create a codec for the given framing strategy
    pub fn new(framing: Framing) -> Self {
        Self { framing }
    }

    fn decode_enveloped(
        env: &Envelope,
        src: &mut BytesMut,
    ) -> Result<Option<Bytes>, FrameError> {
        let prefix_len = env.header.len() + env.len_digits;
        if src.len() < prefix_len {
            return Ok(None);
        }

        if &src[..env.header.len()] != env.header {
            return Err(FrameError::InvalidHeader);
        }

        let len_field = &src[env.header.len()..prefix_len];
        let body_len: usize = std::str::from_utf8(len_field)
            .ok()
            .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                FrameError::InvalidLength(String::from_utf8_lossy(len_field).into_owned())
            })?;

        let total = env.frame_len(body_len);
        if total > MAX_FRAME_LEN {
            return Err(FrameError::FrameTooLarge { max: MAX_FRAME_LEN });
        }
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let term_at = total - env.terminator.len();
        if &src[term_at..total] != env.terminator {
            return Err(FrameError::MissingTerminator);
        }

        let frame = src.split_to(total).freeze();
        Ok(Some(frame.slice(..term_at)))
    }

    fn decode_delimited(
        terminator: &'static [u8],
        src: &mut BytesMut,
    ) -> Result<Option<Bytes>, FrameError> {
        match find_subsequence(src, terminator) {
            Some(pos) => {
                let frame = src.split_to(pos).freeze();
                src.advance(terminator.len());
                Ok(Some(frame))
            }
            None => {
                if src.len() > MAX_FRAME_LEN {
                    return Err(FrameError::FrameTooLarge { max: MAX_FRAME_LEN });
                }
                Ok(None)
            }
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        match &self.framing {
            Framing::Enveloped(env) => Self::decode_enveloped(env, src),
            Framing::Delimited { terminator } => Self::decode_delimited(terminator, src),
        }
    }
}

/// Outbound frames are already fully packed by the dialect; the encoder
/// copies them to the write buffer verbatim.
impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Dialect;

    fn ns_codec() -> FrameCodec {
        FrameCodec::new(Dialect::Ns.framing())
    }

    fn tc_codec() -> FrameCodec {
        FrameCodec::new(Dialect::Tc.framing())
    }

    #[test]
    fn test_single_frame() {
        let wire = Dialect::Ns.pack("ST=32;CN=2011;MN=DEV1;Flag=0;CP=&&&&");
        let mut buf = BytesMut::from(&wire[..]);
        let mut codec = ns_codec();

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        // Decoded frame excludes the terminator.
        assert_eq!(&frame[..], &wire[..wire.len() - 2]);
        assert!(buf.is_empty());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_two_frames_in_one_chunk() {
        let a = Dialect::Ns.pack("ST=32;CN=2011;MN=DEV1;Flag=0;CP=&&&&");
        let b = Dialect::Ns.pack("ST=32;CN=2051;MN=DEV2;Flag=1;CP=&&&&");
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&a);
        buf.extend_from_slice(&b);
        let mut codec = ns_codec();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&first[..], &a[..a.len() - 2]);
        assert_eq!(&second[..], &b[..b.len() - 2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_frame_split_across_three_chunks() {
        let wire = Dialect::Ns.pack("ST=32;CN=2011;MN=DEV1;Flag=0;CP=&&DataTime=20200114120000&&");
        let third = wire.len() / 3;
        let mut buf = BytesMut::new();
        let mut codec = ns_codec();

        buf.extend_from_slice(&wire[..third]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&wire[third..2 * third]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&wire[2 * third..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], &wire[..wire.len() - 2]);
    }

    #[test]
    fn test_bad_header_is_fatal() {
        let mut buf = BytesMut::from(&b"XX0004bodyCRC1\r\n"[..]);
        let mut codec = ns_codec();
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameError::InvalidHeader)
        ));
    }

    #[test]
    fn test_non_decimal_length_is_fatal() {
        let mut buf = BytesMut::from(&b"##00xybody"[..]);
        let mut codec = ns_codec();
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameError::InvalidLength(_))
        ));
    }

    #[test]
    fn test_missing_terminator_is_fatal() {
        // Declared body length 4, but the bytes where \r\n should sit differ.
        let mut buf = BytesMut::from(&b"##0004bodyCRC1XXtrailing"[..]);
        let mut codec = ns_codec();
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameError::MissingTerminator)
        ));
    }

    #[test]
    fn test_partial_length_field_waits() {
        let mut buf = BytesMut::from(&b"##00"[..]);
        let mut codec = ns_codec();
        assert!(codec.decode(&mut buf).unwrap().is_none());
        // Bytes must survive for the next read.
        assert_eq!(&buf[..], b"##00");
    }

    #[test]
    fn test_delimited_frames() {
        let mut buf = BytesMut::from(&b"{\"a\":1}\r\n{\"b\":2}\r\n{\"c\""[..]);
        let mut codec = tc_codec();

        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"{\"a\":1}");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"{\"b\":2}");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], b"{\"c\"");
    }

    #[test]
    fn test_delimited_frame_too_large() {
        let mut buf = BytesMut::new();
        buf.resize(MAX_FRAME_LEN + 1, b'x');
        let mut codec = tc_codec();
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_encoder_writes_verbatim() {
        let mut codec = ns_codec();
        let mut dst = BytesMut::new();
        let wire = Bytes::from(Dialect::Ns.pack("ST=1;CN=2;MN=M;CP=&&&&"));
        codec.encode(wire.clone(), &mut dst).unwrap();
        assert_eq!(&dst[..], &wire[..]);
    }
}
