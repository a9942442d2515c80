//! Rdd dialect: wide length envelope, JSON command payload
//!
//! # Format
//! - Frame: `##**` + 8-digit decimal body length + body + 4-hex CRC + `**\r\n`
//! - Body: `MN=` device id `;CP=&&` JSON object `&&`
//! - JSON object: `{cmd, cmdId, cmdStata, repParam}` where `repParam`, when
//!   present, is itself a JSON *string* decoding to
//!   `{repCode, repStat, repSendParam}`
//!
//! The length field is twice the width of NS's to accommodate larger command
//! payloads; checksum and terminator rules are otherwise the same in kind.
//! An empty data region after `CP=&&` is valid and simply carries no command
//! envelope.

use serde::{Deserialize, Serialize};

use crate::checksum::checksum;
use crate::error::ParseError;
use crate::frame::Envelope;
use crate::ns::parse_pairs;

/// Envelope parameters for Rdd frames
pub const ENVELOPE: Envelope = Envelope {
    header: b"##**",
    len_digits: 8,
    checksum_digits: 4,
    terminator: b"**\r\n",
};

/// Reply block carried inside a command envelope's `repParam`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RddReply {
    /// Reply code (`repCode`)
    #[serde(rename = "repCode", default)]
    pub code: String,
    /// Reply status, "Success" or "Fail" (`repStat`)
    #[serde(rename = "repStat", default)]
    pub status: String,
    /// Parameter string echoed with the reply (`repSendParam`)
    #[serde(rename = "repSendParam", default)]
    pub send_param: String,
}

/// A parsed Rdd message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RddRecord {
    /// Original frame text, envelope included, terminator excluded
    pub raw: String,
    /// Device identity (MN)
    pub device_id: String,
    /// Raw data region string (the undecoded JSON text)
    pub data_region: String,
    /// Decoded command name
    pub command: String,
    /// Command id
    pub command_id: String,
    /// Command status, "Doing" or "End" as received
    pub command_status: String,
    /// Reply block, when `repParam` was present
    pub reply: Option<RddReply>,
}

#[derive(Deserialize)]
struct CommandEnvelope {
    #[serde(default)]
    cmd: String,
    #[serde(rename = "cmdId", default)]
    cmd_id: String,
    #[serde(rename = "cmdStata", default)]
    cmd_status: String,
    #[serde(rename = "repParam", default)]
    rep_param: String,
}

/// Parse one Rdd frame (terminator already stripped by the codec).
pub fn parse(frame: &[u8]) -> Result<RddRecord, ParseError> {
    let min = ENVELOPE.header.len() + ENVELOPE.len_digits + ENVELOPE.checksum_digits;
    if frame.len() < min {
        return Err(ParseError::Truncated {
            len: frame.len(),
            min,
        });
    }
    if !frame.starts_with(ENVELOPE.header) {
        return Err(ParseError::InvalidHeader);
    }

    let body_start = ENVELOPE.header.len() + ENVELOPE.len_digits;
    let crc_start = frame.len() - ENVELOPE.checksum_digits;

    // Sliced as bytes and validated per segment, as in the NS parser: the
    // checksum boundary need not fall on a char boundary of the whole frame.
    let prefix = std::str::from_utf8(&frame[..body_start]).map_err(|_| ParseError::NotUtf8)?;
    let body =
        std::str::from_utf8(&frame[body_start..crc_start]).map_err(|_| ParseError::NotUtf8)?;
    let received_crc =
        std::str::from_utf8(&frame[crc_start..]).map_err(|_| ParseError::NotUtf8)?;

    let computed_crc = checksum(body.as_bytes());
    if computed_crc != received_crc {
        return Err(ParseError::ChecksumMismatch {
            expected: computed_crc,
            actual: received_crc.to_string(),
        });
    }

    let (code_region, data_region) = body
        .split_once("CP=&&")
        .ok_or(ParseError::MissingDataMarker)?;
    let data_region = data_region.strip_suffix("&&").unwrap_or(data_region);

    let code = parse_pairs(code_region);
    let device_id = code.get("MN").cloned().unwrap_or_default();

    let mut record = RddRecord {
        raw: format!("{prefix}{body}{received_crc}"),
        device_id,
        data_region: data_region.to_string(),
        command: String::new(),
        command_id: String::new(),
        command_status: String::new(),
        reply: None,
    };

    // Empty data region: identification/heartbeat frame, no command envelope.
    if !data_region.is_empty() {
        let envelope: CommandEnvelope = serde_json::from_str(data_region)?;
        record.command = envelope.cmd;
        record.command_id = envelope.cmd_id;
        record.command_status = envelope.cmd_status;
        if !envelope.rep_param.is_empty() {
            // repParam is a JSON string whose content is itself JSON.
            record.reply = Some(serde_json::from_str(&envelope.rep_param)?);
        }
    }

    Ok(record)
}

/// Pack a pre-encoded Rdd body into a complete wire frame.
///
/// As with NS, no bound is enforced on the body length.
pub fn pack(body: &str) -> Vec<u8> {
    let mut out = String::with_capacity(body.len() + 20);
    out.push_str("##**");
    out.push_str(&format!("{:08}", body.len()));
    out.push_str(body);
    out.push_str(&checksum(body.as_bytes()));
    out.push_str("**\r\n");
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_terminator(wire: &[u8]) -> &[u8] {
        &wire[..wire.len() - ENVELOPE.terminator.len()]
    }

    #[test]
    fn test_parse_command_frame() {
        let body = r#"MN=RDD2020001;CP=&&{"cmd":"restart","cmdId":"c-77","cmdStata":"Doing"}&&"#;
        let wire = pack(body);
        let record = parse(strip_terminator(&wire)).unwrap();

        assert_eq!(record.device_id, "RDD2020001");
        assert_eq!(record.command, "restart");
        assert_eq!(record.command_id, "c-77");
        assert_eq!(record.command_status, "Doing");
        assert!(record.reply.is_none());
    }

    #[test]
    fn test_parse_reply_block() {
        // repParam is a JSON string containing JSON.
        let body = "MN=RDD2020001;CP=&&{\"cmd\":\"restart\",\"cmdId\":\"c-77\",\
                    \"cmdStata\":\"End\",\"repParam\":\
                    \"{\\\"repCode\\\":\\\"200\\\",\\\"repStat\\\":\\\"Success\\\",\\\"repSendParam\\\":\\\"ok\\\"}\"}&&";
        let wire = pack(body);
        let record = parse(strip_terminator(&wire)).unwrap();

        assert_eq!(record.command_status, "End");
        let reply = record.reply.expect("reply block present");
        assert_eq!(reply.code, "200");
        assert_eq!(reply.status, "Success");
        assert_eq!(reply.send_param, "ok");
    }

    #[test]
    fn test_empty_data_region_is_valid() {
        let body = "MN=RDD2020001;CP=&&&&";
        let wire = pack(body);
        let record = parse(strip_terminator(&wire)).unwrap();

        assert_eq!(record.device_id, "RDD2020001");
        assert!(record.command.is_empty());
        assert!(record.reply.is_none());
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let body = "MN=RDD2020001;CP=&&{not-json&&";
        let wire = pack(body);
        assert!(matches!(
            parse(strip_terminator(&wire)),
            Err(ParseError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_checksum_mismatch() {
        let body = r#"MN=RDD2020001;CP=&&{"cmd":"restart"}&&"#;
        let mut wire = pack(body);
        wire[15] ^= 0x01;
        assert!(matches!(
            parse(strip_terminator(&wire)),
            Err(ParseError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8_body() {
        let mut wire = pack("MN=RDD2020001;CP=&&&&");
        wire[14] = 0xFF;
        assert_eq!(parse(strip_terminator(&wire)), Err(ParseError::NotUtf8));
    }

    #[test]
    fn test_multibyte_char_straddling_checksum_boundary() {
        // The last byte of a three-byte char falls inside the checksum
        // field; the frame is valid UTF-8 end to end but neither segment is.
        let mut frame = b"##**00000007AAAAA".to_vec();
        frame.extend_from_slice("\u{4e2d}".as_bytes());
        frame.extend_from_slice(b"XXX");
        assert!(std::str::from_utf8(&frame).is_ok());
        assert_eq!(parse(&frame), Err(ParseError::NotUtf8));
    }

    #[test]
    fn test_pack_layout() {
        let body = "MN=X;CP=&&&&";
        let wire = pack(body);
        let text = std::str::from_utf8(&wire).unwrap();
        assert!(text.starts_with("##**00000012"));
        assert!(text.ends_with("**\r\n"));
    }
}
