//! NS dialect: length+checksum enveloped, semicolon-keyed text payload
//!
//! # Format
//! - Frame: `##` + 4-digit decimal body length + body + 4-hex CRC + `\r\n`
//! - Body: code region + `CP=&&` + data region + `&&`
//! - Code region: `;`-separated `KEY=value` pairs (QN, ST, CN, PW, MN, Flag,
//!   PNUM, PNO)
//! - Data region: `;`-separated entries; an entry is either `KEY=value` or a
//!   comma-grouped cluster `K1=v1,K2=v2` — both flatten into one map
//!
//! The 8-bit `Flag` value carries derived message properties:
//! bit 0 = reply required, bit 1 = packet numbering present (PNUM/PNO),
//! bits 2-3 = protocol revision (0 = 2005, bit 2 = 2017, bit 3 = 2017
//! extended).

use std::collections::HashMap;

use serde::Serialize;

use crate::checksum::checksum;
use crate::error::ParseError;
use crate::frame::Envelope;

/// Envelope parameters for NS frames
pub const ENVELOPE: Envelope = Envelope {
    header: b"##",
    len_digits: 4,
    checksum_digits: 4,
    terminator: b"\r\n",
};

/// Protocol revision derived from the flag byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProtocolVersion {
    /// Flag bits 2-3 clear
    V2005,
    /// Flag bit 2 set
    V2017,
    /// Flag bit 3 set (extended revision; renders as "2017" on the wire)
    V2017Ext,
}

impl ProtocolVersion {
    /// Wire rendering of the revision; the extended revision is not
    /// distinguishable in the wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V2005 => "2005",
            ProtocolVersion::V2017 | ProtocolVersion::V2017Ext => "2017",
        }
    }

    fn from_flag(flag: u8) -> Self {
        if flag & 0b1000 != 0 {
            ProtocolVersion::V2017Ext
        } else if flag & 0b0100 != 0 {
            ProtocolVersion::V2017
        } else {
            ProtocolVersion::V2005
        }
    }
}

/// A parsed NS message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NsRecord {
    /// Original frame text, envelope included, terminator excluded
    pub raw: String,
    /// Request code (QN)
    pub request_code: String,
    /// System type (ST)
    pub system_type: String,
    /// Command code (CN)
    pub command_code: String,
    /// Access password (PW)
    pub password: String,
    /// Device identity (MN)
    pub device_id: String,
    /// Raw flag byte
    pub flag: u8,
    /// Total packet count (PNUM)
    pub packet_count: u32,
    /// Current packet number (PNO)
    pub packet_number: u32,
    /// Flattened data region
    pub data: HashMap<String, String>,
    /// Revision derived from the flag byte
    pub protocol_version: ProtocolVersion,
    /// Flag bit 1: PNUM/PNO are meaningful
    pub has_packet_number: bool,
    /// Flag bit 0: the device expects a reply
    pub need_reply: bool,
}

/// Parse one NS frame (terminator already stripped by the codec).
pub fn parse(frame: &[u8]) -> Result<NsRecord, ParseError> {
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

    // Each segment is sliced as bytes and validated on its own: a multibyte
    // character straddling the checksum boundary leaves the whole frame
    // valid UTF-8 while the segment offsets are not char boundaries.
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
    let lookup = |key: &str| code.get(key).cloned().unwrap_or_default();

    let record = NsRecord {
        raw: format!("{prefix}{body}{received_crc}"),
        request_code: lookup("QN"),
        system_type: lookup("ST"),
        command_code: lookup("CN"),
        password: lookup("PW"),
        device_id: lookup("MN"),
        flag: parse_num(code.get("Flag")),
        packet_count: parse_num(code.get("PNUM")),
        packet_number: parse_num(code.get("PNO")),
        data: parse_data_region(data_region),
        protocol_version: ProtocolVersion::V2005,
        has_packet_number: false,
        need_reply: false,
    };

    if record.system_type.is_empty() {
        return Err(ParseError::MissingField("ST"));
    }
    if record.command_code.is_empty() {
        return Err(ParseError::MissingField("CN"));
    }
    if record.device_id.is_empty() {
        return Err(ParseError::MissingField("MN"));
    }

    Ok(NsRecord {
        protocol_version: ProtocolVersion::from_flag(record.flag),
        has_packet_number: record.flag & 0b10 != 0,
        need_reply: record.flag & 0b1 != 0,
        ..record
    })
}

/// Pack a pre-encoded NS body into a complete wire frame.
///
/// No bound is enforced on the body length; a body longer than the 4-digit
/// length field can describe will be rejected by the receiving codec.
pub fn pack(body: &str) -> Vec<u8> {
    let mut out = String::with_capacity(body.len() + 12);
    out.push_str("##");
    out.push_str(&format!("{:04}", body.len()));
    out.push_str(body);
    out.push_str(&checksum(body.as_bytes()));
    out.push_str("\r\n");
    out.into_bytes()
}

/// Split a `;`-separated region of `KEY=value` pairs into a map.
/// Entries without `=` are skipped.
pub(crate) fn parse_pairs(region: &str) -> HashMap<String, String> {
    region
        .split(';')
        .filter_map(|entry| entry.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Flatten the data region: top-level `;` entries, with comma-grouped
/// clusters (`K1=v1,K2=v2`) expanded into the same map.
fn parse_data_region(region: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for entry in region.split(';') {
        if entry.contains(',') {
            for sub in entry.split(',') {
                if let Some((k, v)) = sub.split_once('=') {
                    map.insert(k.to_string(), v.to_string());
                }
            }
        } else if let Some((k, v)) = entry.split_once('=') {
            map.insert(k.to_string(), v.to_string());
        }
    }
    map
}

fn parse_num<T: std::str::FromStr + Default>(value: Option<&String>) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SAMPLE_BODY: &str = "QN=20200114120000001;ST=32;CN=2011;PW=123456;MN=WXTC20191121196;\
                               Flag=5;CP=&&DataTime=20200114120000;011-Rtd=50.5,011-Flag=N&&";

    #[test]
    fn test_parse_sample_frame() {
        let wire = pack(SAMPLE_BODY);
        let record = parse(&wire[..wire.len() - 2]).unwrap();

        assert_eq!(record.request_code, "20200114120000001");
        assert_eq!(record.system_type, "32");
        assert_eq!(record.command_code, "2011");
        assert_eq!(record.password, "123456");
        assert_eq!(record.device_id, "WXTC20191121196");
        assert_eq!(record.flag, 5);
        assert_eq!(record.protocol_version, ProtocolVersion::V2017);
        assert!(record.need_reply);
        assert!(!record.has_packet_number);
        assert_eq!(record.data["DataTime"], "20200114120000");
        assert_eq!(record.data["011-Rtd"], "50.5");
        assert_eq!(record.data["011-Flag"], "N");
    }

    #[test]
    fn test_flag_table() {
        use ProtocolVersion::*;
        // flag -> (version, has_packet_number, need_reply)
        let table = [
            (0, V2005, false, false),
            (1, V2005, false, true),
            (2, V2005, true, false),
            (3, V2005, true, true),
            (4, V2017, false, false),
            (5, V2017, false, true),
            (6, V2017, true, false),
            (7, V2017, true, true),
            (8, V2017Ext, false, false),
            (9, V2017Ext, false, true),
            (10, V2017Ext, true, false),
            (11, V2017Ext, true, true),
        ];
        for (flag, version, has_pno, need_reply) in table {
            let body = format!("ST=32;CN=2011;MN=DEV1;Flag={flag};CP=&&&&");
            let wire = pack(&body);
            let record = parse(&wire[..wire.len() - 2]).unwrap();
            assert_eq!(record.protocol_version, version, "flag {flag}");
            assert_eq!(record.has_packet_number, has_pno, "flag {flag}");
            assert_eq!(record.need_reply, need_reply, "flag {flag}");
        }
    }

    #[test]
    fn test_version_wire_rendering() {
        assert_eq!(ProtocolVersion::V2005.as_str(), "2005");
        assert_eq!(ProtocolVersion::V2017.as_str(), "2017");
        assert_eq!(ProtocolVersion::V2017Ext.as_str(), "2017");
    }

    #[test]
    fn test_packet_numbering_fields() {
        let body = "ST=32;CN=2011;MN=DEV1;Flag=2;PNUM=3;PNO=2;CP=&&&&";
        let wire = pack(body);
        let record = parse(&wire[..wire.len() - 2]).unwrap();
        assert!(record.has_packet_number);
        assert_eq!(record.packet_count, 3);
        assert_eq!(record.packet_number, 2);
    }

    #[test]
    fn test_missing_required_fields() {
        for (body, field) in [
            ("CN=2011;MN=DEV1;CP=&&&&", "ST"),
            ("ST=32;MN=DEV1;CP=&&&&", "CN"),
            ("ST=32;CN=2011;CP=&&&&", "MN"),
        ] {
            let wire = pack(body);
            assert_eq!(
                parse(&wire[..wire.len() - 2]),
                Err(ParseError::MissingField(field))
            );
        }
    }

    #[test]
    fn test_checksum_mismatch_on_corrupt_body() {
        let mut wire = pack(SAMPLE_BODY);
        // Corrupt one body byte, leaving header and length untouched.
        wire[10] ^= 0x01;
        assert!(matches!(
            parse(&wire[..wire.len() - 2]),
            Err(ParseError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8_body() {
        let mut wire = pack("ST=32;CN=2011;MN=DEV1;Flag=0;CP=&&&&");
        wire[10] = 0xFF;
        assert_eq!(parse(&wire[..wire.len() - 2]), Err(ParseError::NotUtf8));
    }

    #[test]
    fn test_multibyte_char_straddling_checksum_boundary() {
        // Body declared as 7 bytes ends mid-character: the first two bytes
        // of a three-byte char close the body and the third lands in the
        // checksum field. The frame as a whole is valid UTF-8, so this must
        // fail as NotUtf8 rather than slicing off a char boundary.
        let mut frame = b"##0007AAAAA".to_vec();
        frame.extend_from_slice("\u{4e2d}".as_bytes());
        frame.extend_from_slice(b"XXX");
        assert!(std::str::from_utf8(&frame).is_ok());
        assert_eq!(parse(&frame), Err(ParseError::NotUtf8));
    }

    #[test]
    fn test_missing_data_marker() {
        let wire = pack("ST=32;CN=2011;MN=DEV1;Flag=0");
        assert_eq!(
            parse(&wire[..wire.len() - 2]),
            Err(ParseError::MissingDataMarker)
        );
    }

    #[test]
    fn test_pack_layout() {
        let wire = pack("ST=1;CN=2;MN=M;CP=&&&&");
        let text = std::str::from_utf8(&wire).unwrap();
        assert!(text.starts_with("##0022"));
        assert!(text.ends_with("\r\n"));
        // 4-hex checksum sits just before the terminator.
        let crc = &text[text.len() - 6..text.len() - 2];
        assert!(crc.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_pack_parse_round_trip_preserves_data_region() {
        let wire = pack(SAMPLE_BODY);
        let record = parse(&wire[..wire.len() - 2]).unwrap();
        let repacked = pack(SAMPLE_BODY);
        assert_eq!(wire, repacked);
        // The data region survives parse losslessly.
        assert_eq!(record.data.len(), 3);
    }

    proptest! {
        #[test]
        fn prop_round_trip_data_entries(
            entries in proptest::collection::hash_map("[A-Za-z][A-Za-z0-9-]{0,8}", "[A-Za-z0-9.]{1,12}", 1..8)
        ) {
            let data_region: Vec<String> =
                entries.iter().map(|(k, v)| format!("{k}={v}")).collect();
            let body = format!(
                "ST=32;CN=2011;MN=DEV1;Flag=0;CP=&&{}&&",
                data_region.join(";")
            );
            let wire = pack(&body);
            let record = parse(&wire[..wire.len() - 2]).unwrap();
            for (k, v) in &entries {
                prop_assert_eq!(record.data.get(k), Some(v));
            }
        }
    }
}
