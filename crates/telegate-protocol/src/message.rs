//! Dialect-tagged parsed message
//!
//! Every successfully parsed frame becomes one [`ParsedMessage`] variant, so
//! downstream code matches on the variant instead of downcasting.

use serde::Serialize;

use crate::ns::NsRecord;
use crate::rdd::RddRecord;
use crate::tc::TcRecord;
use crate::Dialect;

/// A parsed message from one of the supported dialects
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ParsedMessage {
    /// NS record
    Ns(NsRecord),
    /// Rdd record
    Rdd(RddRecord),
    /// Tc record
    Tc(TcRecord),
}

impl ParsedMessage {
    /// The device identity carried by this message.
    ///
    /// Empty when the frame parsed but named no device (the caller decides
    /// whether such a message is useful).
    pub fn device_id(&self) -> &str {
        match self {
            ParsedMessage::Ns(record) => &record.device_id,
            ParsedMessage::Rdd(record) => &record.device_id,
            ParsedMessage::Tc(record) => &record.header.token,
        }
    }

    /// The dialect this message was parsed under
    pub fn dialect(&self) -> Dialect {
        match self {
            ParsedMessage::Ns(_) => Dialect::Ns,
            ParsedMessage::Rdd(_) => Dialect::Rdd,
            ParsedMessage::Tc(_) => Dialect::Tc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_per_variant() {
        let ns_wire = Dialect::Ns.pack("ST=32;CN=2011;MN=NS-DEV;Flag=0;CP=&&&&");
        let ns = Dialect::Ns.parse(&ns_wire[..ns_wire.len() - 2]).unwrap();
        assert_eq!(ns.device_id(), "NS-DEV");
        assert_eq!(ns.dialect(), Dialect::Ns);

        let tc = Dialect::Tc
            .parse(br#"{"header":{"token":"TC-DEV"}}"#)
            .unwrap();
        assert_eq!(tc.device_id(), "TC-DEV");
        assert_eq!(tc.dialect(), Dialect::Tc);
    }

    #[test]
    fn test_empty_identity_is_representable() {
        let tc = Dialect::Tc.parse(b"{}").unwrap();
        assert_eq!(tc.device_id(), "");
    }
}
