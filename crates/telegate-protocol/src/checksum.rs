//! CRC-16/MODBUS checksum used by the enveloped wire dialects
//!
//! The NS and Rdd envelopes carry a 16-bit checksum over the frame body,
//! rendered as 4 uppercase hex digits. Parameters: polynomial 0xA001
//! (reflected), initial value 0xFFFF, no final XOR.

const POLY: u16 = 0xA001;
const INIT: u16 = 0xFFFF;

/// Compute the CRC-16/MODBUS of `data`, rendered as 4 uppercase hex digits.
///
/// The hex rendering is what goes on the wire, so this returns the string
/// form directly rather than the raw `u16`.
pub fn checksum(data: &[u8]) -> String {
    let mut crc = INIT;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            let lsb = crc & 1;
            crc >>= 1;
            if lsb == 1 {
                crc ^= POLY;
            }
        }
    }
    format!("{crc:04X}")
}
