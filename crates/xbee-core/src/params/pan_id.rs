//! PAN ID helpers
//!
//! A PAN ID is entered as hexadecimal text, limited to 64 bits and sent as
//! the shortest big-endian byte string that holds it.

use super::{minimal_be_bytes, parse_hex_u64, ParameterValue, ValueError};

/// Parse hexadecimal PAN ID text (optional `0x` prefix, surrounding
/// whitespace ignored)
pub fn parse_pan_id(text: &str) -> Result<u64, ValueError> {
    parse_hex_u64(text)
}

/// Minimal big-endian bytes for a PAN ID given as hex text
pub fn pan_id_bytes(text: &str) -> Result<Vec<u8>, ValueError> {
    parse_pan_id(text).map(minimal_be_bytes)
}

/// PAN ID text as a typed value of minimal width
pub fn pan_id_value(text: &str) -> Result<ParameterValue, ValueError> {
    parse_pan_id(text).map(ParameterValue::unsigned)
}

/// Uppercase hex without leading zeros, as the bytes read back from a radio
pub fn format_pan_id(bytes: &[u8]) -> String {
    let significant: Vec<u8> = bytes.iter().copied().skip_while(|&b| b == 0).collect();
    match significant.split_first() {
        None => "0".to_string(),
        Some((first, rest)) => rest.iter().fold(format!("{:X}", first), |mut s, b| {
            s.push_str(&format!("{:02X}", b));
            s
        }),
    }
}
