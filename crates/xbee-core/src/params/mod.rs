//! Parameter values
//!
//! Converts between the raw bytes (API frames) or hex text (command mode) a
//! radio returns for a register and typed [`ParameterValue`]s. Which
//! representation applies to a mnemonic is decided by a caller-supplied
//! [`ParameterMap`]; the codecs never assume one.

mod pan_id;

pub use pan_id::{format_pan_id, pan_id_bytes, pan_id_value, parse_pan_id};

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Largest unsigned register, in bytes
pub const MAX_UNSIGNED_WIDTH: usize = 8;

/// Errors converting parameter bytes or text into values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("Cannot parse {input:?} as {expected}")]
    Parse { input: String, expected: String },

    #[error("Value {value} out of range: {bound}")]
    Range { value: String, bound: String },
}

impl ValueError {
    fn parse(input: impl Into<String>, expected: impl Into<String>) -> Self {
        ValueError::Parse {
            input: input.into(),
            expected: expected.into(),
        }
    }

    fn range(value: impl fmt::Display, bound: impl Into<String>) -> Self {
        ValueError::Range {
            value: value.to_string(),
            bound: bound.into(),
        }
    }
}

/// Width of an unsigned register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Width {
    /// Always transmitted as exactly this many bytes
    Fixed(u8),
    /// Minimal big-endian length, 1 to 8 bytes (PAN ID style)
    Variable,
}

/// How a register's contents are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    /// Big-endian unsigned integer
    Unsigned(Width),
    /// ASCII identifier such as the node identifier
    Ascii,
    /// Uninterpreted bytes
    Raw,
}

/// A typed register value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterValue {
    /// Unsigned integer and the number of bytes it occupies
    UnsignedInteger { width: u8, value: u64 },
    /// ASCII text
    AsciiText(String),
    /// Raw byte sequence
    RawBytes(Vec<u8>),
}

impl ParameterValue {
    /// Unsigned value at its minimal width
    pub fn unsigned(value: u64) -> Self {
        ParameterValue::UnsignedInteger {
            width: minimal_be_bytes(value).len() as u8,
            value,
        }
    }

    /// Get as an unsigned integer
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ParameterValue::UnsignedInteger { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Get as text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParameterValue::AsciiText(s) => Some(s),
            _ => None,
        }
    }

    /// Get as raw bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ParameterValue::RawBytes(b) => Some(b),
            _ => None,
        }
    }

    /// Hex rendering: integers in uppercase without leading zeros, raw bytes
    /// as lowercase pairs, text as the hex of its ASCII bytes
    pub fn to_hex_string(&self) -> String {
        match self {
            ParameterValue::UnsignedInteger { value, .. } => format!("{:X}", value),
            ParameterValue::AsciiText(s) => hex_lower(s.as_bytes()),
            ParameterValue::RawBytes(b) => hex_lower(b),
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::AsciiText(s) => f.write_str(s),
            other => f.write_str(&other.to_hex_string()),
        }
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Mnemonic to [`ValueKind`] mapping supplied by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterMap {
    kinds: HashMap<String, ValueKind>,
}

impl ParameterMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, mnemonic: &str, kind: ValueKind) -> Self {
        self.insert(mnemonic, kind);
        self
    }

    /// Set the kind for a mnemonic (case-insensitive)
    pub fn insert(&mut self, mnemonic: &str, kind: ValueKind) {
        self.kinds.insert(mnemonic.to_ascii_uppercase(), kind);
    }

    /// Kind for a mnemonic; unmapped mnemonics are treated as raw bytes
    pub fn kind(&self, mnemonic: &str) -> ValueKind {
        self.kinds
            .get(&mnemonic.to_ascii_uppercase())
            .copied()
            .unwrap_or(ValueKind::Raw)
    }

    /// Whether the mnemonic has an explicit mapping
    pub fn contains(&self, mnemonic: &str) -> bool {
        self.kinds.contains_key(&mnemonic.to_ascii_uppercase())
    }

    /// Mapping for the registers most configuration tools touch
    pub fn common() -> Self {
        use ValueKind::*;
        use Width::*;

        Self::new()
            .with("ID", Unsigned(Variable))
            .with("DH", Unsigned(Fixed(4)))
            .with("DL", Unsigned(Fixed(4)))
            .with("SH", Unsigned(Fixed(4)))
            .with("SL", Unsigned(Fixed(4)))
            .with("MY", Unsigned(Fixed(2)))
            .with("CH", Unsigned(Fixed(1)))
            .with("VR", Unsigned(Fixed(2)))
            .with("HV", Unsigned(Fixed(2)))
            .with("NI", Ascii)
            .with("CE", Unsigned(Fixed(1)))
            .with("AP", Unsigned(Fixed(1)))
            .with("BD", Unsigned(Fixed(4)))
            .with("CT", Unsigned(Fixed(2)))
            .with("GT", Unsigned(Fixed(2)))
            .with("CC", Unsigned(Fixed(1)))
    }
}

/// Minimal big-endian encoding, never empty
pub fn minimal_be_bytes(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes
        .iter()
        .position(|&b| b != 0)
        .unwrap_or(bytes.len() - 1);
    bytes[first..].to_vec()
}

fn check_width(width: u8) -> Result<usize, ValueError> {
    match width as usize {
        w @ 1..=MAX_UNSIGNED_WIDTH => Ok(w),
        _ => Err(ValueError::range(width, "width must be 1 to 8 bytes")),
    }
}

fn check_fits(value: u64, width: u8) -> Result<(), ValueError> {
    check_width(width)?;
    if (width as usize) < MAX_UNSIGNED_WIDTH && value >> (8 * width as u32) != 0 {
        return Err(ValueError::range(
            format!("{:#X}", value),
            format!("must fit in {} byte(s)", width),
        ));
    }
    Ok(())
}

/// Interpret raw register bytes from an API response
pub fn decode_bytes(kind: ValueKind, bytes: &[u8]) -> Result<ParameterValue, ValueError> {
    match kind {
        ValueKind::Unsigned(width) => {
            if bytes.is_empty() {
                return Err(ValueError::parse("", "unsigned integer (no bytes)"));
            }
            let declared = match width {
                Width::Fixed(w) => check_width(w)?,
                Width::Variable => MAX_UNSIGNED_WIDTH,
            };
            if bytes.len() > declared {
                return Err(ValueError::range(
                    hex_lower(bytes),
                    format!("at most {} byte(s)", declared),
                ));
            }
            let value = BigEndian::read_uint(bytes, bytes.len());
            let width = match width {
                Width::Fixed(w) => w,
                Width::Variable => bytes.len() as u8,
            };
            Ok(ParameterValue::UnsignedInteger { width, value })
        }
        ValueKind::Ascii => {
            if !bytes.is_ascii() {
                return Err(ValueError::parse(hex_lower(bytes), "ASCII text"));
            }
            Ok(ParameterValue::AsciiText(
                String::from_utf8_lossy(bytes).into_owned(),
            ))
        }
        ValueKind::Raw => Ok(ParameterValue::RawBytes(bytes.to_vec())),
    }
}

/// Serialize a value for an API write request
pub fn encode_bytes(kind: ValueKind, value: &ParameterValue) -> Result<Vec<u8>, ValueError> {
    match (kind, value) {
        (ValueKind::Unsigned(Width::Fixed(w)), ParameterValue::UnsignedInteger { value, .. }) => {
            check_fits(*value, w)?;
            let mut buf = vec![0u8; w as usize];
            BigEndian::write_uint(&mut buf, *value, w as usize);
            Ok(buf)
        }
        (ValueKind::Unsigned(Width::Variable), ParameterValue::UnsignedInteger { value, .. }) => {
            Ok(minimal_be_bytes(*value))
        }
        (ValueKind::Ascii, ParameterValue::AsciiText(s)) => {
            if !s.is_ascii() {
                return Err(ValueError::parse(s.as_str(), "ASCII text"));
            }
            Ok(s.as_bytes().to_vec())
        }
        (ValueKind::Raw, ParameterValue::RawBytes(b)) => Ok(b.clone()),
        (ValueKind::Raw, other) => other_to_raw(other),
        (kind, other) => Err(ValueError::parse(format!("{:?}", other), format!("{:?}", kind))),
    }
}

/// Bytes of any value for a register without a declared type; an integer
/// must fit the width it claims
fn other_to_raw(value: &ParameterValue) -> Result<Vec<u8>, ValueError> {
    match value {
        ParameterValue::UnsignedInteger { width, value } => {
            check_fits(*value, *width)?;
            Ok(value.to_be_bytes()[MAX_UNSIGNED_WIDTH - *width as usize..].to_vec())
        }
        ParameterValue::AsciiText(s) => Ok(s.as_bytes().to_vec()),
        ParameterValue::RawBytes(b) => Ok(b.clone()),
    }
}

/// Parse hex text into an integer, distinguishing bad text from overflow
pub(crate) fn parse_hex_u64(text: &str) -> Result<u64, ValueError> {
    let digits = text.trim();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(digits);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValueError::parse(text, "hexadecimal number"));
    }
    let significant = digits.trim_start_matches('0');
    if significant.len() > 2 * MAX_UNSIGNED_WIDTH {
        return Err(ValueError::range(text.trim(), "exceeds 64-bit unsigned range"));
    }
    if significant.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(significant, 16).map_err(|_| ValueError::parse(text, "hexadecimal number"))
}

/// Interpret a command-mode response line
///
/// Numeric registers are answered in hexadecimal without leading zeros.
pub fn decode_text(kind: ValueKind, text: &str) -> Result<ParameterValue, ValueError> {
    match kind {
        ValueKind::Unsigned(width) => {
            let value = parse_hex_u64(text)?;
            let width = match width {
                Width::Fixed(w) => {
                    check_fits(value, w)?;
                    w
                }
                Width::Variable => minimal_be_bytes(value).len() as u8,
            };
            Ok(ParameterValue::UnsignedInteger { width, value })
        }
        ValueKind::Ascii => {
            if !text.is_ascii() {
                return Err(ValueError::parse(text, "ASCII text"));
            }
            Ok(ParameterValue::AsciiText(text.to_string()))
        }
        ValueKind::Raw => {
            let digits = text.trim();
            if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ValueError::parse(text, "hexadecimal bytes"));
            }
            let padded = if digits.len() % 2 == 1 {
                format!("0{}", digits)
            } else {
                digits.to_string()
            };
            let bytes = (0..padded.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(&padded[i..i + 2], 16))
                .collect::<Result<Vec<u8>, _>>()
                .map_err(|_| ValueError::parse(text, "hexadecimal bytes"))?;
            Ok(ParameterValue::RawBytes(bytes))
        }
    }
}

/// Render a value as the text appended to an `AT` command
pub fn encode_text(kind: ValueKind, value: &ParameterValue) -> Result<String, ValueError> {
    match (kind, value) {
        (ValueKind::Unsigned(width), ParameterValue::UnsignedInteger { value, .. }) => {
            if let Width::Fixed(w) = width {
                check_fits(*value, w)?;
            }
            Ok(format!("{:X}", value))
        }
        (ValueKind::Ascii, ParameterValue::AsciiText(s)) => {
            if !s.is_ascii() || s.contains('\r') {
                return Err(ValueError::parse(s.as_str(), "single-line ASCII text"));
            }
            Ok(s.clone())
        }
        (ValueKind::Raw, other) => Ok(other_to_raw(other)?
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect()),
        (kind, other) => Err(ValueError::parse(format!("{:?}", other), format!("{:?}", kind))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_two_byte_pan_id() {
        let value = decode_bytes(ValueKind::Unsigned(Width::Variable), &[0x12, 0x34]).unwrap();
        assert_eq!(
            value,
            ParameterValue::UnsignedInteger {
                width: 2,
                value: 0x1234
            }
        );
    }

    #[test]
    fn test_decode_fixed_width_reports_canonical_width() {
        let value = decode_bytes(ValueKind::Unsigned(Width::Fixed(4)), &[0x40, 0xA1]).unwrap();
        assert_eq!(
            value,
            ParameterValue::UnsignedInteger {
                width: 4,
                value: 0x40A1
            }
        );
    }

    #[test]
    fn test_decode_rejects_oversized_and_empty() {
        let kind = ValueKind::Unsigned(Width::Fixed(2));
        assert!(matches!(
            decode_bytes(kind, &[1, 2, 3]),
            Err(ValueError::Range { .. })
        ));
        assert!(matches!(
            decode_bytes(kind, &[]),
            Err(ValueError::Parse { .. })
        ));
    }

    #[test]
    fn test_encode_fixed_pads_to_width() {
        let bytes = encode_bytes(
            ValueKind::Unsigned(Width::Fixed(4)),
            &ParameterValue::unsigned(0xFFFF),
        )
        .unwrap();
        assert_eq!(bytes, vec![0x00, 0x00, 0xFF, 0xFF]);
    }

    #[test]
    fn test_encode_fixed_out_of_range() {
        let result = encode_bytes(
            ValueKind::Unsigned(Width::Fixed(1)),
            &ParameterValue::unsigned(0x100),
        );
        assert!(matches!(result, Err(ValueError::Range { .. })));
    }

    #[test]
    fn test_raw_register_rejects_integer_wider_than_claimed() {
        let value = ParameterValue::UnsignedInteger {
            width: 1,
            value: 0x1234,
        };
        assert!(matches!(
            encode_bytes(ValueKind::Raw, &value),
            Err(ValueError::Range { .. })
        ));
        assert!(matches!(
            encode_text(ValueKind::Raw, &value),
            Err(ValueError::Range { .. })
        ));

        let fits = ParameterValue::UnsignedInteger {
            width: 2,
            value: 0x1234,
        };
        assert_eq!(encode_bytes(ValueKind::Raw, &fits).unwrap(), vec![0x12, 0x34]);
        assert_eq!(encode_text(ValueKind::Raw, &fits).unwrap(), "1234");
    }

    #[test]
    fn test_fixed_width_outside_one_to_eight_rejected() {
        for width in [0u8, 9] {
            let kind = ValueKind::Unsigned(Width::Fixed(width));
            assert!(matches!(
                decode_bytes(kind, &[0x01]),
                Err(ValueError::Range { .. })
            ));
            assert!(matches!(
                decode_text(kind, "1"),
                Err(ValueError::Range { .. })
            ));
            assert!(matches!(
                encode_bytes(kind, &ParameterValue::unsigned(1)),
                Err(ValueError::Range { .. })
            ));
        }
    }

    #[test]
    fn test_encode_variable_is_minimal() {
        let kind = ValueKind::Unsigned(Width::Variable);
        assert_eq!(
            encode_bytes(kind, &ParameterValue::unsigned(0x1234)).unwrap(),
            vec![0x12, 0x34]
        );
        assert_eq!(
            encode_bytes(kind, &ParameterValue::unsigned(0)).unwrap(),
            vec![0x00]
        );
    }

    #[test]
    fn test_kind_mismatch_is_parse_error() {
        let result = encode_bytes(
            ValueKind::Unsigned(Width::Fixed(2)),
            &ParameterValue::AsciiText("node".into()),
        );
        assert!(matches!(result, Err(ValueError::Parse { .. })));
    }

    #[test]
    fn test_decode_text_numeric() {
        let value = decode_text(ValueKind::Unsigned(Width::Variable), "3332").unwrap();
        assert_eq!(
            value,
            ParameterValue::UnsignedInteger {
                width: 2,
                value: 0x3332
            }
        );
    }

    #[test]
    fn test_decode_text_non_hex_for_numeric_is_parse_error() {
        let result = decode_text(ValueKind::Unsigned(Width::Fixed(2)), "ERROR");
        assert!(matches!(result, Err(ValueError::Parse { .. })));
    }

    #[test]
    fn test_decode_text_raw_pads_odd_length() {
        let value = decode_text(ValueKind::Raw, "13A200").unwrap();
        assert_eq!(value, ParameterValue::RawBytes(vec![0x13, 0xA2, 0x00]));
        let value = decode_text(ValueKind::Raw, "A20").unwrap();
        assert_eq!(value, ParameterValue::RawBytes(vec![0x0A, 0x20]));
    }

    #[test]
    fn test_ascii_roundtrip_is_verbatim() {
        let value = decode_bytes(ValueKind::Ascii, b"BASE STATION").unwrap();
        assert_eq!(value.as_text(), Some("BASE STATION"));
        assert_eq!(
            encode_bytes(ValueKind::Ascii, &value).unwrap(),
            b"BASE STATION".to_vec()
        );
        assert!(decode_bytes(ValueKind::Ascii, &[0xC3, 0xA9]).is_err());
    }

    #[test]
    fn test_encode_text_forms() {
        let kind = ValueKind::Unsigned(Width::Fixed(2));
        assert_eq!(
            encode_text(kind, &ParameterValue::unsigned(0x0C)).unwrap(),
            "C"
        );
        assert_eq!(
            encode_text(ValueKind::Raw, &ParameterValue::RawBytes(vec![0x0A, 0xFF])).unwrap(),
            "0AFF"
        );
        assert!(encode_text(ValueKind::Ascii, &ParameterValue::AsciiText("a\rb".into())).is_err());
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(ParameterValue::unsigned(0x0A1B).to_string(), "A1B");
        assert_eq!(
            ParameterValue::RawBytes(vec![0x00, 0x13, 0xA2]).to_string(),
            "0013a2"
        );
        assert_eq!(ParameterValue::AsciiText("ROUTER".into()).to_string(), "ROUTER");
    }

    #[test]
    fn test_parameter_map_lookup() {
        let map = ParameterMap::new().with("ni", ValueKind::Ascii);
        assert_eq!(map.kind("NI"), ValueKind::Ascii);
        assert!(map.contains("Ni"));
        assert_eq!(map.kind("ZZ"), ValueKind::Raw);

        let common = ParameterMap::common();
        assert_eq!(common.kind("ID"), ValueKind::Unsigned(Width::Variable));
        assert_eq!(common.kind("SL"), ValueKind::Unsigned(Width::Fixed(4)));
    }

    #[test]
    fn test_minimal_be_bytes() {
        assert_eq!(minimal_be_bytes(0), vec![0]);
        assert_eq!(minimal_be_bytes(0x1234), vec![0x12, 0x34]);
        assert_eq!(minimal_be_bytes(u64::MAX), vec![0xFF; 8]);
    }
}
