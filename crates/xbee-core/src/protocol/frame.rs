//! API frame encoding/decoding
//!
//! Frame format:
//! - 1 byte: start delimiter `0x7E`
//! - 2 bytes: body length (big-endian)
//! - N bytes: body (`frame type | frame id | command | ...`)
//! - 1 byte: checksum, `0xFF - (sum(body) mod 256)`
//!
//! In escaped mode (`AP=2`) every byte after the delimiter that equals
//! `0x7E`, `0x7D`, `0x11` or `0x13` is sent as `0x7D, byte ^ 0x20`. Length
//! and checksum always describe the unescaped bytes.

use byteorder::{BigEndian, ByteOrder};
use std::fmt;
use std::time::{Duration, Instant};

use super::transport::read_exact_with_deadline;
use super::{ApiMode, ProtocolError, Transport};

/// Start delimiter of every frame
pub const START_DELIMITER: u8 = 0x7E;
/// Escape marker in escaped API mode
pub const ESCAPE: u8 = 0x7D;
const XON: u8 = 0x11;
const XOFF: u8 = 0x13;
const ESCAPE_XOR: u8 = 0x20;

/// Largest body the 16-bit length field can describe
pub const MAX_FRAME_BODY: usize = u16::MAX as usize;

/// Frame type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Local AT command, applied immediately (`0x08`)
    AtCommand,
    /// Local AT command, queued until `AC` (`0x09`)
    AtCommandQueue,
    /// Local AT command response (`0x88`)
    AtCommandResponse,
    /// Unsolicited modem status (`0x8A`)
    ModemStatus,
    /// Any other frame type
    Other(u8),
}

impl FrameType {
    /// Decode a frame type byte
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x08 => FrameType::AtCommand,
            0x09 => FrameType::AtCommandQueue,
            0x88 => FrameType::AtCommandResponse,
            0x8A => FrameType::ModemStatus,
            other => FrameType::Other(other),
        }
    }

    /// Wire value
    pub fn as_byte(self) -> u8 {
        match self {
            FrameType::AtCommand => 0x08,
            FrameType::AtCommandQueue => 0x09,
            FrameType::AtCommandResponse => 0x88,
            FrameType::ModemStatus => 0x8A,
            FrameType::Other(b) => b,
        }
    }
}

/// A decoded API frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type
    pub frame_type: FrameType,
    /// Correlation tag echoed by the device (0 for modem status)
    pub frame_id: u8,
    /// Two-character ASCII mnemonic (zeroed for non-AT frames)
    pub command: [u8; 2],
    /// Status byte, present on responses and modem status frames
    pub status: Option<u8>,
    /// Parameter bytes (request value or returned register contents)
    pub parameter: Vec<u8>,
}

impl Frame {
    /// Build a local AT command request
    pub fn at_command(frame_id: u8, command: [u8; 2], parameter: &[u8]) -> Self {
        Self {
            frame_type: FrameType::AtCommand,
            frame_id,
            command,
            status: None,
            parameter: parameter.to_vec(),
        }
    }

    /// Mnemonic as text
    pub fn command_str(&self) -> String {
        String::from_utf8_lossy(&self.command).into_owned()
    }

    /// Whether this frame answers an AT command
    pub fn is_at_response(&self) -> bool {
        self.frame_type == FrameType::AtCommandResponse
    }

    /// Fail with [`ProtocolError::DeviceStatus`] unless the status is `0x00`
    pub fn check_status(&self) -> Result<(), ProtocolError> {
        match self.status {
            Some(0) | None => Ok(()),
            Some(status) => Err(ProtocolError::DeviceStatus {
                command: self.command_str(),
                status,
            }),
        }
    }

    /// Body bytes (everything covered by the length field)
    pub fn body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(5 + self.parameter.len());
        body.push(self.frame_type.as_byte());
        match self.frame_type {
            FrameType::AtCommand | FrameType::AtCommandQueue => {
                body.push(self.frame_id);
                body.extend_from_slice(&self.command);
            }
            FrameType::AtCommandResponse => {
                body.push(self.frame_id);
                body.extend_from_slice(&self.command);
                body.push(self.status.unwrap_or(0));
            }
            FrameType::ModemStatus => body.push(self.status.unwrap_or(0)),
            FrameType::Other(_) => {}
        }
        body.extend_from_slice(&self.parameter);
        body
    }

    /// Encode the frame to raw bytes
    pub fn to_bytes(&self, mode: ApiMode) -> Result<Vec<u8>, ProtocolError> {
        wrap_body(&self.body(), mode)
    }

    /// Split a verified body into its fields
    fn from_body(body: &[u8]) -> Result<Self, ProtocolError> {
        let (&type_byte, rest) = body
            .split_first()
            .ok_or_else(|| ProtocolError::MalformedFrame("empty body".into()))?;
        let frame_type = FrameType::from_byte(type_byte);

        let too_short = |min: usize| {
            ProtocolError::MalformedFrame(format!(
                "{:?} frame needs at least {} body bytes, got {}",
                frame_type,
                min,
                body.len()
            ))
        };

        match frame_type {
            FrameType::AtCommand | FrameType::AtCommandQueue => {
                if body.len() < 4 {
                    return Err(too_short(4));
                }
                Ok(Self {
                    frame_type,
                    frame_id: body[1],
                    command: [body[2], body[3]],
                    status: None,
                    parameter: body[4..].to_vec(),
                })
            }
            FrameType::AtCommandResponse => {
                if body.len() < 5 {
                    return Err(too_short(5));
                }
                Ok(Self {
                    frame_type,
                    frame_id: body[1],
                    command: [body[2], body[3]],
                    status: Some(body[4]),
                    parameter: body[5..].to_vec(),
                })
            }
            FrameType::ModemStatus => {
                if body.len() < 2 {
                    return Err(too_short(2));
                }
                Ok(Self {
                    frame_type,
                    frame_id: 0,
                    command: [0, 0],
                    status: Some(body[1]),
                    parameter: body[2..].to_vec(),
                })
            }
            FrameType::Other(_) => Ok(Self {
                frame_type,
                frame_id: 0,
                command: [0, 0],
                status: None,
                parameter: rest.to_vec(),
            }),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} id={} cmd={} status={:?} param={:02X?}",
            self.frame_type,
            self.frame_id,
            self.command_str(),
            self.status,
            self.parameter
        )
    }
}

/// Validate a two-character printable ASCII mnemonic (letters upper-cased)
pub fn mnemonic(command: &str) -> Result<[u8; 2], ProtocolError> {
    match command.as_bytes() {
        [a, b] if a.is_ascii_graphic() && b.is_ascii_graphic() => {
            Ok([a.to_ascii_uppercase(), b.to_ascii_uppercase()])
        }
        _ => Err(ProtocolError::InvalidMnemonic(command.to_string())),
    }
}

/// Checksum over a frame body: `0xFF - (sum mod 256)`
pub fn checksum(body: &[u8]) -> u8 {
    0xFF - body.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Encode a local AT command request
///
/// The only failure is a parameter too long for the 16-bit length field.
pub fn encode(
    frame_id: u8,
    command: [u8; 2],
    parameter: Option<&[u8]>,
    mode: ApiMode,
) -> Result<Vec<u8>, ProtocolError> {
    Frame::at_command(frame_id, command, parameter.unwrap_or_default()).to_bytes(mode)
}

fn needs_escape(b: u8) -> bool {
    matches!(b, START_DELIMITER | ESCAPE | XON | XOFF)
}

fn wrap_body(body: &[u8], mode: ApiMode) -> Result<Vec<u8>, ProtocolError> {
    if body.len() > MAX_FRAME_BODY {
        return Err(ProtocolError::FrameTooLarge(body.len()));
    }

    let mut unescaped = Vec::with_capacity(body.len() + 3);
    let mut len_bytes = [0u8; 2];
    BigEndian::write_u16(&mut len_bytes, body.len() as u16);
    unescaped.extend_from_slice(&len_bytes);
    unescaped.extend_from_slice(body);
    unescaped.push(checksum(body));

    let mut bytes = Vec::with_capacity(unescaped.len() + 1);
    bytes.push(START_DELIMITER);
    match mode {
        ApiMode::Unescaped => bytes.extend_from_slice(&unescaped),
        ApiMode::Escaped => {
            for b in unescaped {
                if needs_escape(b) {
                    bytes.push(ESCAPE);
                    bytes.push(b ^ ESCAPE_XOR);
                } else {
                    bytes.push(b);
                }
            }
        }
    }
    Ok(bytes)
}

/// Verify length/checksum of the unescaped bytes following the delimiter
fn parse_unescaped(data: &[u8], raw_len: usize) -> Result<Frame, ProtocolError> {
    if data.len() < 2 {
        return Err(ProtocolError::TruncatedRead {
            expected: 3,
            received: raw_len,
        });
    }
    let length = BigEndian::read_u16(&data[0..2]) as usize;
    let needed = 2 + length + 1;
    if data.len() < needed {
        return Err(ProtocolError::TruncatedRead {
            expected: 1 + needed,
            received: raw_len,
        });
    }
    if data.len() > needed {
        return Err(ProtocolError::MalformedFrame(format!(
            "{} bytes beyond declared length {}",
            data.len() - needed,
            length
        )));
    }

    let body = &data[2..2 + length];
    let received = data[2 + length];
    let expected = checksum(body);
    if received != expected {
        return Err(ProtocolError::Checksum {
            expected,
            actual: received,
        });
    }
    Frame::from_body(body)
}

/// Decode exactly one frame from a byte slice
pub fn decode(bytes: &[u8], mode: ApiMode) -> Result<Frame, ProtocolError> {
    let (&first, rest) = bytes.split_first().ok_or(ProtocolError::TruncatedRead {
        expected: 1,
        received: 0,
    })?;
    if first != START_DELIMITER {
        return Err(ProtocolError::Framing(first));
    }

    match mode {
        ApiMode::Unescaped => parse_unescaped(rest, bytes.len()),
        ApiMode::Escaped => {
            let mut data = Vec::with_capacity(rest.len());
            let mut iter = rest.iter();
            while let Some(&b) = iter.next() {
                if b == ESCAPE {
                    match iter.next() {
                        Some(&next) => data.push(next ^ ESCAPE_XOR),
                        // A dangling escape means the next byte never arrived
                        None => {
                            return Err(ProtocolError::TruncatedRead {
                                expected: bytes.len() + 1,
                                received: bytes.len(),
                            })
                        }
                    }
                } else {
                    data.push(b);
                }
            }
            parse_unescaped(&data, bytes.len())
        }
    }
}

/// Reads logical (unescaped) bytes from a transport while keeping the raw
/// bytes for tracing
struct FrameReader<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    mode: ApiMode,
    deadline: Instant,
    raw: Vec<u8>,
}

impl<T: Transport + ?Sized> FrameReader<'_, T> {
    /// Read `n` logical bytes; returns fewer only if the deadline passed
    fn take(&mut self, n: usize) -> Result<Vec<u8>, ProtocolError> {
        match self.mode {
            ApiMode::Unescaped => {
                let mut buf = vec![0u8; n];
                let got = read_exact_with_deadline(&mut *self.transport, &mut buf, self.deadline)?;
                self.raw.extend_from_slice(&buf[..got]);
                buf.truncate(got);
                Ok(buf)
            }
            ApiMode::Escaped => {
                let mut out = Vec::with_capacity(n);
                let mut byte = [0u8; 1];
                while out.len() < n {
                    if read_exact_with_deadline(&mut *self.transport, &mut byte, self.deadline)? == 0 {
                        break;
                    }
                    self.raw.push(byte[0]);
                    if byte[0] != ESCAPE {
                        out.push(byte[0]);
                        continue;
                    }
                    if read_exact_with_deadline(&mut *self.transport, &mut byte, self.deadline)? == 0 {
                        break;
                    }
                    self.raw.push(byte[0]);
                    out.push(byte[0] ^ ESCAPE_XOR);
                }
                Ok(out)
            }
        }
    }

    fn truncated(&self, expected: usize) -> ProtocolError {
        ProtocolError::TruncatedRead {
            expected,
            received: self.raw.len(),
        }
    }
}

/// Read and validate one frame from a transport within `timeout`
///
/// Returns the frame together with the raw bytes consumed. No retries and
/// no resynchronization: a bad delimiter or checksum fails the whole read.
pub fn read_frame<T: Transport + ?Sized>(
    transport: &mut T,
    mode: ApiMode,
    timeout: Duration,
) -> Result<(Frame, Vec<u8>), ProtocolError> {
    let mut reader = FrameReader {
        transport,
        mode,
        deadline: Instant::now() + timeout,
        raw: Vec::new(),
    };

    let mut first = [0u8; 1];
    if read_exact_with_deadline(&mut *reader.transport, &mut first, reader.deadline)? == 0 {
        return Err(reader.truncated(1));
    }
    reader.raw.push(first[0]);
    if first[0] != START_DELIMITER {
        return Err(ProtocolError::Framing(first[0]));
    }

    let len_bytes = reader.take(2)?;
    if len_bytes.len() < 2 {
        return Err(reader.truncated(3));
    }
    let length = BigEndian::read_u16(&len_bytes) as usize;

    let rest = reader.take(length + 1)?;
    if rest.len() < length + 1 {
        return Err(reader.truncated(3 + length + 1));
    }

    let (body, trailer) = rest.split_at(length);
    let expected = checksum(body);
    if trailer[0] != expected {
        return Err(ProtocolError::Checksum {
            expected,
            actual: trailer[0],
        });
    }
    let frame = Frame::from_body(body)?;
    Ok((frame, reader.raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MockTransport;
    use pretty_assertions::assert_eq;

    fn response(frame_id: u8, command: &[u8; 2], status: u8, parameter: &[u8]) -> Vec<u8> {
        let mut body = vec![0x88, frame_id, command[0], command[1], status];
        body.extend_from_slice(parameter);
        wrap_body(&body, ApiMode::Unescaped).unwrap()
    }

    #[test]
    fn test_encode_id_query() {
        let bytes = encode(0x01, *b"ID", None, ApiMode::Unescaped).unwrap();
        let expected_checksum = 0xFF - ((0x08u32 + 0x01 + 0x49 + 0x44) % 256) as u8;
        assert_eq!(
            bytes,
            vec![0x7E, 0x00, 0x04, 0x08, 0x01, b'I', b'D', expected_checksum]
        );
        assert_eq!(expected_checksum, 0x69);
    }

    #[test]
    fn test_known_node_discover_frame() {
        let bytes = encode(0x01, *b"ND", None, ApiMode::Unescaped).unwrap();
        assert_eq!(bytes, vec![0x7E, 0x00, 0x04, 0x08, 0x01, 0x4E, 0x44, 0x64]);
    }

    #[test]
    fn test_checksum_invariant() {
        let cases: [&[u8]; 4] = [&[], &[0x00], &[0xFF, 0xFF, 0xFF], b"BASE STATION"];
        for parameter in cases {
            let bytes = encode(0x52, *b"NI", Some(parameter), ApiMode::Unescaped).unwrap();
            let body = &bytes[3..bytes.len() - 1];
            let sum = body
                .iter()
                .chain(std::iter::once(&bytes[bytes.len() - 1]))
                .fold(0u8, |acc, &b| acc.wrapping_add(b));
            assert_eq!(sum, 0xFF);
        }
    }

    #[test]
    fn test_request_roundtrip() {
        let bytes = encode(0x07, *b"ID", Some(&[0x12, 0x34]), ApiMode::Unescaped).unwrap();
        let frame = decode(&bytes, ApiMode::Unescaped).unwrap();
        assert_eq!(frame, Frame::at_command(0x07, *b"ID", &[0x12, 0x34]));
    }

    #[test]
    fn test_decode_response_fields() {
        let bytes = response(0x01, b"ID", 0x00, &[0x12, 0x34]);
        let frame = decode(&bytes, ApiMode::Unescaped).unwrap();
        assert_eq!(frame.frame_type, FrameType::AtCommandResponse);
        assert_eq!(frame.frame_id, 0x01);
        assert_eq!(frame.command_str(), "ID");
        assert_eq!(frame.status, Some(0));
        assert_eq!(frame.parameter, vec![0x12, 0x34]);
        assert!(frame.check_status().is_ok());
    }

    #[test]
    fn test_nonzero_status_is_device_error() {
        let bytes = response(0x01, b"ID", 0x01, &[0x12, 0x34]);
        let frame = decode(&bytes, ApiMode::Unescaped).unwrap();
        assert!(matches!(
            frame.check_status(),
            Err(ProtocolError::DeviceStatus { status: 1, .. })
        ));
    }

    #[test]
    fn test_bad_delimiter() {
        let mut bytes = encode(0x01, *b"ID", None, ApiMode::Unescaped).unwrap();
        bytes[0] = 0x7F;
        assert!(matches!(
            decode(&bytes, ApiMode::Unescaped),
            Err(ProtocolError::Framing(0x7F))
        ));
    }

    #[test]
    fn test_every_body_corruption_detected() {
        let bytes = encode(0x01, *b"DL", Some(&[0, 0, 0xFF, 0xFF]), ApiMode::Unescaped).unwrap();
        for i in 3..bytes.len() - 1 {
            for flip in [0x01u8, 0x80, 0xFF] {
                let mut corrupted = bytes.clone();
                corrupted[i] ^= flip;
                assert!(
                    matches!(
                        decode(&corrupted, ApiMode::Unescaped),
                        Err(ProtocolError::Checksum { .. })
                    ),
                    "flip {flip:#x} at {i} not detected"
                );
            }
        }
    }

    #[test]
    fn test_every_truncation_detected() {
        let bytes = response(0x01, b"SH", 0x00, &[0x00, 0x13, 0xA2, 0x00]);
        for k in 0..bytes.len() {
            assert!(
                matches!(
                    decode(&bytes[..k], ApiMode::Unescaped),
                    Err(ProtocolError::TruncatedRead { .. })
                ),
                "prefix of {k} bytes not reported as truncated"
            );
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = response(0x01, b"ID", 0x00, &[]);
        bytes.push(0x00);
        assert!(matches!(
            decode(&bytes, ApiMode::Unescaped),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_response_body_too_short() {
        let bytes = wrap_body(&[0x88, 0x01, b'I', b'D'], ApiMode::Unescaped).unwrap();
        assert!(matches!(
            decode(&bytes, ApiMode::Unescaped),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_escaped_encoding() {
        // 0x11 and 0x7E in the parameter must be escaped
        let bytes = encode(0x01, *b"ID", Some(&[0x11, 0x7E]), ApiMode::Escaped).unwrap();
        assert_eq!(&bytes[..3], &[0x7E, 0x00, 0x06]);
        assert!(bytes[1..].windows(2).any(|w| w == [0x7D, 0x31]));
        assert!(bytes[1..].windows(2).any(|w| w == [0x7D, 0x5E]));
        assert!(!bytes[1..].contains(&0x7E));

        let frame = decode(&bytes, ApiMode::Escaped).unwrap();
        assert_eq!(frame.parameter, vec![0x11, 0x7E]);
    }

    #[test]
    fn test_escaped_truncation_mid_escape() {
        let bytes = encode(0x01, *b"ID", Some(&[0x13]), ApiMode::Escaped).unwrap();
        let pos = bytes.iter().position(|&b| b == ESCAPE).unwrap();
        assert!(matches!(
            decode(&bytes[..=pos], ApiMode::Escaped),
            Err(ProtocolError::TruncatedRead { .. })
        ));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let parameter = vec![0u8; MAX_FRAME_BODY];
        assert!(matches!(
            encode(0x01, *b"NI", Some(&parameter), ApiMode::Unescaped),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_mnemonic_validation() {
        assert_eq!(mnemonic("id").unwrap(), *b"ID");
        assert!(mnemonic("I").is_err());
        assert!(mnemonic("IDX").is_err());
        assert!(mnemonic("I\r").is_err());
    }

    #[test]
    fn test_response_without_status_encodes_success() {
        let frame = Frame {
            frame_type: FrameType::AtCommandResponse,
            frame_id: 0x02,
            command: *b"CH",
            status: None,
            parameter: vec![0x0C],
        };
        let decoded = decode(&frame.to_bytes(ApiMode::Unescaped).unwrap(), ApiMode::Unescaped)
            .unwrap();
        assert_eq!(decoded.status, Some(0x00));
        assert_eq!(decoded.parameter, vec![0x0C]);
    }

    #[test]
    fn test_modem_status_decoded() {
        let bytes = wrap_body(&[0x8A, 0x06], ApiMode::Unescaped).unwrap();
        let frame = decode(&bytes, ApiMode::Unescaped).unwrap();
        assert_eq!(frame.frame_type, FrameType::ModemStatus);
        assert_eq!(frame.status, Some(0x06));
    }

    #[test]
    fn test_read_frame_from_chunked_transport() {
        let bytes = response(0x03, b"VR", 0x00, &[0x10, 0xEF]);
        let mut mock = MockTransport::new();
        mock.push_incoming(&bytes).set_read_chunk(3);

        let (frame, raw) =
            read_frame(&mut mock, ApiMode::Unescaped, Duration::from_millis(100)).unwrap();
        assert_eq!(raw, bytes);
        assert_eq!(frame.parameter, vec![0x10, 0xEF]);
    }

    #[test]
    fn test_read_frame_escaped() {
        let bytes = wrap_body(&[0x88, 0x01, b'I', b'D', 0x00, 0x7D, 0x13], ApiMode::Escaped)
            .unwrap();
        let mut mock = MockTransport::new();
        mock.push_incoming(&bytes).set_read_chunk(1);

        let (frame, raw) =
            read_frame(&mut mock, ApiMode::Escaped, Duration::from_millis(100)).unwrap();
        assert_eq!(raw, bytes);
        assert_eq!(frame.parameter, vec![0x7D, 0x13]);
    }

    #[test]
    fn test_read_frame_truncated_on_timeout() {
        let bytes = response(0x01, b"ID", 0x00, &[0x12, 0x34]);
        for k in 0..bytes.len() {
            let mut mock = MockTransport::new();
            mock.push_incoming(&bytes[..k]);
            let result = read_frame(&mut mock, ApiMode::Unescaped, Duration::from_millis(5));
            assert!(
                matches!(result, Err(ProtocolError::TruncatedRead { .. })),
                "prefix of {k} bytes not reported as truncated"
            );
        }
    }
}
