//! Protocol errors

use thiserror::Error;

use crate::params::ValueError;

/// Errors that can occur during protocol communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Framing error: expected start delimiter 0x7E, got {0:#04x}")]
    Framing(u8),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Truncated read: got {received} of {expected} bytes before timeout")]
    TruncatedRead { expected: usize, received: usize },

    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    Checksum { expected: u8, actual: u8 },

    #[error(
        "Correlation error: expected frame {expected_id} '{expected_command}', got frame {actual_id} '{actual_command}'"
    )]
    Correlation {
        expected_id: u8,
        expected_command: String,
        actual_id: u8,
        actual_command: String,
    },

    #[error("Device returned status {status:#04x} for '{command}' ({})", describe_status(.status))]
    DeviceStatus { command: String, status: u8 },

    #[error("Command mode not entered: {0}")]
    EntryFailed(String),

    #[error("No response to '{0}' within timeout")]
    CommandTimeout(String),

    #[error("'{command}' rejected by device: {response:?}")]
    CommandRejected { command: String, response: String },

    #[error("Not in command mode")]
    NotInCommandMode,

    #[error("Command mnemonic must be two ASCII characters, got '{0}'")]
    InvalidMnemonic(String),

    #[error("Frame body too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error("Serial port error: {0}")]
    Serial(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Human-readable meaning of an AT command response status byte
pub fn status_name(status: u8) -> &'static str {
    match status {
        0 => "OK",
        1 => "ERROR",
        2 => "invalid command",
        3 => "invalid parameter",
        4 => "transmit failure",
        _ => "unknown status",
    }
}

fn describe_status(status: &u8) -> &'static str {
    status_name(*status)
}

impl From<serialport::Error> for ProtocolError {
    fn from(e: serialport::Error) -> Self {
        ProtocolError::Serial(e.to_string())
    }
}
