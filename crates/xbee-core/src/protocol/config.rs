//! Protocol configuration
//!
//! Timeouts, guard time and framing options are passed explicitly into the
//! API client and command-mode session constructors.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::{ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_GUARD_TIME_MS, DEFAULT_TIMEOUT_MS};

/// API frame escaping, matching the device `AP` setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiMode {
    /// `AP=1`: frames are sent as-is
    #[default]
    Unescaped,
    /// `AP=2`: reserved bytes are escaped with `0x7D`
    Escaped,
}

/// Protocol configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Baud rate used when opening the serial port
    pub baud_rate: u32,
    /// Upper bound for reading one API response frame
    pub read_timeout_ms: u64,
    /// Silence required before and after the escape sequence
    pub guard_time_ms: u64,
    /// Upper bound for a command-mode response line
    pub command_timeout_ms: u64,
    /// Command sequence character (device `CC` setting)
    pub escape_char: char,
    /// API frame escaping
    pub api_mode: ApiMode,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_TIMEOUT_MS,
            guard_time_ms: DEFAULT_GUARD_TIME_MS,
            command_timeout_ms: DEFAULT_TIMEOUT_MS,
            escape_char: '+',
            api_mode: ApiMode::Unescaped,
        }
    }
}

impl ProtocolConfig {
    /// Parse a configuration from JSON; missing fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ProtocolError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Reject settings the protocol cannot work with
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.baud_rate == 0 {
            return Err(ProtocolError::Config("baud_rate must be non-zero".into()));
        }
        self.escape_sequence()?;
        Ok(())
    }

    /// Guard time as a duration
    pub fn guard_time(&self) -> Duration {
        Duration::from_millis(self.guard_time_ms)
    }

    /// Command-mode response timeout as a duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// API frame read timeout as a duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// The three-character escape sequence
    ///
    /// The escape character must be printable ASCII; anything else (including
    /// the line terminators) is a [`ProtocolError::Config`].
    pub fn escape_sequence(&self) -> Result<[u8; 3], ProtocolError> {
        match u8::try_from(self.escape_char) {
            Ok(c) if c.is_ascii_graphic() => Ok([c, c, c]),
            _ => Err(ProtocolError::Config(format!(
                "escape_char must be printable ASCII, got {:?}",
                self.escape_char
            ))),
        }
    }
}
