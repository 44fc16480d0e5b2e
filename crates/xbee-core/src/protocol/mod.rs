//! Radio Protocol Communication
//!
//! Implements the two ways of talking to an XBee module over a serial link:
//! binary API frames with an 8-bit checksum, and the textual command mode
//! entered through the guarded `+++` escape sequence.

pub mod api;
pub mod command_mode;
mod config;
mod error;
pub mod frame;
pub mod observer;
pub mod serial;
pub mod transport;

pub use api::{decode_frame, send_raw_frame, send_request_receive_response, ApiClient};
pub use command_mode::{CommandModeSession, SessionState};
pub use config::{ApiMode, ProtocolConfig};
pub use error::ProtocolError;
pub use frame::{Frame, FrameType};
pub use observer::{Observer, TraceEvent};
pub use serial::{configure_port, open_port, SerialTransport};
pub use transport::{MockTransport, Transport};

/// Default baud rate (factory setting of the radio)
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default timeout for responses in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Default guard time in milliseconds (device `GT` factory value is 1 second)
pub const DEFAULT_GUARD_TIME_MS: u64 = 1000;
