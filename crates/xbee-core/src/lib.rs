//! # xbee-core
//!
//! Protocol layer for reading and writing XBee radio configuration over a
//! byte-stream transport (normally a serial port).

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - The binary API frame codec (length-prefixed, checksummed AT frames)
//! - A command-mode session (`+++` escape, `AT` text commands, `ATCN` exit)
//! - Conversion of raw parameter bytes and text into typed values
//!
//! None of the session or client types are safe for concurrent use from
//! multiple threads without external serialization: each one exclusively
//! drives its transport for the duration of an exchange.
//!
//! ## Example
//!
//! ```rust,ignore
//! use xbee_core::params::ParameterMap;
//! use xbee_core::protocol::{open_port, ApiClient, ProtocolConfig, SerialTransport};
//!
//! let config = ProtocolConfig::default();
//! let port = open_port("/dev/ttyUSB0", Some(config.baud_rate))?;
//! let mut client = ApiClient::new(SerialTransport::new(port), config)
//!     .with_parameters(ParameterMap::common());
//!
//! let pan_id = client.read_parameter("ID")?;
//! println!("PAN ID: {}", pan_id);
//! ```

pub mod params;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::params::{ParameterMap, ParameterValue, ValueError, ValueKind, Width};
    pub use crate::protocol::{
        ApiClient, CommandModeSession, Frame, ProtocolConfig, ProtocolError, SessionState,
        Transport,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
