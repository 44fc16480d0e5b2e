//! API-mode client
//!
//! Sends local AT command frames and waits for the correlated response.
//! Unsolicited frames (modem status and the like) that arrive first are
//! skipped; a response for a different frame id or command is an error.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::frame::{self, mnemonic, read_frame, Frame, FrameType};
use super::observer::{notify, SharedObserver, TraceEvent};
use super::{ApiMode, Observer, ProtocolConfig, ProtocolError, Transport};
use crate::params::{decode_bytes, encode_bytes, ParameterMap, ParameterValue};

/// Write one frame to the transport, returning the bytes sent
pub fn send_raw_frame<T: Transport + ?Sized>(
    transport: &mut T,
    frame: &Frame,
    mode: ApiMode,
) -> Result<Vec<u8>, ProtocolError> {
    let bytes = frame.to_bytes(mode)?;
    transport.write_all(&bytes)?;
    Ok(bytes)
}

/// Read and validate one frame from the transport
pub fn decode_frame<T: Transport + ?Sized>(
    transport: &mut T,
    mode: ApiMode,
    timeout: Duration,
) -> Result<Frame, ProtocolError> {
    read_frame(transport, mode, timeout).map(|(frame, _)| frame)
}

/// Encode a request, send it and read the matching response
///
/// Frame id `0` asks the device not to answer, so it always ends in a
/// [`ProtocolError::TruncatedRead`].
pub fn send_request_receive_response<T: Transport + ?Sized>(
    transport: &mut T,
    frame_id: u8,
    command: &str,
    parameter: Option<&[u8]>,
    mode: ApiMode,
    timeout: Duration,
) -> Result<Frame, ProtocolError> {
    exchange(transport, frame_id, command, parameter, mode, timeout, &None)
}

fn exchange<T: Transport + ?Sized>(
    transport: &mut T,
    frame_id: u8,
    command: &str,
    parameter: Option<&[u8]>,
    mode: ApiMode,
    timeout: Duration,
    observer: &Option<SharedObserver>,
) -> Result<Frame, ProtocolError> {
    let command = mnemonic(command)?;
    let bytes = frame::encode(frame_id, command, parameter, mode)?;

    // Stale bytes from an earlier exchange would be read as our response
    transport.flush_input()?;

    debug!(
        "send frame {} AT{}: {:02x?}",
        frame_id,
        String::from_utf8_lossy(&command),
        bytes
    );
    transport.write_all(&bytes)?;
    notify(observer, TraceEvent::FrameSent(bytes));

    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ProtocolError::TruncatedRead {
                expected: 1,
                received: 0,
            });
        }

        let (response, raw) = read_frame(transport, mode, remaining)?;
        trace!("received frame: {}", response);
        notify(observer, TraceEvent::FrameReceived(raw));

        if response.frame_type != FrameType::AtCommandResponse {
            debug!(
                "skipping {:?} frame while waiting for frame {}",
                response.frame_type, frame_id
            );
            notify(
                observer,
                TraceEvent::FrameSkipped {
                    frame_type: response.frame_type.as_byte(),
                },
            );
            continue;
        }

        if response.frame_id != frame_id || response.command != command {
            return Err(ProtocolError::Correlation {
                expected_id: frame_id,
                expected_command: String::from_utf8_lossy(&command).into_owned(),
                actual_id: response.frame_id,
                actual_command: response.command_str(),
            });
        }
        return Ok(response);
    }
}

/// API-mode connection to a radio
///
/// Owns its transport for its whole lifetime. Not safe for concurrent use.
pub struct ApiClient<T: Transport> {
    transport: T,
    config: ProtocolConfig,
    parameters: ParameterMap,
    observer: Option<SharedObserver>,
    next_frame_id: u8,
}

impl<T: Transport> ApiClient<T> {
    /// Create a client; all parameters decode as raw bytes until a
    /// [`ParameterMap`] is supplied
    pub fn new(transport: T, config: ProtocolConfig) -> Self {
        Self {
            transport,
            config,
            parameters: ParameterMap::new(),
            observer: None,
            next_frame_id: 1,
        }
    }

    /// Use `parameters` to interpret register values
    pub fn with_parameters(mut self, parameters: ParameterMap) -> Self {
        self.parameters = parameters;
        self
    }

    /// Attach a trace observer
    pub fn with_observer(mut self, observer: impl Observer + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Active configuration
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Parameter map in use
    pub fn parameters(&self) -> &ParameterMap {
        &self.parameters
    }

    /// Borrow the transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give back the transport
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Next frame id, cycling through 1..=255 (0 suppresses responses)
    fn allocate_frame_id(&mut self) -> u8 {
        let id = self.next_frame_id;
        self.next_frame_id = if id == u8::MAX { 1 } else { id + 1 };
        id
    }

    /// Send a request with an explicit frame id and return the response
    /// without checking its status
    pub fn send_request_receive_response(
        &mut self,
        frame_id: u8,
        command: &str,
        parameter: Option<&[u8]>,
    ) -> Result<Frame, ProtocolError> {
        exchange(
            &mut self.transport,
            frame_id,
            command,
            parameter,
            self.config.api_mode,
            self.config.read_timeout(),
            &self.observer,
        )
    }

    /// Run an AT command and require a success status
    pub fn execute(
        &mut self,
        command: &str,
        parameter: Option<&[u8]>,
    ) -> Result<Frame, ProtocolError> {
        let frame_id = self.allocate_frame_id();
        let response = self.send_request_receive_response(frame_id, command, parameter)?;
        response.check_status()?;
        Ok(response)
    }

    /// Read a register and interpret it with the parameter map
    pub fn read_parameter(&mut self, command: &str) -> Result<ParameterValue, ProtocolError> {
        let response = self.execute(command, None)?;
        let kind = self.parameters.kind(command);
        let value = decode_bytes(kind, &response.parameter)?;
        debug!("AT{} = {}", command, value);
        Ok(value)
    }

    /// Write a register, serialized according to the parameter map
    pub fn write_parameter(
        &mut self,
        command: &str,
        value: &ParameterValue,
    ) -> Result<(), ProtocolError> {
        let kind = self.parameters.kind(command);
        let bytes = encode_bytes(kind, value)?;
        self.execute(command, Some(&bytes))?;
        debug!("AT{} set to {}", command, value);
        Ok(())
    }

    /// Apply queued changes (`AC`)
    pub fn apply_changes(&mut self) -> Result<(), ProtocolError> {
        self.execute("AC", None).map(|_| ())
    }

    /// Persist settings to non-volatile memory (`WR`)
    pub fn write_to_flash(&mut self) -> Result<(), ProtocolError> {
        self.execute("WR", None).map(|_| ())
    }

    /// Restore factory defaults (`RE`)
    pub fn restore_defaults(&mut self) -> Result<(), ProtocolError> {
        self.execute("RE", None).map(|_| ())
    }
}
