//! Serial port handling
//!
//! Provides the serial-port [`Transport`] used to talk to a radio. Which port
//! to open is decided by the caller.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

use super::{ProtocolError, Transport, DEFAULT_BAUD_RATE};

/// Open a serial port with default settings
pub fn open_port(name: &str, baud_rate: Option<u32>) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);

    let mut port = serialport::new(name, baud)
        .timeout(Duration::from_millis(100))
        .open()?;
    configure_port(port.as_mut())?;
    Ok(port)
}

/// Configure a serial port for the radio (8N1, no flow control)
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.set_data_bits(serialport::DataBits::Eight)?;
    port.set_parity(serialport::Parity::None)?;
    port.set_stop_bits(serialport::StopBits::One)?;
    port.set_flow_control(serialport::FlowControl::None)?;
    Ok(())
}

/// Serial port wrapper implementing [`Transport`]
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    /// Timeout currently programmed into the port, to avoid redundant ioctls
    current_timeout: Option<Duration>,
}

impl SerialTransport {
    /// Wrap an already opened port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self {
            port,
            current_timeout: None,
        }
    }

    /// Open and configure `name`
    pub fn open(name: &str, baud_rate: u32) -> Result<Self, ProtocolError> {
        Ok(Self::new(open_port(name, Some(baud_rate))?))
    }

    /// Name of the underlying port, if known
    pub fn name(&self) -> Option<String> {
        self.port.name()
    }

    /// Give back the wrapped port
    pub fn into_inner(self) -> Box<dyn SerialPort> {
        self.port
    }
}

fn to_io(e: serialport::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

impl Transport for SerialTransport {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = self.port.write(data)?;
        self.port.flush()?;
        Ok(n)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        // A zero timeout would turn into a non-blocking poll on some platforms
        let timeout = timeout.max(Duration::from_millis(1));
        if self.current_timeout != Some(timeout) {
            self.port.set_timeout(timeout).map_err(to_io)?;
            self.current_timeout = Some(timeout);
        }
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(ref e)
                if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock =>
            {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn flush_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(to_io)
    }

    fn flush_output(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Output)
            .map_err(to_io)
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(to_io)
    }
}
