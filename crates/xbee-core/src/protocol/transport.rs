//! Byte transport abstraction
//!
//! Both protocols run over a [`Transport`]: a blocking duplex byte channel
//! whose reads are bounded by a caller-supplied timeout. A timed-out read
//! is a normal outcome and returns zero bytes.

use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

/// Abstraction for the link to the radio (serial port or test double)
///
/// Implementations are driven by exactly one client or session at a time and
/// are not safe for concurrent use without external serialization.
pub trait Transport: Send {
    /// Write bytes, returning how many were accepted
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Read up to `buf.len()` bytes, waiting at most `timeout`
    ///
    /// Returns `Ok(0)` when nothing arrived before the timeout.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Discard any received but unread bytes
    fn flush_input(&mut self) -> io::Result<()>;

    /// Discard any written but untransmitted bytes
    fn flush_output(&mut self) -> io::Result<()>;

    /// Number of bytes that can be read without waiting
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Write the whole buffer
    fn write_all(&mut self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            match self.write(data)? {
                0 => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "transport accepted no bytes",
                    ))
                }
                n => data = &data[n..],
            }
        }
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        (**self).read(buf, timeout)
    }

    fn flush_input(&mut self) -> io::Result<()> {
        (**self).flush_input()
    }

    fn flush_output(&mut self) -> io::Result<()> {
        (**self).flush_output()
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        (**self).bytes_available()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        (**self).read(buf, timeout)
    }

    fn flush_input(&mut self) -> io::Result<()> {
        (**self).flush_input()
    }

    fn flush_output(&mut self) -> io::Result<()> {
        (**self).flush_output()
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        (**self).bytes_available()
    }
}

/// Fill `buf` from the transport until it is full or `deadline` passes
///
/// Returns the number of bytes actually read.
pub fn read_exact_with_deadline<T: Transport + ?Sized>(
    transport: &mut T,
    buf: &mut [u8],
    deadline: Instant,
) -> io::Result<usize> {
    let mut offset = 0;
    while offset < buf.len() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        offset += transport.read(&mut buf[offset..], deadline - now)?;
    }
    Ok(offset)
}

/// Outcome of reading one terminated text line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead {
    /// A full line, terminator stripped
    Complete(Vec<u8>),
    /// The deadline passed; whatever arrived is kept
    TimedOut(Vec<u8>),
}

/// Read bytes until `terminator`, ignoring line feeds, or until `deadline`
pub fn read_line_with_deadline<T: Transport + ?Sized>(
    transport: &mut T,
    terminator: u8,
    deadline: Instant,
) -> io::Result<LineRead> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Ok(LineRead::TimedOut(line));
        }
        if transport.read(&mut byte, deadline - now)? == 0 {
            continue;
        }
        match byte[0] {
            b if b == terminator => return Ok(LineRead::Complete(line)),
            b'\n' => {}
            b => line.push(b),
        }
    }
}

/// Scripted transport for tests and offline callers
///
/// Replies queued with [`MockTransport::queue_reply`] are released one per
/// successful write, in order, and become readable after that write. Bytes
/// pushed with [`MockTransport::push_incoming`] are readable immediately.
#[derive(Debug, Default)]
pub struct MockTransport {
    replies: VecDeque<Vec<u8>>,
    incoming: VecDeque<u8>,
    written: Vec<Vec<u8>>,
    write_instants: Vec<Instant>,
    fail_pattern: Option<Vec<u8>>,
    read_chunk: Option<usize>,
    input_flushes: usize,
}

impl MockTransport {
    /// Create an empty mock transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes to become readable after the next write
    pub fn queue_reply(&mut self, reply: impl AsRef<[u8]>) -> &mut Self {
        self.replies.push_back(reply.as_ref().to_vec());
        self
    }

    /// Queue a write that produces no reply
    pub fn queue_silence(&mut self) -> &mut Self {
        self.replies.push_back(Vec::new());
        self
    }

    /// Make bytes readable right away
    pub fn push_incoming(&mut self, data: impl AsRef<[u8]>) -> &mut Self {
        self.incoming.extend(data.as_ref());
        self
    }

    /// Fail every write whose data contains `pattern`
    pub fn fail_writes_containing(&mut self, pattern: impl AsRef<[u8]>) -> &mut Self {
        self.fail_pattern = Some(pattern.as_ref().to_vec());
        self
    }

    /// Limit each read to at most `chunk` bytes
    pub fn set_read_chunk(&mut self, chunk: usize) -> &mut Self {
        self.read_chunk = Some(chunk.max(1));
        self
    }

    /// Every successful write, in order
    pub fn written(&self) -> &[Vec<u8>] {
        &self.written
    }

    /// When each successful write happened
    pub fn write_instants(&self) -> &[Instant] {
        &self.write_instants
    }

    /// Number of successful writes equal to `data`
    pub fn count_writes(&self, data: &[u8]) -> usize {
        self.written.iter().filter(|w| w.as_slice() == data).count()
    }

    /// How many times the input buffer was flushed
    pub fn input_flushes(&self) -> usize {
        self.input_flushes
    }

    /// Bytes still waiting to be read
    pub fn pending_incoming(&self) -> usize {
        self.incoming.len()
    }
}

impl Transport for MockTransport {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if let Some(pattern) = &self.fail_pattern {
            if !pattern.is_empty() && data.windows(pattern.len()).any(|w| w == pattern.as_slice())
            {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "mock write failure",
                ));
            }
        }
        self.written.push(data.to_vec());
        self.write_instants.push(Instant::now());
        if let Some(reply) = self.replies.pop_front() {
            self.incoming.extend(reply);
        }
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if self.incoming.is_empty() {
            // Behave like a port whose read timed out, without stalling tests
            std::thread::sleep(timeout.min(Duration::from_millis(1)));
            return Ok(0);
        }
        let limit = self.read_chunk.unwrap_or(usize::MAX).min(buf.len());
        let mut n = 0;
        while n < limit {
            match self.incoming.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn flush_input(&mut self) -> io::Result<()> {
        self.incoming.clear();
        self.input_flushes += 1;
        Ok(())
    }

    fn flush_output(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.incoming.len())
    }
}
