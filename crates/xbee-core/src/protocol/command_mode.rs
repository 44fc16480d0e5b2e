//! Command-mode session
//!
//! Drives the textual AT interface:
//!
//! ```text
//! Idle -> EnteringGuardSilence -> SendingEscape -> AwaitingEntryAck -> InCommandMode
//!                                                                         |  ^
//!                                                            AwaitingCommandEcho
//!                                                                         |
//!                                                              Exiting -> Idle
//! ```
//!
//! The escape sequence is only written after a full guard time of silence,
//! and the session counts as entered only once the device answers `OK`.
//! Once entered, `ATCN` is always sent exactly once before the session goes
//! back to idle, whether the commands in between succeeded or not.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

use super::frame::mnemonic;
use super::observer::{notify, SharedObserver, TraceEvent};
use super::transport::{read_line_with_deadline, LineRead};
use super::{Observer, ProtocolConfig, ProtocolError, Transport};
use crate::params::{decode_text, encode_text, ParameterMap, ParameterValue, ValueError};

/// Line terminator for commands and responses
pub const LINE_TERMINATOR: u8 = b'\r';

/// Entry acknowledgment and generic success reply
pub const ACK: &str = "OK";

/// Command that leaves command mode
pub const EXIT_COMMAND: &str = "ATCN";

/// Command-mode session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Not in command mode
    Idle,
    /// Waiting out the guard time before the escape sequence
    EnteringGuardSilence,
    /// Writing the escape sequence
    SendingEscape,
    /// Waiting for `OK` after the escape sequence
    AwaitingEntryAck,
    /// Ready for commands
    InCommandMode,
    /// Command written, waiting for its response line
    AwaitingCommandEcho,
    /// Writing `ATCN` and draining its reply
    Exiting,
}

fn wait_until(deadline: Instant) {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if !remaining.is_zero() {
        std::thread::sleep(remaining);
    }
}

/// One excursion into command mode
///
/// Borrows the transport exclusively for its lifetime. Dropping a session
/// that is still in command mode sends the exit command.
pub struct CommandModeSession<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    config: ProtocolConfig,
    parameters: ParameterMap,
    observer: Option<SharedObserver>,
    state: SessionState,
}

impl<'a, T: Transport + ?Sized> CommandModeSession<'a, T> {
    /// Create an idle session; all parameters decode as raw bytes until a
    /// [`ParameterMap`] is supplied
    pub fn new(transport: &'a mut T, config: ProtocolConfig) -> Self {
        Self {
            transport,
            config,
            parameters: ParameterMap::new(),
            observer: None,
            state: SessionState::Idle,
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

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether commands can be issued
    pub fn is_in_command_mode(&self) -> bool {
        self.state == SessionState::InCommandMode
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        trace!("command mode: {:?} -> {:?}", from, to);
        notify(&self.observer, TraceEvent::StateChanged { from, to });
    }

    /// Enter command mode: guard silence, escape sequence, wait for `OK`
    pub fn enter(&mut self) -> Result<(), ProtocolError> {
        match self.state {
            SessionState::InCommandMode => return Ok(()),
            SessionState::Idle => {}
            other => {
                return Err(ProtocolError::EntryFailed(format!(
                    "cannot enter from state {:?}",
                    other
                )))
            }
        }
        self.config.validate()?;
        let escape = self.config.escape_sequence()?;

        self.transition(SessionState::EnteringGuardSilence);
        if let Err(e) = self
            .transport
            .flush_input()
            .and_then(|_| self.transport.flush_output())
        {
            self.transition(SessionState::Idle);
            return Err(e.into());
        }
        // Nothing is written by this session until the guard time has passed
        wait_until(Instant::now() + self.config.guard_time());

        self.transition(SessionState::SendingEscape);
        if let Err(e) = self.transport.write_all(&escape) {
            warn!("failed to send escape sequence: {}", e);
            self.transition(SessionState::Idle);
            return Err(e.into());
        }
        let escape_sent = Instant::now();
        debug!("escape sequence sent, waiting for {}", ACK);

        // The device answers only after another guard time of silence
        self.transition(SessionState::AwaitingEntryAck);
        let deadline = escape_sent + self.config.guard_time() + self.config.command_timeout();
        loop {
            let line = match read_line_with_deadline(&mut *self.transport, LINE_TERMINATOR, deadline) {
                Ok(line) => line,
                Err(e) => {
                    self.transition(SessionState::Idle);
                    return Err(e.into());
                }
            };
            match line {
                LineRead::Complete(bytes) => {
                    let text = String::from_utf8_lossy(&bytes).trim().to_string();
                    if text.is_empty() {
                        continue;
                    }
                    notify(&self.observer, TraceEvent::LineReceived(text.clone()));
                    if text == ACK {
                        self.transition(SessionState::InCommandMode);
                        debug!("entered command mode");
                        return Ok(());
                    }
                    self.transition(SessionState::Idle);
                    return Err(ProtocolError::EntryFailed(format!(
                        "unexpected reply {:?} to escape sequence",
                        text
                    )));
                }
                LineRead::TimedOut(partial) => {
                    self.transition(SessionState::Idle);
                    return Err(ProtocolError::EntryFailed(format!(
                        "no {} within {:?} (received {:?})",
                        ACK,
                        self.config.guard_time() + self.config.command_timeout(),
                        String::from_utf8_lossy(&partial)
                    )));
                }
            }
        }
    }

    /// Send `AT<mnemonic>[parameter]` and return the response line
    pub fn command(
        &mut self,
        command: &str,
        parameter: Option<&str>,
    ) -> Result<String, ProtocolError> {
        if self.state != SessionState::InCommandMode {
            return Err(ProtocolError::NotInCommandMode);
        }
        let command = mnemonic(command)?;
        let mut text = format!("AT{}", String::from_utf8_lossy(&command));
        if let Some(parameter) = parameter {
            if parameter.bytes().any(|b| b == LINE_TERMINATOR || b == b'\n') {
                return Err(ValueError::Parse {
                    input: parameter.to_string(),
                    expected: "single-line parameter".to_string(),
                }
                .into());
            }
            text.push_str(parameter);
        }
        self.exchange_line(&text)
    }

    fn exchange_line(&mut self, text: &str) -> Result<String, ProtocolError> {
        self.transition(SessionState::AwaitingCommandEcho);

        let mut line = Vec::with_capacity(text.len() + 1);
        line.extend_from_slice(text.as_bytes());
        line.push(LINE_TERMINATOR);
        if let Err(e) = self.transport.write_all(&line) {
            self.transition(SessionState::InCommandMode);
            return Err(e.into());
        }
        debug!("sent {}", text);
        notify(&self.observer, TraceEvent::LineSent(text.to_string()));

        let deadline = Instant::now() + self.config.command_timeout();
        let result = loop {
            match read_line_with_deadline(&mut *self.transport, LINE_TERMINATOR, deadline) {
                Ok(LineRead::Complete(bytes)) => {
                    // Only the terminators are stripped; text registers keep
                    // their surrounding spaces
                    let reply = String::from_utf8_lossy(&bytes).into_owned();
                    if reply.is_empty() {
                        continue;
                    }
                    debug!("{} -> {}", text, reply);
                    notify(&self.observer, TraceEvent::LineReceived(reply.clone()));
                    break Ok(reply);
                }
                Ok(LineRead::TimedOut(partial)) => {
                    debug!(
                        "{}: no response line (partial {:?})",
                        text,
                        String::from_utf8_lossy(&partial)
                    );
                    break Err(ProtocolError::CommandTimeout(text.to_string()));
                }
                Err(e) => break Err(e.into()),
            }
        };

        self.transition(SessionState::InCommandMode);
        result
    }

    /// Read a register and interpret the hex reply with the parameter map
    pub fn read_parameter(&mut self, command: &str) -> Result<ParameterValue, ProtocolError> {
        let reply = self.command(command, None)?;
        let kind = self.parameters.kind(command);
        Ok(decode_text(kind, &reply)?)
    }

    /// Write a register; any non-empty reply counts as success
    pub fn write_parameter(
        &mut self,
        command: &str,
        value: &ParameterValue,
    ) -> Result<(), ProtocolError> {
        let kind = self.parameters.kind(command);
        let text = encode_text(kind, value)?;
        self.command(command, Some(&text))?;
        Ok(())
    }

    fn command_expecting_ok(&mut self, command: &str) -> Result<(), ProtocolError> {
        let reply = self.command(command, None)?;
        if reply.trim() != ACK {
            return Err(ProtocolError::CommandRejected {
                command: format!("AT{}", command),
                response: reply,
            });
        }
        Ok(())
    }

    /// Restore factory defaults (`ATRE`)
    pub fn restore_defaults(&mut self) -> Result<(), ProtocolError> {
        self.command_expecting_ok("RE")
    }

    /// Persist settings to non-volatile memory (`ATWR`)
    pub fn write_to_flash(&mut self) -> Result<(), ProtocolError> {
        self.command_expecting_ok("WR")
    }

    /// Apply pending changes (`ATAC`)
    pub fn apply_changes(&mut self) -> Result<(), ProtocolError> {
        self.command_expecting_ok("AC")
    }

    /// Leave command mode
    ///
    /// Sends `ATCN` once if the session is in command mode, drains the reply
    /// without validating it, and ends idle even if the write failed.
    pub fn exit(&mut self) -> Result<(), ProtocolError> {
        match self.state {
            SessionState::InCommandMode | SessionState::AwaitingCommandEcho => {}
            _ => {
                self.transition(SessionState::Idle);
                return Ok(());
            }
        }

        self.transition(SessionState::Exiting);
        let mut line = EXIT_COMMAND.as_bytes().to_vec();
        line.push(LINE_TERMINATOR);
        let written = self.transport.write_all(&line);

        let result = match written {
            Ok(()) => {
                notify(&self.observer, TraceEvent::LineSent(EXIT_COMMAND.to_string()));
                let deadline = Instant::now() + self.config.command_timeout();
                // Reply content is irrelevant; wait for it so it does not leak
                // into whatever uses the transport next
                let drained = read_line_with_deadline(&mut *self.transport, LINE_TERMINATOR, deadline)
                    .and_then(|_| self.transport.flush_input());
                if let Err(e) = drained {
                    debug!("draining after {} failed: {}", EXIT_COMMAND, e);
                }
                debug!("left command mode");
                Ok(())
            }
            Err(e) => {
                warn!("failed to send {}: {}", EXIT_COMMAND, e);
                notify(&self.observer, TraceEvent::ExitFailed(e.to_string()));
                Err(e.into())
            }
        };

        self.transition(SessionState::Idle);
        result
    }

    /// Enter, run `work`, and always exit
    ///
    /// An error from `work` is returned in preference to an exit error; the
    /// exit error is still logged and reported to the observer.
    pub fn run<R>(
        mut self,
        work: impl FnOnce(&mut Self) -> Result<R, ProtocolError>,
    ) -> Result<R, ProtocolError> {
        self.enter()?;
        let result = work(&mut self);
        let exited = self.exit();
        match (result, exited) {
            (Err(e), Err(exit_error)) => {
                warn!("{} failed after earlier error {}: {}", EXIT_COMMAND, e, exit_error);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(_), Err(exit_error)) => Err(exit_error),
            (Ok(value), Ok(())) => Ok(value),
        }
    }
}

impl<T: Transport + ?Sized> Drop for CommandModeSession<'_, T> {
    fn drop(&mut self) {
        if matches!(
            self.state,
            SessionState::InCommandMode | SessionState::AwaitingCommandEcho
        ) {
            debug!("session dropped in command mode, exiting");
            let _ = self.exit();
        }
    }
}

impl<T: Transport + ?Sized> std::fmt::Debug for CommandModeSession<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandModeSession")
            .field("state", &self.state)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
