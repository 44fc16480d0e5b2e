//! Trace observer
//!
//! Protocol code never prints. Besides `tracing` output, callers can attach
//! an [`Observer`] to receive structured events for every exchange.

use std::sync::Arc;

use super::command_mode::SessionState;

/// A structured event emitted by the API client or a command-mode session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// Raw bytes of an API frame written to the transport
    FrameSent(Vec<u8>),
    /// Raw bytes of an API frame read from the transport
    FrameReceived(Vec<u8>),
    /// A frame that arrived while waiting for a different response
    FrameSkipped {
        /// Frame type byte of the skipped frame
        frame_type: u8,
    },
    /// Command-mode session state change
    StateChanged {
        /// Previous state
        from: SessionState,
        /// New state
        to: SessionState,
    },
    /// Text written in command mode (without the terminator)
    LineSent(String),
    /// Text line received in command mode (without the terminator)
    LineReceived(String),
    /// Leaving command mode failed; the session is considered idle anyway
    ExitFailed(String),
}

/// Receiver of [`TraceEvent`]s
pub trait Observer: Send + Sync {
    /// Called synchronously for each event
    fn on_event(&self, event: &TraceEvent);
}

impl<F> Observer for F
where
    F: Fn(&TraceEvent) + Send + Sync,
{
    fn on_event(&self, event: &TraceEvent) {
        self(event)
    }
}

/// Shared observer handle
pub type SharedObserver = Arc<dyn Observer>;

pub(crate) fn notify(observer: &Option<SharedObserver>, event: TraceEvent) {
    if let Some(observer) = observer {
        observer.on_event(&event);
    }
}
