//! Events for the `flasher` upload state machine.
//!
//! This modules is private and restricted to the [`upload`](crate::upload)
//! scope. The public interface of the state machine is provided by
//! [`upload`](crate::upload).
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.

use crate::{error::Error, properties::PropertyTree};

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// The upload settings of the board merged with the defaults of its upload
/// tool. Travels along with the events from the moment it is resolved until
/// the command line is synthesized.
#[derive(Debug, Clone)]
pub(crate) struct UploadConfig {
    /// Name of the upload tool, `tools.<tool>` in `platform.txt`.
    pub tool: String,
    /// The board subtree alone.
    pub board: PropertyTree,
    /// Board settings over tool settings.
    pub properties: PropertyTree,
}

/// What a successful upload ran, and where.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Uploaded {
    /// The command line handed to the upload tool.
    pub command_line: String,
    /// The serial port the upload went to, after any touch and reacquisition.
    pub port: String,
}

// ResolvePortEvent ============================================================

/// Event fired once the configuration is resolved, triggering the transition
/// to the `PortResolution` state.
#[derive(Debug)]
pub(crate) struct ResolvePortEvent {
    pub config: UploadConfig,
}

// TouchEvent ==================================================================

/// Event fired when a port was given and the board wants the 1200bps touch to
/// enter its bootloader. Triggers the transition to the `Touching` state.
#[derive(Debug)]
pub(crate) struct TouchEvent {
    pub config: UploadConfig,
    pub port: String,
}

// ReacquireEvent ==============================================================

/// Event fired after the touch, triggering the transition to the
/// `Reacquiring` state where we look for the port the bootloader shows up on.
#[derive(Debug)]
pub(crate) struct ReacquireEvent {
    pub config: UploadConfig,
    pub port: String,
}

// SynthesizeEvent =============================================================

/// Event fired when the port to upload to is known. Triggers the transition
/// to the `CommandSynthesis` state.
#[derive(Debug)]
pub(crate) struct SynthesizeEvent {
    pub config: UploadConfig,
    pub port: String,
}

// ExecuteEvent ================================================================

/// Event fired with the final command line, triggering the transition to the
/// `Executing` state.
#[derive(Debug)]
pub(crate) struct ExecuteEvent {
    pub command_line: String,
    pub port: String,
}

// DoneEvent ===================================================================

/// Event fired when the upload is over, either because the tool ran
/// successfully or because of an error in any of the states.
#[derive(Debug)]
pub(crate) struct DoneEvent {
    pub result: Result<Uploaded, Error>,
}

// Events enum ==================================================================

/// Events that can be triggered within the upload state machine.
///
/// Each possible value holds an `event`, which in turn holds the data passed
/// by the origin state to the target state.
#[derive(Debug)]
pub(crate) enum Event {
    ResolvePort(ResolvePortEvent),
    Touch(TouchEvent),
    Reacquire(ReacquireEvent),
    Synthesize(SynthesizeEvent),
    Execute(ExecuteEvent),
    Done(DoneEvent),
}

impl From<Error> for Event {
    fn from(error: Error) -> Self {
        Event::Done(DoneEvent { result: Err(error) })
    }
}
