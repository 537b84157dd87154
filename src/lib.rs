//! Flasher uploads a firmware binary to a serial-attached board and can then
//! tail the board console.
//!
//! Boards are described the way Arduino style toolchains describe them: a
//! `boards.txt` database holding the settings of each board, and a
//! `platform.txt` database holding the settings of the upload tools, both as
//! dotted `key=value` properties referring to each other through `{key}`
//! placeholders (see [`PropertyTree`]).
//!
//! An upload is run by the [`upload`] state machine:
//!
//! * the board settings are merged over the settings of its upload tool,
//! * the serial port is either the one given or the first new port to show
//!   up on the system (see [`PortRegistry`]),
//! * boards that ask for it are reset into their bootloader with the
//!   *1200bps touch*, after which the port the bootloader shows up on is used,
//! * the tool's `upload.pattern` is resolved into a command line which is run
//!   through a [`CommandRunner`].
//!
//! The [`monitor`] then optionally tails the console, ending on inactivity or
//! when the output matches one of the pass/fail/stop triggers.
//!
//! Following the state machine pattern, states are types, events carry the
//! data from one state to the next, and transitions are `From` conversions
//! from events into states. Only transitions with a `From` implementation can
//! be expressed, so illegal ones are caught at compile-time.

mod error;
mod properties;
mod settings;
mod utils;

pub mod monitor;
pub mod upload;

pub use error::{Error, Result};
pub use properties::{PropertyTree, MAX_RESOLUTION_PASSES};
pub use settings::{Settings, SettingsBuilder, TailSettings};
pub use utils::{
    diff, CommandRunner, PortReader, PortRegistry, PortSnapshot, SerialBackend, ShellRunner,
    SystemBackend, DISCOVERY_TIMEOUT, POLL_INTERVAL, UPLOAD_PREFIX,
};
