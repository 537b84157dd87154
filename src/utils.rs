//! Helpers at the hardware and process boundaries.

pub mod command;
pub mod ports;

pub use command::{CommandRunner, ShellRunner, UPLOAD_PREFIX};
pub use ports::{
    diff, PortReader, PortRegistry, PortSnapshot, SerialBackend, SystemBackend, DISCOVERY_TIMEOUT,
    POLL_INTERVAL,
};
