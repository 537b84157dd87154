//! Error types for `flasher`.
//!
//! Every component returns these values up to the caller. Deciding whether an
//! error ends the process, and with which exit code, is left to the binary.

use std::{io, path::PathBuf, process::ExitStatus, time::Duration};

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A property file could not be read.
    #[error("unable to read property file `{}`: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A key the upload cannot do without is absent from the configuration.
    #[error("missing required property `{0}`")]
    MissingProperty(String),

    /// Placeholder substitution did not reach a fixpoint, usually because of a
    /// reference cycle.
    #[error("unable to resolve `{key}` after {passes} passes, left with `{value}`")]
    Resolution {
        key: String,
        passes: usize,
        value: String,
    },

    #[error("unable to enumerate serial ports: {0}")]
    Enumeration(#[source] serialport::Error),

    #[error("serial port `{path}`: {source}")]
    Port {
        path: String,
        #[source]
        source: serialport::Error,
    },

    #[error("no new serial port appeared within {0:?}")]
    DiscoveryTimeout(Duration),

    /// No port was given and none showed up during discovery.
    #[error("no port")]
    NoPort,

    #[error("unable to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` failed with {status}")]
    UploadFailed { command: String, status: ExitStatus },

    #[error("unable to open log file `{}`: {source}", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid trigger pattern: {0}")]
    Trigger(#[from] regex::Error),

    #[error("no such binary `{}`", .0.display())]
    Binary(PathBuf),

    #[error("unable to find the tools directory, looked in {0:?}")]
    ToolsNotFound(Vec<PathBuf>),
}
