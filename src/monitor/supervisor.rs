//! The serial monitor supervisor loop.
//!
//! ```text
//!            START
//!              |
//!              v
//!      .---------------.   gone    .-----------.
//! .--->| port present? |---------->| discovery |
//! |    '---------------'           '-----------'
//! |            |                         |
//! |            v                         |
//! |       .--------.                     |
//! |       |  open  |<--------------------'
//! |       '--------'
//! |            |
//! |            v
//! |   .-----------------.   trigger
//! |   |  tail session   |-------------> END (trigger exit code)
//! |   '-----------------'
//! |            |
//! |     inactive/exited
//! |            |
//! |      yes   v    no
//! '-------( reopen? )-----------------> END (0)
//! ```

use std::{
    fs::{File, OpenOptions},
    path::Path,
    time::Duration,
};

use log::{info, warn};
use retry::{delay::Fixed, retry};

use super::{
    session::{SessionEnd, TailSession},
    triggers::{StopTriggers, Trigger},
};
use crate::{
    error::{Error, Result},
    settings::{Settings, TailSettings},
    utils::{PortReader, PortRegistry},
};

/// Heartbeat of a tail session.
const HEARTBEAT: Duration = Duration::from_secs(1);

/// Delay before trying again to open the port when reopening is enabled.
const REOPEN_DELAY: Duration = Duration::from_millis(500);

// =============================================================================
// Public Interface
// =============================================================================

/// Why the monitor stopped.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TailEnd {
    Pass,
    Fail,
    Stop,
    /// No data for longer than the inactivity window.
    Inactive,
    /// The port was closed or could not be read anymore.
    Exited,
}

/// The result of monitoring a port. Trigger matches are not errors: they
/// just decide the exit code.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TailOutcome {
    pub exit_code: i32,
    pub reason: TailEnd,
}

impl From<Trigger> for TailOutcome {
    fn from(trigger: Trigger) -> Self {
        TailOutcome {
            exit_code: trigger.exit_code(),
            reason: match trigger {
                Trigger::Pass => TailEnd::Pass,
                Trigger::Fail => TailEnd::Fail,
                Trigger::Stop => TailEnd::Stop,
            },
        }
    }
}

/// Tails the console of a board.
pub struct Monitor<'a> {
    registry: &'a mut PortRegistry,
    port: String,
    baud_rate: u32,
    tail: TailSettings,
    triggers: StopTriggers,
    discovery_timeout: Duration,
    heartbeat: Duration,
    reopen_delay: Duration,
}

impl<'a> Monitor<'a> {
    /// Prepare monitoring of `port`, compiling the trigger patterns.
    pub fn new(
        registry: &'a mut PortRegistry,
        port: impl Into<String>,
        settings: &Settings,
    ) -> Result<Self> {
        Ok(Monitor {
            registry,
            port: port.into(),
            baud_rate: settings.baud_rate,
            triggers: StopTriggers::from_settings(&settings.tail)?,
            tail: settings.tail.clone(),
            discovery_timeout: settings.discovery_timeout,
            heartbeat: HEARTBEAT,
            reopen_delay: REOPEN_DELAY,
        })
    }

    /// Change the period at which inactivity is checked.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Change the delay between two attempts at opening the port.
    pub fn with_reopen_delay(mut self, delay: Duration) -> Self {
        self.reopen_delay = delay;
        self
    }

    /// The port currently monitored. It changes when the original one
    /// disappears and another one is discovered.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Monitor the port until a trigger matches or, when reopening is
    /// disabled, until the first session ends.
    pub fn run(&mut self) -> Result<TailOutcome> {
        loop {
            let port = self.open_session()?;
            let log = self.open_log()?;

            let session = TailSession::start(port, self.triggers.clone(), log, self.heartbeat);
            let reason = match session.supervise(self.tail.inactivity) {
                SessionEnd::Triggered(trigger) => return Ok(trigger.into()),
                SessionEnd::Inactive => TailEnd::Inactive,
                SessionEnd::Exited => TailEnd::Exited,
            };

            if !self.tail.reopen {
                return Ok(TailOutcome {
                    exit_code: 0,
                    reason,
                });
            }
            info!("Reopening {}...", self.port);
        }
    }

    // -------------------------------------------------------------------------
    // Private stuff
    // -------------------------------------------------------------------------

    /// Open the port, looking for a new one first if it vanished. When
    /// reopening is enabled, keep trying forever.
    fn open_session(&mut self) -> Result<PortReader> {
        if !self.tail.reopen {
            return self.locate_and_open();
        }

        let result = retry(Fixed::from_millis(self.reopen_delay.as_millis() as u64), || {
            self.locate_and_open().map_err(|e| {
                warn!("{}, trying again...", e);
                e
            })
        });
        match result {
            Ok(port) => Ok(port),
            Err(retry::Error::Operation { error, .. }) => Err(error),
            Err(retry::Error::Internal(reason)) => Err(Error::Port {
                path: self.port.clone(),
                source: serialport::Error::new(serialport::ErrorKind::Unknown, reason),
            }),
        }
    }

    fn locate_and_open(&mut self) -> Result<PortReader> {
        if !self.registry.exists(&self.port) {
            info!("Port '{}' disappeared, scanning...", self.port);
            match self.registry.discover(self.discovery_timeout)? {
                Some(port) => self.port = port,
                None => return Err(Error::DiscoveryTimeout(self.discovery_timeout)),
            }
        }
        self.registry.open(&self.port, self.baud_rate)
    }

    fn open_log(&self) -> Result<Option<File>> {
        match &self.tail.append {
            Some(path) => {
                info!("Logging to {}...", path.display());
                open_append(path).map(Some)
            }
            None => Ok(None),
        }
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| Error::LogFile {
            path: path.to_path_buf(),
            source,
        })
}

// =============================================================================
// Unit Tests
// =============================================================================
