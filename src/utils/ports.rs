//! Serial port device enumeration, discovery and manipulation.

use std::{
    collections::BTreeSet,
    io::{self, Read},
    path::Path,
    thread,
    time::{Duration, Instant},
};

use log::{debug, info};
use serialport::{available_ports, SerialPort};

use crate::error::{Error, Result};

/// Default time allowed for a new port to show up.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Time between two enumerations while discovering.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Read timeout set on ports opened for tailing. Reads that time out are
/// retried, which keeps the reader responsive to session closing.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

//==============================================================================
// Public Interface
//==============================================================================

/// The set of device paths present at one instant.
pub type PortSnapshot = BTreeSet<String>;

/// A readable byte stream obtained by opening a serial port.
pub type PortReader = Box<dyn Read + Send>;

/// Everything `flasher` needs from the serial hardware.
pub trait SerialBackend: Send {
    /// List the device paths of the serial ports currently on the system.
    fn available_ports(&mut self) -> std::result::Result<Vec<String>, serialport::Error>;

    /// Open `path` at `baud_rate`, immediately drive DTR low and RTS high,
    /// then close it again.
    fn touch(&mut self, path: &str, baud_rate: u32) -> std::result::Result<(), serialport::Error>;

    /// Open `path` at `baud_rate` for reading.
    fn open(
        &mut self,
        path: &str,
        baud_rate: u32,
    ) -> std::result::Result<PortReader, serialport::Error>;

    /// Whether the device path still exists.
    fn exists(&self, path: &str) -> bool;
}

/// The [`SerialBackend`] talking to the real system through `serialport`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBackend;

impl SerialBackend for SystemBackend {
    fn available_ports(&mut self) -> std::result::Result<Vec<String>, serialport::Error> {
        Ok(available_ports()?.into_iter().map(|p| p.port_name).collect())
    }

    fn touch(&mut self, path: &str, baud_rate: u32) -> std::result::Result<(), serialport::Error> {
        let mut port = serialport::new(path, baud_rate).open()?;
        port.write_data_terminal_ready(false)?;
        port.write_request_to_send(true)?;
        debug!("Touched {} at {} baud", path, baud_rate);
        // Dropping the port closes it.
        Ok(())
    }

    fn open(
        &mut self,
        path: &str,
        baud_rate: u32,
    ) -> std::result::Result<PortReader, serialport::Error> {
        let port = serialport::new(path, baud_rate)
            .timeout(READ_TIMEOUT)
            .open()?;
        info!(
            "Connected to {} at {} baud",
            port.name().unwrap_or_else(|| path.to_owned()),
            port.baud_rate()?
        );
        Ok(Box::new(SystemPort(port)))
    }

    fn exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }
}

/// Compute the ports that appeared in, and disappeared from, `after` compared
/// to `before`. Both lists are sorted; a port present in both snapshots is in
/// neither list.
pub fn diff(before: &PortSnapshot, after: &PortSnapshot) -> (Vec<String>, Vec<String>) {
    let added = after.difference(before).cloned().collect();
    let removed = before.difference(after).cloned().collect();
    (added, removed)
}

/// Detects serial ports as they appear on the system.
///
/// The registry holds the last snapshot it observed as its baseline. Every
/// discovery poll is compared against that baseline, which then advances to
/// the new snapshot, so only ports that are new relative to the most recent
/// observation are ever reported.
pub struct PortRegistry {
    backend: Box<dyn SerialBackend>,
    baseline: PortSnapshot,
    poll_interval: Duration,
}

impl PortRegistry {
    /// Create a registry over `backend`, capturing the initial baseline.
    pub fn new(backend: Box<dyn SerialBackend>) -> Result<Self> {
        let mut registry = PortRegistry {
            backend,
            baseline: PortSnapshot::new(),
            poll_interval: POLL_INTERVAL,
        };
        registry.baseline = registry.enumerate()?;
        debug!("Initial ports: {:?}", registry.baseline);
        Ok(registry)
    }

    /// Change the delay between two discovery polls.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Capture the current set of serial ports.
    pub fn enumerate(&mut self) -> Result<PortSnapshot> {
        self.backend
            .available_ports()
            .map(|ports| ports.into_iter().collect())
            .map_err(Error::Enumeration)
    }

    /// Poll for a port that was not in the baseline until `timeout` elapses.
    ///
    /// Returns the first added port (in sorted order) as soon as one shows
    /// up, or `None` once the timeout has elapsed without any addition.
    pub fn discover(&mut self, timeout: Duration) -> Result<Option<String>> {
        let started = Instant::now();
        loop {
            let after = self.enumerate()?;
            let (added, removed) = diff(&self.baseline, &after);
            info!(
                "{:?} -> {:?} | {:?} {:?}",
                self.baseline, after, removed, added
            );
            self.baseline = after;

            if let Some(port) = added.into_iter().next() {
                return Ok(Some(port));
            }

            thread::sleep(self.poll_interval);
            if started.elapsed() > timeout {
                return Ok(None);
            }
        }
    }

    /// Send the 1200bps touch to `path`.
    pub fn touch(&mut self, path: &str) -> Result<()> {
        self.backend
            .touch(path, 1200)
            .map_err(|source| Error::Port {
                path: path.to_owned(),
                source,
            })
    }

    /// Open `path` for reading at `baud_rate`.
    pub fn open(&mut self, path: &str, baud_rate: u32) -> Result<PortReader> {
        self.backend
            .open(path, baud_rate)
            .map_err(|source| Error::Port {
                path: path.to_owned(),
                source,
            })
    }

    pub fn exists(&self, path: &str) -> bool {
        self.backend.exists(path)
    }
}

//==============================================================================
// Private stuff
//==============================================================================

struct SystemPort(Box<dyn SerialPort>);

impl Read for SystemPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

//==============================================================================
// Test double
//==============================================================================

#[cfg(test)]
pub(crate) mod mock {
    //! A scripted [`SerialBackend`] standing in for the hardware.

    use std::{
        collections::VecDeque,
        io::{self, Read},
        sync::{Arc, Mutex},
    };

    use super::*;

    /// What a scripted reader does on each `read` call.
    pub(crate) enum Chunk {
        Data(&'static str),
        /// Raw bytes, not necessarily valid UTF-8.
        Bytes(&'static [u8]),
        /// The read times out, as a silent port would.
        Silence,
        Eof,
        Error,
    }

    #[derive(Default)]
    pub(crate) struct Script {
        /// Successive answers to `available_ports`; the last one repeats.
        pub snapshots: VecDeque<Vec<&'static str>>,
        pub touches: Vec<(String, u32)>,
        pub opens: Vec<(String, u32)>,
        /// Readers handed out by successive `open` calls. An empty queue
        /// makes `open` fail.
        pub readers: VecDeque<Vec<Chunk>>,
        /// Number of `open` calls failing before readers are handed out.
        pub failing_opens: usize,
        pub missing: Vec<&'static str>,
        pub fail_enumeration: bool,
    }

    /// Cloneable handle so tests can inspect the script after the backend has
    /// been moved into a registry.
    #[derive(Clone, Default)]
    pub(crate) struct MockBackend(pub Arc<Mutex<Script>>);

    impl MockBackend {
        pub fn with_snapshots(snapshots: Vec<Vec<&'static str>>) -> Self {
            let backend = MockBackend::default();
            backend.script().snapshots = snapshots.into();
            backend
        }

        pub fn script(&self) -> std::sync::MutexGuard<'_, Script> {
            self.0.lock().unwrap()
        }

        pub fn registry(&self) -> PortRegistry {
            PortRegistry::new(Box::new(self.clone()))
                .unwrap()
                .with_poll_interval(Duration::from_millis(1))
        }
    }

    fn unavailable() -> serialport::Error {
        serialport::Error::new(serialport::ErrorKind::NoDevice, "scripted failure")
    }

    impl SerialBackend for MockBackend {
        fn available_ports(&mut self) -> std::result::Result<Vec<String>, serialport::Error> {
            let mut script = self.script();
            if script.fail_enumeration {
                return Err(unavailable());
            }
            let snapshot = if script.snapshots.len() > 1 {
                script.snapshots.pop_front().unwrap_or_default()
            } else {
                script.snapshots.front().cloned().unwrap_or_default()
            };
            Ok(snapshot.into_iter().map(String::from).collect())
        }

        fn touch(
            &mut self,
            path: &str,
            baud_rate: u32,
        ) -> std::result::Result<(), serialport::Error> {
            self.script().touches.push((path.to_owned(), baud_rate));
            Ok(())
        }

        fn open(
            &mut self,
            path: &str,
            baud_rate: u32,
        ) -> std::result::Result<PortReader, serialport::Error> {
            let mut script = self.script();
            script.opens.push((path.to_owned(), baud_rate));
            if script.failing_opens > 0 {
                script.failing_opens -= 1;
                return Err(unavailable());
            }
            match script.readers.pop_front() {
                Some(chunks) => Ok(Box::new(ScriptedReader(chunks.into()))),
                None => Err(unavailable()),
            }
        }

        fn exists(&self, path: &str) -> bool {
            !self.script().missing.iter().any(|p| *p == path)
        }
    }

    pub(crate) struct ScriptedReader(VecDeque<Chunk>);

    fn fill(buf: &mut [u8], bytes: &[u8]) -> usize {
        buf[..bytes.len()].copy_from_slice(bytes);
        bytes.len()
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Chunk::Data(text)) => Ok(fill(buf, text.as_bytes())),
                Some(Chunk::Bytes(bytes)) => Ok(fill(buf, bytes)),
                // Once the script is exhausted the port stays silent.
                Some(Chunk::Silence) | None => {
                    std::thread::sleep(Duration::from_millis(5));
                    Err(io::ErrorKind::TimedOut.into())
                }
                Some(Chunk::Eof) => Ok(0),
                Some(Chunk::Error) => Err(io::ErrorKind::BrokenPipe.into()),
            }
        }
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
