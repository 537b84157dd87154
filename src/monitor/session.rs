//! One open/read/close cycle of the serial monitor.
//!
//! A session runs two producer threads feeding a single rendezvous channel:
//!
//!  * the **reader** owns the port, echoes what it reads and evaluates the
//!    triggers; it signals `Data` before handling each chunk and `Exited`
//!    when it stops,
//!  * the **ticker** signals `Tick` every heartbeat so that inactivity is
//!    checked even when the port is silent.
//!
//! The supervisor consuming the channel is the only one deciding when the
//! session is over. Closing a session makes the reader drop, and thereby
//! close, the port.

use std::{
    fs::File,
    io::{self, BufWriter, Read, Write},
    sync::mpsc::{self, Receiver, Sender, SyncSender, TryRecvError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use hexplay::HexViewBuilder;
use log::{debug, info, log_enabled, trace, warn, Level::Trace};

use super::triggers::{StopTriggers, Trigger};
use crate::utils::PortReader;

/// Size of the chunks read from the port.
const CHUNK_SIZE: usize = 256;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Messages sent to the supervisor.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum Signal {
    /// The reader got a non-empty chunk.
    Data,
    /// Heartbeat.
    Tick,
    /// The reader is gone, possibly because a trigger matched.
    Exited(Option<Trigger>),
}

/// How a session ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum SessionEnd {
    Triggered(Trigger),
    Inactive,
    Exited,
}

pub(crate) struct TailSession {
    signals: Receiver<Signal>,
    stop: Sender<()>,
    reader: JoinHandle<()>,
    last_activity: Instant,
}

impl TailSession {
    /// Start the reader and ticker threads over an open `port`.
    pub fn start(
        port: PortReader,
        triggers: StopTriggers,
        log: Option<File>,
        heartbeat: Duration,
    ) -> Self {
        // Unbuffered: every signal is a hand-off to the supervisor.
        let (signals_tx, signals) = mpsc::sync_channel(0);
        let (stop, stop_rx) = mpsc::channel();

        let reader_tx = signals_tx.clone();
        let reader = thread::spawn(move || {
            read_port(port, triggers, log.map(BufWriter::new), reader_tx, stop_rx)
        });
        thread::spawn(move || tick(signals_tx, heartbeat));

        TailSession {
            signals,
            stop,
            reader,
            last_activity: Instant::now(),
        }
    }

    /// Consume signals until the session ends. A zero `inactivity` window
    /// never expires.
    pub fn supervise(mut self, inactivity: Duration) -> SessionEnd {
        let end = loop {
            match self.signals.recv() {
                Ok(Signal::Data) => self.last_activity = Instant::now(),
                Ok(Signal::Tick) => {}
                Ok(Signal::Exited(Some(trigger))) => break SessionEnd::Triggered(trigger),
                Ok(Signal::Exited(None)) | Err(_) => break SessionEnd::Exited,
            }

            if inactivity > Duration::from_secs(0) && self.last_activity.elapsed() > inactivity {
                info!("Tail inactive!");
                break SessionEnd::Inactive;
            }
        };
        self.close();
        end
    }

    /// Tell the reader to stop and wait until it has closed the port.
    fn close(self) {
        // The reader may be blocked handing over a signal; dropping the
        // receiving end unblocks it.
        let TailSession {
            signals,
            stop,
            reader,
            ..
        } = self;
        let _ = stop.send(());
        drop(signals);
        if reader.join().is_err() {
            warn!("serial reader thread panicked");
        }
        debug!("session closed");
    }
}

// =============================================================================
// Private stuff
// =============================================================================

fn read_port(
    mut port: PortReader,
    triggers: StopTriggers,
    mut log: Option<BufWriter<File>>,
    signals: SyncSender<Signal>,
    stop: Receiver<()>,
) {
    let mut buf = [0u8; CHUNK_SIZE];

    let outcome = loop {
        // Stop when asked to, or when the supervisor is gone.
        if !matches!(stop.try_recv(), Err(TryRecvError::Empty)) {
            break None;
        }

        let n = match port.read(&mut buf) {
            Ok(0) => {
                debug!("port returned no data, assuming it is closed");
                break None;
            }
            Ok(n) => n,
            Err(ref e)
                if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::Interrupted =>
            {
                continue
            }
            Err(e) => {
                info!("Error reading: {}", e);
                break None;
            }
        };

        if signals.send(Signal::Data).is_err() {
            break None;
        }

        if log_enabled!(Trace) {
            let view = HexViewBuilder::new(&buf[..n])
                .address_offset(0)
                .row_width(16)
                .finish();
            trace!("received {} bytes\n{}", n, view);
        }

        // Everything but carriage returns goes through as is.
        let sanitized: Vec<u8> = buf[..n].iter().copied().filter(|b| *b != b'\r').collect();
        echo(&sanitized);
        if let Some(log) = log.as_mut() {
            if let Err(e) = log.write_all(&sanitized).and_then(|_| log.flush()) {
                warn!("unable to write to the log file: {}", e);
            }
        }

        if let Some(trigger) = triggers.evaluate(&sanitized) {
            info!("Trigger {:?} matched", trigger);
            break Some(trigger);
        }
    };

    // Close the port before telling the supervisor.
    drop(port);
    let _ = signals.send(Signal::Exited(outcome));
}

fn tick(signals: SyncSender<Signal>, heartbeat: Duration) {
    loop {
        thread::sleep(heartbeat);
        if signals.send(Signal::Tick).is_err() {
            break;
        }
    }
}

fn echo(bytes: &[u8]) {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let _ = out.write_all(bytes).and_then(|_| out.flush());
}
