//! Running the upload tool and relaying its output.

use std::{
    io::{self, BufRead, BufReader, Read, Write},
    process::{Command, Stdio},
    sync::{Arc, Mutex},
    thread,
};

use log::{debug, warn};

use crate::error::{Error, Result};

/// Prefix put in front of every line printed by the upload tool.
pub const UPLOAD_PREFIX: &str = "upload | ";

/// Executes a fully resolved command line.
pub trait CommandRunner {
    /// Run `line` to completion, relaying its combined output line by line
    /// with `prefix` in front of each line.
    fn run(&mut self, line: &str, prefix: &str) -> Result<()>;
}

/// Runs command lines through the platform shell (`sh -c`, or `cmd /C` on
/// Windows).
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&mut self, line: &str, prefix: &str) -> Result<()> {
        execute(line, prefix, Arc::new(Mutex::new(io::stdout())))
    }
}

/// Run `line` through the shell, relaying both of its output streams to
/// `sink`, one prefixed line at a time.
fn execute<W>(line: &str, prefix: &str, sink: Arc<Mutex<W>>) -> Result<()>
where
    W: Write + Send + 'static,
{
    let spawn_error = |source| Error::Spawn {
        command: line.to_owned(),
        source,
    };

    let mut child = shell(line)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_error)?;
    debug!("Spawned upload tool with pid {}", child.id());

    // Both pipes are drained concurrently so that neither can fill up and
    // stall the tool.
    let relays: Vec<_> = vec![
        child.stdout.take().map(|s| Box::new(s) as Box<dyn Read + Send>),
        child.stderr.take().map(|s| Box::new(s) as Box<dyn Read + Send>),
    ]
    .into_iter()
    .flatten()
    .map(|stream| {
        let prefix = prefix.to_owned();
        let sink = Arc::clone(&sink);
        thread::spawn(move || relay(stream, &prefix, &sink))
    })
    .collect();

    let status = child.wait().map_err(spawn_error)?;
    for relay in relays {
        if relay.join().is_err() {
            warn!("output relay thread panicked");
        }
    }

    if status.success() {
        Ok(())
    } else {
        Err(Error::UploadFailed {
            command: line.to_owned(),
            status,
        })
    }
}

fn shell(line: &str) -> Command {
    if cfg!(windows) {
        let mut command = Command::new("cmd");
        command.arg("/C").arg(line);
        command
    } else {
        let mut command = Command::new("sh");
        command.arg("-c").arg(line);
        command
    }
}

/// Copy `stream` to `sink` line by line until the tool closes it. Lines that
/// are not valid UTF-8 are relayed lossily; the pipe is drained to the end
/// either way.
fn relay<W: Write>(stream: Box<dyn Read + Send>, prefix: &str, sink: &Mutex<W>) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("stopped relaying tool output: {}", e);
                break;
            }
        }

        let line = buf.strip_suffix(b"\n").unwrap_or(&buf);
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let text = String::from_utf8_lossy(line);
        match sink.lock() {
            Ok(mut out) => {
                let _ = writeln!(out, "{}{}", prefix, text).and_then(|_| out.flush());
            }
            Err(_) => warn!("output sink poisoned, dropping: {}", text),
        }
    }
}
