//! Serial monitor tailing the console of a board.
//!
//! **Example** - Tailing a port until the firmware reports its test result:
//! ```no_run
//! use std::time::Duration;
//!
//! use flasher::{monitor::Monitor, PortRegistry, SettingsBuilder, SystemBackend};
//!
//! # fn main() -> flasher::Result<()> {
//! let settings = SettingsBuilder::new()
//!     .tail(true)
//!     .tail_inactivity(Duration::from_secs(30))
//!     .tail_pass("^PASS")
//!     .tail_fail("^FAIL")
//!     .finalize();
//! let mut registry = PortRegistry::new(Box::new(SystemBackend))?;
//! let outcome = Monitor::new(&mut registry, "/dev/ttyACM0", &settings)?.run()?;
//! std::process::exit(outcome.exit_code);
//! # }
//! ```

mod session;
mod supervisor;
mod triggers;

pub use supervisor::{Monitor, TailEnd, TailOutcome};
pub use triggers::{StopTriggers, Trigger};
