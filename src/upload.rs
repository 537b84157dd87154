//! Upload of a firmware binary with the board's upload tool.
//!
//! **Example** - Running an upload:
//! ```no_run
//! use std::path::Path;
//!
//! use flasher::{
//!     upload::{self, Host, UploadContext},
//!     PortRegistry, PropertyTree, SettingsBuilder, ShellRunner, SystemBackend,
//! };
//!
//! # fn main() -> flasher::Result<()> {
//! let boards = PropertyTree::load("tools/boards.txt")?;
//! let platform = PropertyTree::load("tools/platform.txt")?;
//! let settings = SettingsBuilder::new().board("uno").finalize();
//! let mut registry = PortRegistry::new(Box::new(SystemBackend))?;
//! let uploaded = upload::factory(UploadContext {
//!     boards: &boards,
//!     platform: &platform,
//!     settings: &settings,
//!     binary: Path::new("build/blink.bin"),
//!     host: Host::current(),
//!     registry: &mut registry,
//!     runner: &mut ShellRunner,
//! })
//! .run()?;
//! println!("ran {} on {}", uploaded.command_line, uploaded.port);
//! # Ok(())
//! # }
//! ```

#[macro_use]
mod macros;

mod events;
mod host;
mod state_machine;
mod states;

pub use events::Uploaded;
pub use host::Host;
pub use state_machine::{factory, UploadContext, UploadOrchestrator};
