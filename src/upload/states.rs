//! States for the `flasher` upload state machine.
//!
//! This modules is private and restricted to the [`upload`](crate::upload)
//! scope. The public interface of the state machine is provided by
//! [`upload`](crate::upload).
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.

use std::path::Path;

use log::{info, warn};

use super::{events::*, host::Host, state_machine::UploadContext};
use crate::{
    error::Error,
    properties::PropertyTree,
    utils::UPLOAD_PREFIX,
};

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Trait adding the ability for a state to be `run` after a transition into it.
pub(crate) trait Runnable {
    /// A state implements this method so it can be `run` after the state
    /// machine transitions into it.
    ///
    /// The state is consumed by the call. When finished, it requests the
    /// transition to a `new state` by returning the appropriate `event`,
    /// which is then turned into the `new state` using the corresponding
    /// [`From`] trait implementation (provided such implementation exists).
    fn run(self, ctx: &mut UploadContext<'_>) -> Event;
}

// ResolvingConfig State =======================================================

/// The initial state of the upload state machine, where the board settings
/// are merged with the settings of its upload tool.
///
///  * **[`ResolvePortEvent`] => [`PortResolutionState`]** once the upload
///    configuration is known,
///  * **[`DoneEvent`] => [`DoneState`]** if the board has no upload tool or
///    its tool cannot be resolved.
#[derive(Debug)]
pub(crate) struct ResolvingConfigState {}
impl Runnable for ResolvingConfigState {
    fn run(self, ctx: &mut UploadContext<'_>) -> Event {
        info!("=> ResolvingConfig");

        let board = ctx.boards.to_subtree(&ctx.settings.board);
        let tool = try_or_done!(board.lookup("upload.tool", &PropertyTree::new()));
        if tool.is_empty() {
            return Error::MissingProperty(format!("{}.upload.tool", ctx.settings.board)).into();
        }

        let tool_tree = ctx.platform.to_subtree("tools").to_subtree(&tool);
        // Board settings take precedence over the tool defaults.
        let mut properties = tool_tree.merge(&board);
        select_command(&mut properties, ctx.platform, &ctx.host);

        Event::ResolvePort(ResolvePortEvent {
            config: UploadConfig {
                tool,
                board,
                properties,
            },
        })
    }
}

// PortResolution State ========================================================

/// Decides which port to upload to.
///
///  * **[`SynthesizeEvent`] => [`CommandSynthesisState`]** with the given
///    port, or a discovered one when none was given,
///  * **[`TouchEvent`] => [`TouchingState`]** when a port was given and the
///    board asks for the 1200bps touch,
///  * **[`DoneEvent`] => [`DoneState`]** when no port could be found.
#[derive(Debug)]
pub(crate) struct PortResolutionState {
    pub config: UploadConfig,
}
impl Runnable for PortResolutionState {
    fn run(self, ctx: &mut UploadContext<'_>) -> Event {
        info!("=> PortResolution");

        let config = self.config;
        match ctx.settings.port.clone() {
            None => {
                info!("No port given, waiting for a new one to show up...");
                match try_or_done!(ctx.registry.discover(ctx.settings.discovery_timeout)) {
                    Some(port) => Event::Synthesize(SynthesizeEvent { config, port }),
                    None => Error::NoPort.into(),
                }
            }
            Some(port) => {
                if !ctx.settings.skip_touch && config.board.to_bool("upload.use_1200bps_touch") {
                    Event::Touch(TouchEvent { config, port })
                } else {
                    Event::Synthesize(SynthesizeEvent { config, port })
                }
            }
        }
    }
}

// Touching State ==============================================================

/// Sends the 1200bps touch, asking the board to reset into its bootloader.
///
///  * **[`ReacquireEvent`] => [`ReacquiringState`]** after the touch,
///  * **[`DoneEvent`] => [`DoneState`]** if the port could not be opened.
#[derive(Debug)]
pub(crate) struct TouchingState {
    pub config: UploadConfig,
    pub port: String,
}
impl Runnable for TouchingState {
    fn run(self, ctx: &mut UploadContext<'_>) -> Event {
        info!("=> Touching");
        info!("Use 1200bps touch on {}...", self.port);

        try_or_done!(ctx.registry.touch(&self.port));
        Event::Reacquire(ReacquireEvent {
            config: self.config,
            port: self.port,
        })
    }
}

// Reacquiring State ===========================================================

/// Waits for the port the bootloader enumerates on.
///
/// If none shows up in time, the port that was originally given is used
/// again, even though it may be stale by now.
///
///  * **[`SynthesizeEvent`] => [`CommandSynthesisState`]** with the new port
///    or the fallback,
///  * **[`DoneEvent`] => [`DoneState`]** when there is nothing to fall back
///    to.
#[derive(Debug)]
pub(crate) struct ReacquiringState {
    pub config: UploadConfig,
    pub port: String,
}
impl Runnable for ReacquiringState {
    fn run(self, ctx: &mut UploadContext<'_>) -> Event {
        info!("=> Reacquiring");

        let config = self.config;
        match try_or_done!(ctx.registry.discover(ctx.settings.discovery_timeout)) {
            Some(port) => Event::Synthesize(SynthesizeEvent { config, port }),
            None => match ctx.settings.port.clone() {
                Some(port) => {
                    warn!(
                        "No port showed up after the touch on {}, falling back to {}",
                        self.port, port
                    );
                    Event::Synthesize(SynthesizeEvent { config, port })
                }
                None => Error::NoPort.into(),
            },
        }
    }
}

// CommandSynthesis State ======================================================

/// Injects the keys derived from the settings and the port into the upload
/// configuration, then resolves the tool's `upload.pattern` into the final
/// command line.
///
///  * **[`ExecuteEvent`] => [`ExecutingState`]** with the command line,
///  * **[`DoneEvent`] => [`DoneState`]** if the pattern is missing or cannot
///    be resolved.
#[derive(Debug)]
pub(crate) struct CommandSynthesisState {
    pub config: UploadConfig,
    pub port: String,
}
impl Runnable for CommandSynthesisState {
    fn run(self, ctx: &mut UploadContext<'_>) -> Event {
        info!("=> CommandSynthesis");
        info!("Using port {}", self.port);

        let UploadConfig {
            tool,
            mut properties,
            ..
        } = self.config;
        inject_derived_keys(&mut properties, ctx, &tool, &self.port);

        let pattern_key = format!("tools.{}.upload.pattern", tool);
        if !ctx.platform.contains_key(&pattern_key) {
            return Error::MissingProperty(pattern_key).into();
        }
        let command_line = try_or_done!(ctx.platform.lookup(&pattern_key, &properties));
        info!("{}", command_line);

        Event::Execute(ExecuteEvent {
            command_line,
            port: self.port,
        })
    }
}

// Executing State =============================================================

/// Hands the command line over to the runner.
///
///  * **[`DoneEvent`] => [`DoneState`]** in all cases, carrying the command
///    line and port on success.
#[derive(Debug)]
pub(crate) struct ExecutingState {
    pub command_line: String,
    pub port: String,
}
impl Runnable for ExecutingState {
    fn run(self, ctx: &mut UploadContext<'_>) -> Event {
        info!("=> Executing");

        try_or_done!(ctx.runner.run(&self.command_line, UPLOAD_PREFIX));
        Event::Done(DoneEvent {
            result: Ok(Uploaded {
                command_line: self.command_line,
                port: self.port,
            }),
        })
    }
}

// Done State ==================================================================

/// The final state, holding the outcome of the upload.
#[derive(Debug)]
pub(crate) struct DoneState {
    pub result: Result<Uploaded, Error>,
}

// =============================================================================
// Private stuff
// =============================================================================

/// Replace `cmd` in `properties` with the command specific to `host`, when
/// there is one.
fn select_command(properties: &mut PropertyTree, platform: &PropertyTree, host: &Host) {
    let key = format!("cmd.{}", host.os);
    let specific = properties
        .get(&key)
        .or_else(|| platform.get(&key))
        .filter(|cmd| !cmd.is_empty())
        .map(str::to_owned);

    match specific {
        Some(cmd) if host.arm => {
            let cmd = format!("{}_arm", cmd);
            info!(
                "Using platform specific upload command for ARM (tried {}): {}",
                key, cmd
            );
            properties.set("cmd", cmd);
        }
        Some(cmd) => {
            info!(
                "Using platform specific upload command (tried {}): {}",
                key, cmd
            );
            properties.set("cmd", cmd);
        }
        None => info!(
            "No platform specific upload command (tried {}), using {}",
            key,
            properties.get("cmd").unwrap_or_default()
        ),
    }
}

fn inject_derived_keys(
    properties: &mut PropertyTree,
    ctx: &UploadContext<'_>,
    tool: &str,
    port: &str,
) {
    let settings = ctx.settings;

    let verbose = if settings.quiet {
        "upload.params.quiet"
    } else {
        "upload.params.verbose"
    };
    let verify = if settings.verify {
        "upload.params.verify"
    } else {
        "upload.params.noverify"
    };
    let verbose = properties.get(verbose).unwrap_or_default().to_owned();
    let verify = properties.get(verify).unwrap_or_default().to_owned();
    properties.set("upload.verbose", verbose);
    properties.set("upload.verify", verify);

    let tools = settings
        .tools
        .as_deref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    properties.set(format!("runtime.tools.{}.path", tool), tools.clone());
    properties.set("runtime.tools.path", tools);

    properties.set("serial.port", port);
    properties.set("serial.port.file", file_name(Path::new(port)));

    let binary = ctx.binary;
    // A bare file name lives in the current directory.
    let build_path = match binary.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.display().to_string(),
        _ => ".".to_owned(),
    };
    properties.set("build.path", build_path);
    properties.set(
        "build.project_name",
        binary
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
    );
    properties.set("upload.offset", format!("0x{:x}", settings.flash_offset));
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
