//! `flasher` upload state machine.
//!
//! An upload resolves the board configuration, settles on a serial port
//! (possibly resetting the board into its bootloader on the way), turns the
//! tool's command pattern into a command line and runs it. Each invocation
//! runs to completion on the calling thread.
//!
//! ```text
//!                 START
//!                   |
//!                   v
//!          .-----------------.
//!          | ResolvingConfig |--------------------------.
//!          '-----------------'                          |
//!                   |                                   |
//!                   v                                   |
//!          .----------------.   port given,             |
//!          | PortResolution |---- touch wanted ---.     |
//!          '----------------'                     |     |
//!                   |                             v     |
//!            port given, or          .----------.      |
//!            port discovered         | Touching |------|
//!                   |                '----------'      |
//!                   |                     |            |
//!                   |                     v            |
//!                   |              .-------------.     |
//!                   |              | Reacquiring |-----|
//!                   |              '-------------'     |
//!                   v                     |            |
//!          .------------------.           |            |
//!          | CommandSynthesis |<----------'            |
//!          '------------------'                        |
//!                   |                                  |
//!                   v                                  |
//!             .-----------.                            |
//!             | Executing |                            |
//!             '-----------'                            |
//!                   |                                  |
//!                   v                                  |
//!               .------.                               |
//!               | Done |<------------ errors ----------'
//!               '------'
//! ```

use std::path::Path;

use log::debug;

use super::events::*;
use super::host::Host;
use super::states::*;
use crate::{
    error::Result, properties::PropertyTree, settings::Settings, utils::CommandRunner,
    utils::PortRegistry,
};

// =============================================================================
// Public Interface
// =============================================================================

/// Everything an upload works with, shared by all the states.
pub struct UploadContext<'a> {
    /// The board database (`boards.txt`).
    pub boards: &'a PropertyTree,
    /// The platform and tool database (`platform.txt`).
    pub platform: &'a PropertyTree,
    pub settings: &'a Settings,
    /// The firmware binary to flash.
    pub binary: &'a Path,
    pub host: Host,
    pub registry: &'a mut PortRegistry,
    pub runner: &'a mut dyn CommandRunner,
}

/// Represents the upload state machine. Use the [`factory()`] function to
/// get an instance then run it by calling its `run()` method.
pub struct UploadOrchestrator<'a> {
    ctx: UploadContext<'a>,
    sm: UploadStates,
}
impl<'a> UploadOrchestrator<'a> {
    /// Run the state machine until the `Done` state is reached, returning the
    /// command line that was executed and the port it went to.
    pub fn run(mut self) -> Result<Uploaded> {
        loop {
            self.sm = match self.sm.step(&mut self.ctx) {
                UploadStates::Done(done) => return done.result,
                next => next,
            };
        }
    }
}

/// Factory function for the upload state machine.
pub fn factory(ctx: UploadContext<'_>) -> UploadOrchestrator<'_> {
    UploadOrchestrator {
        ctx,
        // The state machine naturally starts by resolving the configuration.
        sm: UploadStates::ResolvingConfig(ResolvingConfigState {}),
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// An enum wrapper around the states of the upload state machine.
#[derive(Debug)]
enum UploadStates {
    ResolvingConfig(ResolvingConfigState),
    PortResolution(PortResolutionState),
    Touching(TouchingState),
    Reacquiring(ReacquiringState),
    CommandSynthesis(CommandSynthesisState),
    Executing(ExecutingState),
    Done(DoneState),
}
impl UploadStates {
    /// The unit of work in the state machine event loop. It runs the current
    /// state and decides the next transition from the event it returns. Only
    /// transitions with a `From` implementation can be expressed.
    fn step(self, ctx: &mut UploadContext<'_>) -> Self {
        match self {
            UploadStates::ResolvingConfig(state) => match state.run(ctx) {
                Event::ResolvePort(ev) => UploadStates::PortResolution(ev.into()),
                Event::Done(ev) => UploadStates::Done(ev.into()),
                event => unreachable!("illegal event {:#?} at ResolvingConfig", event),
            },
            UploadStates::PortResolution(state) => match state.run(ctx) {
                Event::Touch(ev) => UploadStates::Touching(ev.into()),
                Event::Synthesize(ev) => UploadStates::CommandSynthesis(ev.into()),
                Event::Done(ev) => UploadStates::Done(ev.into()),
                event => unreachable!("illegal event {:#?} at PortResolution", event),
            },
            UploadStates::Touching(state) => match state.run(ctx) {
                Event::Reacquire(ev) => UploadStates::Reacquiring(ev.into()),
                Event::Done(ev) => UploadStates::Done(ev.into()),
                event => unreachable!("illegal event {:#?} at Touching", event),
            },
            UploadStates::Reacquiring(state) => match state.run(ctx) {
                Event::Synthesize(ev) => UploadStates::CommandSynthesis(ev.into()),
                Event::Done(ev) => UploadStates::Done(ev.into()),
                event => unreachable!("illegal event {:#?} at Reacquiring", event),
            },
            UploadStates::CommandSynthesis(state) => match state.run(ctx) {
                Event::Execute(ev) => UploadStates::Executing(ev.into()),
                Event::Done(ev) => UploadStates::Done(ev.into()),
                event => unreachable!("illegal event {:#?} at CommandSynthesis", event),
            },
            UploadStates::Executing(state) => match state.run(ctx) {
                Event::Done(ev) => UploadStates::Done(ev.into()),
                event => unreachable!("illegal event {:#?} at Executing", event),
            },
            UploadStates::Done(state) => UploadStates::Done(state),
        }
    }
}

// -----------------------------------------------------------------------------
// State from Event transitions
// -----------------------------------------------------------------------------

impl From<ResolvePortEvent> for PortResolutionState {
    fn from(event: ResolvePortEvent) -> PortResolutionState {
        PortResolutionState {
            config: event.config,
        }
    }
}

impl From<TouchEvent> for TouchingState {
    fn from(event: TouchEvent) -> TouchingState {
        TouchingState {
            config: event.config,
            port: event.port,
        }
    }
}

impl From<ReacquireEvent> for ReacquiringState {
    fn from(event: ReacquireEvent) -> ReacquiringState {
        ReacquiringState {
            config: event.config,
            port: event.port,
        }
    }
}

impl From<SynthesizeEvent> for CommandSynthesisState {
    fn from(event: SynthesizeEvent) -> CommandSynthesisState {
        CommandSynthesisState {
            config: event.config,
            port: event.port,
        }
    }
}

impl From<ExecuteEvent> for ExecutingState {
    fn from(event: ExecuteEvent) -> ExecutingState {
        ExecutingState {
            command_line: event.command_line,
            port: event.port,
        }
    }
}

impl From<DoneEvent> for DoneState {
    fn from(event: DoneEvent) -> DoneState {
        match &event.result {
            Ok(_) => debug!("upload done"),
            Err(e) => debug!("upload failed: {}", e),
        }
        DoneState {
            result: event.result,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        error::Error,
        settings::SettingsBuilder,
        utils::{command::mock::RecordingRunner, ports::mock::MockBackend},
    };

    const BOARDS: &str = "\
# Arduino boards
uno.name=Arduino Uno
uno.upload.tool=avrdude
uno.upload.use_1200bps_touch=true
uno.upload.speed=115200

nano.upload.tool=avrdude
nano.upload.speed=57600

zero.upload.tool=bossac
zero.upload.use_1200bps_touch=true

orphan.name=No tool
";

    const PLATFORM: &str = "\
cmd.linux=avrdude_linux
tools.avrdude.upload.pattern={cmd} -p{serial.port.file}
tools.avrdude.upload.speed=19200
tools.avrdude.upload.params.verbose=-v
tools.avrdude.upload.params.quiet=-q
tools.avrdude.upload.params.verify=
tools.avrdude.upload.params.noverify=-V
tools.bossac.cmd=bossac
tools.bossac.cmd.linux=bossac_linux
tools.bossac.upload.params.verbose=-i -d
tools.bossac.upload.params.quiet=
tools.bossac.upload.params.verify=-v
tools.bossac.upload.params.noverify=
tools.bossac.upload.pattern=\"{runtime.tools.bossac.path}/{cmd}\" {upload.verbose} --port={serial.port.file} -U true -e -w {upload.verify} -b \"{build.path}/{build.project_name}.bin\" -R --offset={upload.offset}
";

    struct Fixture {
        boards: PropertyTree,
        platform: PropertyTree,
        backend: MockBackend,
        runner: RecordingRunner,
        binary: &'static str,
    }

    impl Fixture {
        fn new(snapshots: Vec<Vec<&'static str>>) -> Self {
            Fixture {
                boards: BOARDS.parse().unwrap(),
                platform: PLATFORM.parse().unwrap(),
                backend: MockBackend::with_snapshots(snapshots),
                runner: RecordingRunner::default(),
                binary: "/work/build/blink.ino.bin",
            }
        }

        fn uploaded(&mut self, settings: &Settings, host: Host) -> Result<Uploaded> {
            let mut registry = self.backend.registry();
            let ctx = UploadContext {
                boards: &self.boards,
                platform: &self.platform,
                settings,
                binary: Path::new(self.binary),
                host,
                registry: &mut registry,
                runner: &mut self.runner,
            };
            factory(ctx).run()
        }

        fn upload(&mut self, settings: &Settings, host: Host) -> Result<String> {
            self.uploaded(settings, host).map(|u| u.command_line)
        }
    }

    fn linux() -> Host {
        Host::new("linux", "x86_64")
    }

    fn settings() -> SettingsBuilder {
        SettingsBuilder::new().discovery_timeout(Duration::from_millis(20))
    }

    #[test]
    fn avrdude_on_linux() {
        let mut fixture = Fixture::new(vec![vec!["/dev/ttyACM0"]]);
        let settings = settings().board("uno").port("/dev/ttyACM0").finalize();

        let line = fixture.upload(&settings, linux()).unwrap();

        assert!(line.starts_with("avrdude_linux -pttyACM0"), "{}", line);
        assert_eq!(fixture.runner.lines, vec![line]);
        // The board asked for the touch and nothing new showed up, so the
        // given port was used again.
        assert_eq!(
            fixture.backend.script().touches,
            vec![("/dev/ttyACM0".to_owned(), 1200)]
        );
    }

    #[test]
    fn touch_then_bootloader_port() {
        let mut fixture = Fixture::new(vec![
            vec!["/dev/ttyACM0"],
            vec![],
            vec!["/dev/ttyACM1"],
        ]);
        let settings = settings()
            .board("zero")
            .port("/dev/ttyACM0")
            .discovery_timeout(Duration::from_secs(5))
            .finalize();

        let uploaded = fixture.uploaded(&settings, linux()).unwrap();

        assert!(uploaded.command_line.contains("--port=ttyACM1"), "{}", uploaded.command_line);
        assert_eq!(uploaded.port, "/dev/ttyACM1");
    }

    #[test]
    fn skip_touch() {
        let mut fixture = Fixture::new(vec![vec!["/dev/ttyACM0"]]);
        let settings = settings()
            .board("uno")
            .port("/dev/ttyACM0")
            .skip_touch(true)
            .finalize();

        fixture.upload(&settings, linux()).unwrap();

        assert!(fixture.backend.script().touches.is_empty());
    }

    #[test]
    fn no_touch_unless_asked_by_board() {
        let mut fixture = Fixture::new(vec![vec!["/dev/ttyUSB0"]]);
        let settings = settings().board("nano").port("/dev/ttyUSB0").finalize();

        let line = fixture.upload(&settings, linux()).unwrap();

        assert_eq!(line, "avrdude_linux -pttyUSB0");
        assert!(fixture.backend.script().touches.is_empty());
    }

    #[test]
    fn discovered_port_is_used_when_none_given() {
        let mut fixture = Fixture::new(vec![vec![], vec![], vec!["/dev/ttyUSB3"]]);
        let settings = settings()
            .board("uno")
            .discovery_timeout(Duration::from_secs(5))
            .finalize();

        let uploaded = fixture.uploaded(&settings, linux()).unwrap();

        assert_eq!(uploaded.command_line, "avrdude_linux -pttyUSB3");
        assert_eq!(uploaded.port, "/dev/ttyUSB3");
        // Discovered ports are not touched.
        assert!(fixture.backend.script().touches.is_empty());
    }

    #[test]
    fn no_port_at_all() {
        let mut fixture = Fixture::new(vec![vec!["/dev/ttyS0"]]);
        let settings = settings().board("uno").finalize();

        let err = fixture.upload(&settings, linux()).unwrap_err();

        assert!(matches!(err, Error::NoPort));
        assert!(fixture.runner.lines.is_empty());
    }

    #[test]
    fn full_bossac_command() {
        let mut fixture = Fixture::new(vec![vec!["/dev/ttyACM0"]]);
        let settings = settings()
            .board("zero")
            .port("/dev/ttyACM0")
            .tools("/opt/tools")
            .skip_touch(true)
            .finalize();

        let line = fixture.upload(&settings, linux()).unwrap();

        assert_eq!(
            line,
            "\"/opt/tools/bossac_linux\" -i -d --port=ttyACM0 -U true -e -w -v \
             -b \"/work/build/blink.ino.bin\" -R --offset=0x2000"
        );
    }

    #[test]
    fn bare_binary_name_is_in_current_directory() {
        let mut fixture = Fixture::new(vec![vec!["/dev/ttyACM0"]]);
        fixture.binary = "blink.bin";
        let settings = settings()
            .board("zero")
            .port("/dev/ttyACM0")
            .skip_touch(true)
            .finalize();

        let line = fixture.upload(&settings, linux()).unwrap();

        assert!(line.contains("-b \"./blink.bin\""), "{}", line);
    }

    #[test]
    fn quiet_without_verify() {
        let mut fixture = Fixture::new(vec![vec!["/dev/ttyACM0"]]);
        let settings = settings()
            .board("zero")
            .port("/dev/ttyACM0")
            .skip_touch(true)
            .quiet(true)
            .verify(false)
            .finalize();

        let line = fixture.upload(&settings, linux()).unwrap();

        assert!(line.contains("bossac_linux\"  --port=ttyACM0 -U true -e -w  -b"), "{}", line);
    }

    #[test]
    fn arm_command() {
        let mut fixture = Fixture::new(vec![vec!["/dev/ttyACM0"]]);
        let settings = settings()
            .board("zero")
            .port("/dev/ttyACM0")
            .skip_touch(true)
            .finalize();

        let line = fixture
            .upload(&settings, Host::new("linux", "aarch64"))
            .unwrap();

        assert!(line.contains("/bossac_linux_arm\""), "{}", line);
    }

    #[test]
    fn generic_command_without_platform_specific_one() {
        let mut fixture = Fixture::new(vec![vec!["/dev/ttyACM0"]]);
        let settings = settings()
            .board("zero")
            .port("/dev/ttyACM0")
            .skip_touch(true)
            .finalize();

        let line = fixture
            .upload(&settings, Host::new("windows", "x86_64"))
            .unwrap();

        assert!(line.contains("/bossac\""), "{}", line);
    }

    #[test]
    fn board_without_tool() {
        let mut fixture = Fixture::new(vec![vec![]]);
        let settings = settings().board("orphan").port("/dev/ttyACM0").finalize();

        let err = fixture.upload(&settings, linux()).unwrap_err();

        assert!(matches!(err, Error::MissingProperty(ref key) if key == "orphan.upload.tool"));
    }

    #[test]
    fn tool_without_pattern() {
        let mut fixture = Fixture::new(vec![vec![]]);
        fixture.boards.set("leo.upload.tool", "dfu");
        let settings = settings().board("leo").port("/dev/ttyACM0").finalize();

        let err = fixture.upload(&settings, linux()).unwrap_err();

        assert!(
            matches!(err, Error::MissingProperty(ref key) if key == "tools.dfu.upload.pattern")
        );
    }

    #[test]
    fn tool_failure_is_reported() {
        let mut fixture = Fixture::new(vec![vec![]]);
        fixture.runner.fail = true;
        let settings = settings()
            .board("nano")
            .port("/dev/ttyUSB0")
            .finalize();

        let err = fixture.upload(&settings, linux()).unwrap_err();

        assert!(matches!(err, Error::Spawn { .. }));
    }
}
