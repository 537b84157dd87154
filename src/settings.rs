//! Settings for an upload and for the serial monitor that may follow it.
//!
//! Use the [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
//! pattern to set the configurable values.

use std::{path::PathBuf, time::Duration};

use crate::utils::DISCOVERY_TIMEOUT;

// =============================================================================
// Public Interface
// =============================================================================

/// Groups all settings used by `flasher` and acts as a
/// [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
/// for the settings.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Settings {
    /// Board identifier, the first component of the keys in `boards.txt`.
    pub board: String,
    /// The port name, usually the device path. When not set, the port is
    /// discovered by waiting for a new one to show up.
    pub port: Option<String>,
    /// Path to the firmware binary to be flashed.
    pub binary: Option<PathBuf>,
    /// Directory holding `boards.txt`, `platform.txt` and the upload tools.
    pub tools: Option<PathBuf>,
    /// Do not send the 1200bps touch even if the board asks for it.
    pub skip_touch: bool,
    /// Flash offset at which the program is written.
    pub flash_offset: u32,
    /// Ask the upload tool to be quiet instead of verbose.
    pub quiet: bool,
    /// Ask the upload tool to verify the flashed program.
    pub verify: bool,
    /// The baud rate of the board console, in symbols-per-second.
    pub baud_rate: u32,
    /// How long to wait for a port to show up.
    pub discovery_timeout: Duration,
    /// Serial monitor settings.
    pub tail: TailSettings,

    /// Restrict creation of `Settings` instances unless through the
    /// `SettingsBuilder`.
    #[doc(hidden)]
    _private_use_builder: (),
}

/// What the serial monitor does once the upload is over.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct TailSettings {
    /// Monitor the board console at all.
    pub enabled: bool,
    /// Append the console output to this file.
    pub append: Option<PathBuf>,
    /// Close the port after that long without data. Zero disables it.
    pub inactivity: Duration,
    /// Open the port again once a session is over.
    pub reopen: bool,
    /// Output matching this pattern ends the monitor with exit code 0.
    pub pass: Option<String>,
    /// Output matching this pattern ends the monitor with exit code 2.
    pub fail: Option<String>,
    /// Output matching this pattern ends the monitor with exit code 0.
    pub stop: Option<String>,
}

/// The builder for the `Settings` values.
///
/// All values are optional and have default values that will be used if not
/// explicitly set.
///
/// **Example**
///
/// ```
/// use flasher::SettingsBuilder;
///
/// let settings = SettingsBuilder::new()
///     .board("uno")
///     .port("/dev/ttyACM0")
///     .finalize();
/// assert_eq!(settings.port.as_deref(), Some("/dev/ttyACM0"));
/// ```
pub struct SettingsBuilder {
    settings: Settings,
}
impl SettingsBuilder {
    /// Start building the settings using default values, no port and no
    /// binary.
    pub fn new() -> Self {
        SettingsBuilder {
            settings: Settings {
                board: "adafruit_feather_m0".into(),
                port: None,
                binary: None,
                tools: None,
                skip_touch: false,
                flash_offset: 8192,
                quiet: false,
                verify: true,
                baud_rate: 115_200,
                discovery_timeout: DISCOVERY_TIMEOUT,
                tail: TailSettings::default(),
                _private_use_builder: (),
            },
        }
    }

    pub fn board<'a>(mut self, board: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.board = board.into().into_owned();
        self
    }

    /// Set the path to the serial port
    pub fn port<'a>(mut self, port: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.port = Some(port.into().into_owned());
        self
    }

    /// Set the path to the firmware binary
    pub fn binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.settings.binary = Some(binary.into());
        self
    }

    /// Set the tools directory
    pub fn tools(mut self, tools: impl Into<PathBuf>) -> Self {
        self.settings.tools = Some(tools.into());
        self
    }

    pub fn skip_touch(mut self, skip_touch: bool) -> Self {
        self.settings.skip_touch = skip_touch;
        self
    }

    pub fn flash_offset(mut self, flash_offset: u32) -> Self {
        self.settings.flash_offset = flash_offset;
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.settings.quiet = quiet;
        self
    }

    pub fn verify(mut self, verify: bool) -> Self {
        self.settings.verify = verify;
        self
    }

    /// Set the console baud rate in symbols-per-second
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.settings.baud_rate = baud_rate;
        self
    }

    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.settings.discovery_timeout = timeout;
        self
    }

    /// Enable the serial monitor
    pub fn tail(mut self, enabled: bool) -> Self {
        self.settings.tail.enabled = enabled;
        self
    }

    /// Set the file the console output is appended to
    pub fn tail_append(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.tail.append = Some(path.into());
        self
    }

    /// Set the inactivity window, zero disables it
    pub fn tail_inactivity(mut self, inactivity: Duration) -> Self {
        self.settings.tail.inactivity = inactivity;
        self
    }

    pub fn tail_reopen(mut self, reopen: bool) -> Self {
        self.settings.tail.reopen = reopen;
        self
    }

    pub fn tail_pass<'a>(mut self, pattern: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.tail.pass = Some(pattern.into().into_owned());
        self
    }

    pub fn tail_fail<'a>(mut self, pattern: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.tail.fail = Some(pattern.into().into_owned());
        self
    }

    pub fn tail_stop<'a>(mut self, pattern: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.tail.stop = Some(pattern.into().into_owned());
        self
    }

    pub fn finalize(self) -> Settings {
        self.settings
    }
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn all_default() {
    let settings = SettingsBuilder::new().finalize();
    assert_eq!(
        settings,
        Settings {
            board: "adafruit_feather_m0".into(),
            port: None,
            binary: None,
            tools: None,
            skip_touch: false,
            flash_offset: 8192,
            quiet: false,
            verify: true,
            baud_rate: 115_200,
            discovery_timeout: Duration::from_secs(10),
            tail: TailSettings {
                enabled: false,
                append: None,
                inactivity: Duration::from_secs(0),
                reopen: false,
                pass: None,
                fail: None,
                stop: None,
            },
            _private_use_builder: (),
        }
    )
}

#[test]
fn board_and_port() {
    let settings = SettingsBuilder::new()
        .board("uno")
        .port("/dev/ttyUSB0")
        .finalize();
    assert_eq!(settings.board, "uno");
    assert_eq!(settings.port.unwrap(), "/dev/ttyUSB0");
}

#[test]
fn binary_and_tools() {
    let settings = SettingsBuilder::new()
        .binary("build/blink.bin")
        .tools("/opt/flasher/tools")
        .finalize();
    assert_eq!(settings.binary.unwrap(), PathBuf::from("build/blink.bin"));
    assert_eq!(settings.tools.unwrap(), PathBuf::from("/opt/flasher/tools"));
}

#[test]
fn upload_flags() {
    let settings = SettingsBuilder::new()
        .skip_touch(true)
        .quiet(true)
        .verify(false)
        .flash_offset(0x4000)
        .finalize();
    assert!(settings.skip_touch);
    assert!(settings.quiet);
    assert!(!settings.verify);
    assert_eq!(settings.flash_offset, 0x4000);
}

#[test]
fn tail() {
    let settings = SettingsBuilder::new()
        .tail(true)
        .tail_append("console.log")
        .tail_inactivity(Duration::from_secs(5))
        .tail_reopen(true)
        .tail_pass("PASS")
        .tail_fail("FAIL")
        .tail_stop("^bye$")
        .finalize();
    assert_eq!(
        settings.tail,
        TailSettings {
            enabled: true,
            append: Some("console.log".into()),
            inactivity: Duration::from_secs(5),
            reopen: true,
            pass: Some("PASS".into()),
            fail: Some("FAIL".into()),
            stop: Some("^bye$".into()),
        }
    );
}
