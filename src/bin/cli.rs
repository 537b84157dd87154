//! Flasher command line interface.

use std::{
    env, fs,
    path::{Path, PathBuf},
    process, thread,
    time::Duration,
};

use clap::{
    crate_authors, crate_description, crate_name, crate_version, App, AppSettings::*, Arg,
    ArgMatches,
};
use console::style;
use log::{debug, info, trace, LevelFilter};
use simplelog::*;

use flasher::{
    self as fl,
    monitor::Monitor,
    upload::{self, Host, UploadContext},
    PortRegistry, PropertyTree, Settings, ShellRunner, SystemBackend,
};

/// Exit code for command line usage errors.
const USAGE_ERROR: i32 = 2;

/// Exit code for any other fatal error.
const FATAL_ERROR: i32 = 1;

fn main() {
    ctrlc::set_handler(move || {
        println!("🛑 received Ctrl+C!");
        process::exit(0);
    })
    .expect("Failed to install my Ctrl-C handler!");

    let app = app();
    let matches = app.clone().get_matches();

    // Vary the output based on how many times the user used the "verbose" flag
    // (i.e. 'flasher -v -v -v' or 'flasher -vvv' vs 'flasher -v'
    let log_level = match matches.occurrences_of("v") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .is_err()
    {
        eprintln!("unable to initialize logging");
    }

    trace!("{:#?}", matches);

    if !matches.is_present("BINARY") && !matches.is_present("TAIL") {
        let _ = app.clone().print_help();
        println!();
        process::exit(USAGE_ERROR);
    }

    let settings = settings(&matches);
    let exit_code = match run(settings) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {}", style("error").red(), e);
            FATAL_ERROR
        }
    };
    debug!("exit code: {}", exit_code);
    process::exit(exit_code);
}

fn app() -> App<'static, 'static> {
    App::new(crate_name!())
        .version(crate_version!())
        .author(crate_authors!())
        .about(crate_description!())
        .long_about(
            "\n\
            Flasher uploads a firmware binary to a board attached over a \
            serial port, using the upload tool described for the board in \
            the `boards.txt` and `platform.txt` files of the tools directory.\n\
            \n\
            When no port is given, flasher waits for a new serial port to \
            show up and uses it. Boards asking for it are reset into their \
            bootloader by opening their port at 1200 baud before the upload.\n\
            \n\
            With `--tail`, the board console is printed after the upload. \
            The pass, fail and stop patterns end tailing with exit codes 0, 2 \
            and 0 respectively.\
        ",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .arg(
            Arg::with_name("BOARD")
                .help("board to upload to")
                .long("board")
                .takes_value(true)
                .default_value("adafruit_feather_m0"),
        )
        .arg(
            Arg::with_name("PORT")
                .help("serial port to upload to")
                .long_help(
                    "serial port to upload to; when not set, flasher waits \
                     for a new port to show up.",
                )
                .short("p")
                .long("port")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("BINARY")
                .help("path to the binary to upload")
                .long("binary")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("TOOLS")
                .help("path to the tools directory")
                .long("tools")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("SKIP_TOUCH")
                .help("skip the 1200bps touch")
                .long("skip-touch"),
        )
        .arg(
            Arg::with_name("FLASH_OFFSET")
                .help("flash offset to flash the program at")
                .long("flash-offset")
                .takes_value(true)
                .default_value("8192"),
        )
        .arg(
            Arg::with_name("QUIET")
                .help("ask the upload tool to be quiet")
                .short("q")
                .long("quiet"),
        )
        .arg(
            Arg::with_name("NO_VERIFY")
                .help("do not ask the upload tool to verify the upload")
                .long("no-verify"),
        )
        .arg(
            Arg::with_name("BAUD_RATE")
                .help("serial console baud rate")
                .short("b")
                .long("baud-rate")
                .takes_value(true)
                .default_value("115200"),
        )
        .arg(
            Arg::with_name("TAIL")
                .help("show the serial console")
                .long("tail"),
        )
        .arg(
            Arg::with_name("APPEND")
                .help("append the serial console to a file")
                .long("append")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("TAIL_INACTIVITY")
                .help("seconds without output until tailing stops, 0 to never stop")
                .long("tail-inactivity")
                .takes_value(true)
                .default_value("0"),
        )
        .arg(
            Arg::with_name("TAIL_REOPEN")
                .help("tail again after inactivity or port loss")
                .long("tail-reopen"),
        )
        .arg(
            Arg::with_name("TAIL_PASS")
                .help("stop tailing with exit code 0 when the output matches")
                .long("tail-pass")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("TAIL_FAIL")
                .help("stop tailing with exit code 2 when the output matches")
                .long("tail-fail")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("TAIL_STOP")
                .help("stop tailing with exit code 0 when the output matches")
                .long("tail-stop")
                .takes_value(true),
        )
        .arg(Arg::with_name("v").short("v").multiple(true).help(
            "Sets the logging level of verbosity, repeat several times for \
                higher verbosity",
        ))
}

fn settings(matches: &ArgMatches) -> Settings {
    // It's safe to call unwrap on all command line arguments with default
    // values, because the value with either be what the user input at runtime
    // or the default value
    let flash_offset = numeric(matches, "FLASH_OFFSET", "flash-offset");
    let baud_rate = numeric(matches, "BAUD_RATE", "baud-rate");
    let inactivity = numeric(matches, "TAIL_INACTIVITY", "tail-inactivity");

    let mut builder = fl::SettingsBuilder::new()
        .board(matches.value_of("BOARD").unwrap())
        .skip_touch(matches.is_present("SKIP_TOUCH"))
        .flash_offset(flash_offset)
        .quiet(matches.is_present("QUIET"))
        .verify(!matches.is_present("NO_VERIFY"))
        .baud_rate(baud_rate)
        .tail(matches.is_present("TAIL"))
        .tail_inactivity(Duration::from_secs(inactivity.into()))
        .tail_reopen(matches.is_present("TAIL_REOPEN"));

    if let Some(port) = matches.value_of("PORT") {
        builder = builder.port(port);
    }
    if let Some(binary) = matches.value_of("BINARY") {
        builder = builder.binary(binary);
    }
    if let Some(tools) = matches.value_of("TOOLS") {
        builder = builder.tools(tools);
    }
    if let Some(path) = matches.value_of("APPEND") {
        builder = builder.tail_append(path);
    }
    if let Some(pattern) = matches.value_of("TAIL_PASS") {
        builder = builder.tail_pass(pattern);
    }
    if let Some(pattern) = matches.value_of("TAIL_FAIL") {
        builder = builder.tail_fail(pattern);
    }
    if let Some(pattern) = matches.value_of("TAIL_STOP") {
        builder = builder.tail_stop(pattern);
    }

    builder.finalize()
}

/// Parse a numeric argument, in decimal or `0x` prefixed hexadecimal, or exit
/// with a usage error.
fn numeric(matches: &ArgMatches, name: &str, flag: &str) -> u32 {
    let value = matches.value_of(name).unwrap_or_default();
    let parsed = match value.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.unwrap_or_else(|_| {
        println!(
            "{}: `{}` needs to be a numeric value",
            style("error").red(),
            style(flag).cyan()
        );
        println!(
            "   {} `{}` is not a valid value",
            style("-->").cyan(),
            style(value).on_red()
        );
        process::exit(USAGE_ERROR);
    })
}

/// Upload, then tail if asked to, returning the exit code.
fn run(mut settings: Settings) -> fl::Result<i32> {
    let mut registry = PortRegistry::new(Box::new(SystemBackend))?;

    if let Some(binary) = settings.binary.clone() {
        if !binary.exists() {
            return Err(fl::Error::Binary(binary));
        }

        let tools = search_for_tools(settings.tools.as_deref())?;
        let boards = PropertyTree::load(tools.join("boards.txt"))?;
        let platform = PropertyTree::load(tools.join("platform.txt"))?;
        settings.tools = Some(tools);

        let given_port = settings.port.clone();
        settings.port = given_port.map(|port| match fs::canonicalize(&port) {
            Ok(path) => path.display().to_string(),
            Err(e) => {
                debug!("unable to resolve {}: {}", port, e);
                port
            }
        });

        let uploaded = upload::factory(UploadContext {
            boards: &boards,
            platform: &platform,
            settings: &settings,
            binary: &binary,
            host: Host::current(),
            registry: &mut registry,
            runner: &mut ShellRunner,
        })
        .run()?;

        // Without a given port, keep tailing the one the upload found.
        if settings.port.is_none() {
            settings.port = Some(uploaded.port);
        }
    }

    if !settings.tail.enabled {
        return Ok(0);
    }

    thread::sleep(Duration::from_millis(500));
    let port = settings.port.clone().unwrap_or_default();
    let outcome = Monitor::new(&mut registry, port, &settings)?.run()?;
    info!("tail ended: {:?}", outcome.reason);
    Ok(outcome.exit_code)
}

/// Use the given tools directory, or the first existing one among the usual
/// places.
fn search_for_tools(tools: Option<&Path>) -> fl::Result<PathBuf> {
    if let Some(tools) = tools {
        return Ok(tools.to_path_buf());
    }

    let mut candidates = Vec::new();
    if let Some(dir) = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        candidates.push(dir.join("tools"));
        if let Some(parent) = dir.parent() {
            candidates.push(parent.join("lib").join("flasher"));
        }
    }
    candidates.push(PathBuf::from("./tools"));

    match candidates.iter().find(|p| p.exists()) {
        Some(found) => {
            info!("Using tools in {}", found.display());
            Ok(found.clone())
        }
        None => Err(fl::Error::ToolsNotFound(candidates)),
    }
}
