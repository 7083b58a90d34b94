//! Keyboard RGB CLI tool
//!
//! Controls the lighting of 320f:5055 USB HID keyboards. The color output
//! report was reverse engineered from USB captures of the vendor software, see
//! the `report` module for its layout.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use clap::{crate_description, crate_name, crate_version, Arg, ArgAction, ArgMatches, Command};
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::color::ColorCommand;
use crate::control::{AttributeTable, ColorAttribute};
use crate::driver::DRIVERS;
use crate::hid::HidBus;
use crate::registry::Registry;
use crate::report::Report;
use crate::session::{negotiate, SessionState};
use crate::transport::{Bus, DeviceInfo};

mod color;
mod control;
mod descriptor;
mod driver;
mod errno;
mod hid;
mod ids;
mod registry;
mod report;
mod session;
mod transport;

/// New color config.
struct Config {
    color: ColorCommand,
    device: Option<String>,
    dry_run: bool,
    interactive: bool,
}

impl Config {
    fn from_cli(matches: &ArgMatches) -> Result<Self, Box<dyn Error>> {
        // Determine if the color needs to be read from STDIN.
        let interactive = !matches.contains_id("color");

        Ok(Self {
            color: required_color(matches)?,
            device: matches.get_one::<String>("device").cloned(),
            dry_run: matches.get_flag("dry-run"),
            interactive,
        })
    }
}

impl Display for Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} \\\n  --color {}", crate_name!(), self.color)?;

        if let Some(device) = &self.device {
            write!(f, " \\\n  --device {}", device)?;
        }

        Ok(())
    }
}

fn main() -> ExitCode {
    let cli = cli();

    // Global arguments are propagated to the subcommand.
    let (subcommand, matches) = match cli.subcommand() {
        Some((name, matches)) => (Some(name), matches),
        None => (None, &cli),
    };

    init_logging(matches.get_count("verbose"));

    let result = match subcommand {
        Some("list") => list(matches),
        Some("daemon") => daemon(matches),
        _ => kbdrgb(matches),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("\x1b[31mError:\x1b[0m {err}");
            ExitCode::FAILURE
        },
    }
}

/// Install the log subscriber.
///
/// `RUST_LOG` takes precedence over the verbosity flags.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}={}", crate_name!(), level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(io::stderr))
        .init();
}

/// Registry with all known drivers loaded.
fn new_registry(host: Arc<AttributeTable>) -> Registry {
    let mut registry = Registry::new(host);
    for driver in DRIVERS {
        registry.register(*driver);
    }
    registry
}

/// Devices on the bus, optionally restricted to a single path.
fn present_devices(
    bus: &mut HidBus,
    filter: Option<&String>,
) -> Result<Vec<DeviceInfo>, Box<dyn Error>> {
    let mut devices = bus.devices().map_err(|err| format!("unable to enumerate devices: {err}"))?;

    if let Some(path) = filter {
        devices.retain(|device| &device.path == path);
    }

    Ok(devices)
}

/// Apply a color once to every connected keyboard.
fn kbdrgb(matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let config = Config::from_cli(matches)?;

    // Print CLI example to skip manual configuration.
    if config.interactive {
        println!("To reapply this color, you can run the following command:\n\n{}\n", config);
    }

    // Show the output report without touching any device.
    if config.dry_run {
        println!("{:?}", Report::encode(config.color));
        return Ok(());
    }

    let mut bus = HidBus::new().map_err(|err| format!("unable to access HID: {err}"))?;
    let devices = present_devices(&mut bus, config.device.as_ref())?;

    let host = Arc::new(AttributeTable::new());
    let mut registry = new_registry(host.clone());

    let mut errors = Vec::new();
    for device in &devices {
        if let Err(err) = registry.device_added(device, &bus) {
            errors.push(err.to_string());
        }
    }

    for session in registry.sessions().filter(|session| !session.is_controllable()) {
        errors.push(format!("{} has no {} attribute", session.name(), ColorAttribute::NAME));
    }

    let payload = config.color.to_string();
    let mut applied = 0;
    for (path, status) in host.store_all(payload.as_bytes()) {
        let name = registry.session(&path).map_or("unknown device", |session| session.name());
        if status < 0 {
            let attribute = ColorAttribute::NAME;
            errors.push(format!("unable to write {attribute} of {name}: {}", describe(status)));
        } else {
            println!("{name} ({path}): {payload}");
            applied += 1;
        }
    }

    for err in &errors {
        info!("{err}");
    }

    match applied {
        0 if errors.is_empty() => Err("no supported keyboard found".into()),
        0 => Err(errors.join("\n").into()),
        _ => {
            println!("\x1b[32mSuccessfully applied changes.\x1b[0m");
            Ok(())
        },
    }
}

/// Print all supported keyboards.
fn list(matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let mut bus = HidBus::new().map_err(|err| format!("unable to access HID: {err}"))?;
    let devices = present_devices(&mut bus, matches.get_one::<String>("device"))?;

    let mut found = false;
    for device in &devices {
        let driver = match DRIVERS.iter().find(|driver| driver.matches(device)) {
            Some(driver) => *driver,
            None => continue,
        };
        found = true;

        let status = match bus.open(device) {
            Ok(mut transport) => match negotiate(transport.as_mut(), driver) {
                Ok(caps) => format!("\x1b[32mcolor control supported\x1b[0m, {caps}"),
                Err(err) => err.to_string(),
            },
            Err(err) => format!("unable to open device: {err} (root permissions required)"),
        };

        println!("{device}\n  {status}");
    }

    if !found {
        println!("No supported keyboard found.");
    }

    Ok(())
}

/// Apply colors read line by line from STDIN.
///
/// Lines are either `R,G,B` for all keyboards or `PATH=R,G,B` for a single
/// one. The bus is rescanned before every color, so keyboards can be plugged
/// in and out while the daemon is running.
fn daemon(matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let filter = matches.get_one::<String>("device");
    let mut bus = HidBus::new().map_err(|err| format!("unable to access HID: {err}"))?;

    let host = Arc::new(AttributeTable::new());
    let mut registry = new_registry(host.clone());

    info!("reading colors from STDIN (format: [PATH=]R,G,B)");

    for line in io::stdin().lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let present = present_devices(&mut bus, filter)?;
        registry.sync(&present, &bus);

        let active = registry.sessions().filter(|session| session.state() == SessionState::Active);
        debug!(active = active.count(), "bus rescanned");

        if host.paths().is_empty() {
            eprintln!("\x1b[31mNo keyboard connected.\x1b[0m");
            continue;
        }

        let results = match line.split_once('=') {
            Some((path, payload)) => match host.store(path, payload.as_bytes()) {
                Some(status) => vec![(path.to_owned(), status)],
                None => {
                    eprintln!("\x1b[31m{path}:\x1b[0m {}", describe(-(errno::ENODEV as isize)));
                    continue;
                },
            },
            None => host.store_all(line.as_bytes()),
        };

        for (path, status) in results {
            if status < 0 {
                eprintln!("\x1b[31m{path}:\x1b[0m {}", describe(status));
            } else {
                println!("{path}: {line}");
            }
        }
    }

    Ok(())
}

fn describe(status: isize) -> String {
    errno::describe(i32::try_from(status).unwrap_or(-errno::EIO))
}

/// Get clap CLI parameters.
fn cli() -> ArgMatches {
    Command::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .subcommand(Command::new("list").about("List connected keyboards"))
        .subcommand(Command::new("daemon").about("Apply R,G,B colors read from STDIN"))
        .arg(Arg::new("color").help("LED color [R,G,B]").long("color").short('c'))
        .arg(
            Arg::new("dry-run")
                .help("Print the output report instead of sending it")
                .long("dry-run")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("device")
                .help("Only use the keyboard at this HID path")
                .long("device")
                .short('d')
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .help("Increase log verbosity")
                .long("verbose")
                .short('v')
                .action(ArgAction::Count)
                .global(true),
        )
        .get_matches()
}

/// Read the color option from CLI or prompt for STDIN if not present.
fn required_color<T: FromStr>(matches: &ArgMatches) -> Result<T, Box<dyn Error>> {
    match matches.get_one::<String>("color").map(|value| T::from_str(value)) {
        Some(Ok(value)) => return Ok(value),
        Some(Err(_)) => eprintln!("\x1b[31mInvalid CLI color parameter.\x1b[0m\n"),
        _ => (),
    }

    prompt_color(&mut io::stdin().lock())
}

/// Query the user until a valid color is entered.
fn prompt_color<T: FromStr>(input: &mut impl BufRead) -> Result<T, Box<dyn Error>> {
    loop {
        print!("Please select a color (format: R,G,B):\n > ");
        let _ = io::stdout().flush();

        let line = next_line(input).ok_or("no color provided on STDIN")?;

        match T::from_str(&line) {
            Ok(value) => {
                println!();
                break Ok(value);
            },
            Err(_) => eprintln!(
                "\x1b[31mColor '{}' does not match format R,G,B, please try again.\x1b[0m\n",
                line
            ),
        }
    }
}

/// Read the next trimmed line.
///
/// Returns `None` once the input is closed or unreadable.
#[inline]
fn next_line(input: &mut impl BufRead) -> Option<String> {
    let mut line = String::new();

    match input.read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_prints_reusable_command() {
        let config = Config {
            color: ColorCommand::new(255, 128, 0),
            device: Some(String::from("/dev/hidraw3")),
            dry_run: false,
            interactive: true,
        };

        let expected = "kbdrgb \\\n  --color 255,128,0 \\\n  --device /dev/hidraw3";
        assert_eq!(config.to_string(), expected);
    }

    #[test]
    fn config_without_device() {
        let config = Config {
            color: ColorCommand::default(),
            device: None,
            dry_run: true,
            interactive: false,
        };
        assert_eq!(config.to_string(), "kbdrgb \\\n  --color 0,0,0");
    }

    #[test]
    fn prompt_retries_until_valid() {
        let mut input = &b"red\n 1,2,3 \n"[..];
        let color: ColorCommand = prompt_color(&mut input).unwrap();
        assert_eq!(color, ColorCommand::new(1, 2, 3));
    }

    #[test]
    fn prompt_stops_at_end_of_input() {
        let mut input = &b""[..];
        assert!(prompt_color::<ColorCommand>(&mut input).is_err());

        let mut input = &b"red\n"[..];
        assert!(prompt_color::<ColorCommand>(&mut input).is_err());
    }

    #[test]
    fn out_of_range_status_is_io_failure() {
        assert_eq!(describe(-(errno::ENODEV as isize)), "device not present");
        assert_eq!(describe(isize::MIN), "I/O failure");
    }
}
