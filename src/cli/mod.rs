//! CLI argument parsing and validation module
//!
//! Handles command-line interface using clap, including:
//! - `watch`: poll the observer and print captured writes
//! - `notify`: deliver a value write, as a hook adapter would
//! - `daemon`: run, start, stop, query and reload the observer daemon

use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use crate::codec::HEADER_SIZE;
use crate::constants::{
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_READ_BUFFER, MAX_READ_CAPACITY, POLL_INTERVAL_MAX_MS, POLL_INTERVAL_MIN_MS,
};
use crate::daemon::config::DaemonConfiguration;
use crate::models::{ModelError, SetValueNotification, ValueType, WatchConfig};

/// Parsed command line
#[derive(Debug)]
pub enum CliCommand {
    Watch(WatchConfig),
    Notify {
        socket_path: PathBuf,
        notification: SetValueNotification,
    },
    Daemon(DaemonCommand),
}

#[derive(Debug, PartialEq, Eq)]
pub enum DaemonCommand {
    /// Run in the foreground (also used by the spawned child)
    Run { config: Option<PathBuf> },
    /// Spawn a background daemon and wait for it to become ready
    Start { config: Option<PathBuf> },
    Stop,
    Status { socket_path: PathBuf },
    Reload { socket_path: PathBuf },
}

fn version() -> &'static str {
    concat!(env!("REGMON_VERSION"), " (", env!("GIT_HASH"), ")")
}

fn socket_arg() -> Arg {
    Arg::new("socket")
        .short('s')
        .long("socket")
        .value_name("PATH")
        .value_parser(clap::value_parser!(PathBuf))
        .help("Daemon socket path (default: from the daemon configuration)")
}

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .value_parser(clap::value_parser!(PathBuf))
        .help("Daemon configuration file (TOML)")
}

/// Build the clap command tree
pub fn build_cli() -> Command {
    Command::new("regmon")
        .version(version())
        .about("Monitor registry value writes under a protected subtree")
        .long_about(
            "Captures completed registry value writes below a protected key and serves them to a \
             polling consumer as fixed-layout binary records.",
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("watch")
                .about("Poll the observer and print captured registry writes")
                .arg(socket_arg())
                .arg(
                    Arg::new("interval")
                        .short('i')
                        .long("interval")
                        .value_name("MS")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("200")
                        .help("Milliseconds between reads (10-60000)"),
                )
                .arg(
                    Arg::new("buffer-size")
                        .short('b')
                        .long("buffer-size")
                        .value_name("BYTES")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("65536")
                        .help("Bytes offered on each read"),
                )
                .arg(
                    Arg::new("json")
                        .short('j')
                        .long("json")
                        .help("Output one JSON object per event")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("notify")
                .about("Deliver a completed value write to the observer")
                .arg(socket_arg())
                .arg(
                    Arg::new("key")
                        .short('k')
                        .long("key")
                        .value_name("PATH")
                        .required(true)
                        .help("Full key path, e.g. \\REGISTRY\\MACHINE\\SOFTWARE\\Vendor"),
                )
                .arg(
                    Arg::new("value")
                        .short('v')
                        .long("value")
                        .value_name("NAME")
                        .required(true)
                        .help("Value name"),
                )
                .arg(
                    Arg::new("type")
                        .short('t')
                        .long("type")
                        .value_name("TYPE")
                        .default_value("sz")
                        .help("Value type: none, sz, expand-sz, binary, dword, dword-big-endian, link, multi-sz, qword"),
                )
                .arg(
                    Arg::new("data")
                        .short('d')
                        .long("data")
                        .value_name("DATA")
                        .default_value("")
                        .allow_hyphen_values(true)
                        .help("Value data: text for string types (';' separates multi-sz), number for dword/qword, hex for binary"),
                )
                .arg(
                    Arg::new("data-size")
                        .long("data-size")
                        .value_name("BYTES")
                        .value_parser(clap::value_parser!(u32))
                        .help("Declared data size (default: encoded length)"),
                )
                .arg(
                    Arg::new("pid")
                        .long("pid")
                        .value_name("PID")
                        .value_parser(clap::value_parser!(u32))
                        .help("Writing process id (default: this process)"),
                )
                .arg(
                    Arg::new("tid")
                        .long("tid")
                        .value_name("TID")
                        .value_parser(clap::value_parser!(u32))
                        .default_value("0")
                        .help("Writing thread id"),
                )
                .arg(
                    Arg::new("status")
                        .long("status")
                        .value_name("STATUS")
                        .value_parser(clap::value_parser!(i32))
                        .allow_negative_numbers(true)
                        .default_value("0")
                        .help("Operation status; negative values are failed writes and are not captured"),
                ),
        )
        .subcommand(
            Command::new("daemon")
                .about("Manage the observer daemon")
                .subcommand_required(true)
                .subcommand(
                    Command::new("run")
                        .about("Run the daemon in the foreground")
                        .arg(config_arg()),
                )
                .subcommand(
                    Command::new("start")
                        .about("Start the daemon in the background")
                        .arg(config_arg()),
                )
                .subcommand(Command::new("stop").about("Stop running daemons"))
                .subcommand(
                    Command::new("status")
                        .about("Show daemon status and statistics")
                        .arg(socket_arg())
                        .arg(config_arg()),
                )
                .subcommand(
                    Command::new("reload")
                        .about("Reload the daemon configuration file")
                        .arg(socket_arg())
                        .arg(config_arg()),
                ),
        )
}

/// Parse command line arguments and return the command to run
pub fn parse_args() -> Result<CliCommand> {
    parse_matches(&build_cli().get_matches())
}

/// Parse an explicit argument list
pub fn parse_from<I, T>(args: I) -> Result<CliCommand>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = build_cli().try_get_matches_from(args)?;
    parse_matches(&matches)
}

fn parse_matches(matches: &ArgMatches) -> Result<CliCommand> {
    match matches.subcommand() {
        Some(("watch", sub)) => {
            let interval = validate_interval(*sub.get_one::<u64>("interval").unwrap_or(&DEFAULT_POLL_INTERVAL_MS))?;
            let buffer_size = validate_buffer_size(*sub.get_one::<usize>("buffer-size").unwrap_or(&DEFAULT_READ_BUFFER))?;
            Ok(CliCommand::Watch(WatchConfig {
                socket_path: resolve_socket(sub)?,
                interval,
                buffer_size,
                output_json: sub.get_flag("json"),
            }))
        }
        Some(("notify", sub)) => {
            let key = required(sub, "key")?;
            let value_name = required(sub, "value")?;
            let value_type: ValueType = required(sub, "type")?.parse()?;
            let data = value_type.encode_text(&required(sub, "data")?)?;
            let process_id = sub.get_one::<u32>("pid").copied().unwrap_or_else(std::process::id);

            let mut notification = SetValueNotification::new(
                &key,
                &value_name,
                value_type,
                &data,
                process_id,
                sub.get_one::<u32>("tid").copied().unwrap_or(0),
            );
            notification.data_size = sub.get_one::<u32>("data-size").copied();
            notification.status = sub.get_one::<i32>("status").copied().unwrap_or(0);

            Ok(CliCommand::Notify {
                socket_path: resolve_socket(sub)?,
                notification,
            })
        }
        Some(("daemon", sub)) => parse_daemon(sub).map(CliCommand::Daemon),
        _ => Err(anyhow!("No command given. Run 'regmon --help' for usage.")),
    }
}

fn parse_daemon(matches: &ArgMatches) -> Result<DaemonCommand> {
    match matches.subcommand() {
        Some(("run", sub)) => Ok(DaemonCommand::Run {
            config: sub.get_one::<PathBuf>("config").cloned(),
        }),
        Some(("start", sub)) => Ok(DaemonCommand::Start {
            config: sub.get_one::<PathBuf>("config").cloned(),
        }),
        Some(("stop", _)) => Ok(DaemonCommand::Stop),
        Some(("status", sub)) => Ok(DaemonCommand::Status {
            socket_path: resolve_socket(sub)?,
        }),
        Some(("reload", sub)) => Ok(DaemonCommand::Reload {
            socket_path: resolve_socket(sub)?,
        }),
        _ => Err(anyhow!("No daemon command given. Run 'regmon daemon --help' for usage.")),
    }
}

fn required(matches: &ArgMatches, id: &str) -> Result<String> {
    matches
        .get_one::<String>(id)
        .cloned()
        .ok_or_else(|| anyhow!("Missing required argument --{}", id))
}

/// `--socket` wins, then the socket named by `--config` (or the default
/// configuration file), then the per-user default
fn resolve_socket(matches: &ArgMatches) -> Result<PathBuf> {
    if let Some(socket) = matches.get_one::<PathBuf>("socket") {
        return Ok(socket.clone());
    }
    let config_path = matches
        .try_get_one::<PathBuf>("config")
        .ok()
        .flatten()
        .map(PathBuf::as_path);
    Ok(DaemonConfiguration::load_or_default(config_path)?.socket_path())
}

pub fn validate_interval(ms: u64) -> Result<Duration, ModelError> {
    if !(POLL_INTERVAL_MIN_MS..=POLL_INTERVAL_MAX_MS).contains(&ms) {
        return Err(ModelError::InvalidInterval(ms));
    }
    Ok(Duration::from_millis(ms))
}

pub fn validate_buffer_size(bytes: usize) -> Result<usize, ModelError> {
    if !(HEADER_SIZE..=MAX_READ_CAPACITY).contains(&bytes) {
        return Err(ModelError::InvalidBufferSize(bytes));
    }
    Ok(bytes)
}
