use clap::{Args, Subcommand, ValueEnum};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use hostbus_bus::WireProtocol;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod monitor;
pub mod probe_port;
pub mod send;
pub mod serve;
pub mod spawn;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a demo host on the network bus.
    Serve(ServeArgs),
    /// Call one function on a running bus.
    Send(SendArgs),
    /// Connect to a bus and print every message.
    Monitor(MonitorArgs),
    /// Launch a renderer helper and print its events.
    Spawn(SpawnArgs),
    /// Find the first free port at or above a base.
    ProbePort(ProbePortArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Monitor(args) => monitor::run(args, format),
        Command::Spawn(args) => spawn::run(args, format),
        Command::ProbePort(args) => probe_port::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
pub enum ProtocolArg {
    /// JSON arrays in text frames.
    #[default]
    Json,
    /// Variant codec in binary frames.
    Binary,
}

impl From<ProtocolArg> for WireProtocol {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Json => WireProtocol::Json,
            ProtocolArg::Binary => WireProtocol::Binary,
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1", env = "HOSTBUS_BIND")]
    pub bind: IpAddr,
    /// Fixed port (0 lets the OS choose).
    #[arg(long, conflicts_with = "probe_from", env = "HOSTBUS_PORT")]
    pub port: Option<u16>,
    /// Probe for a free port starting here.
    #[arg(long, value_name = "PORT")]
    pub probe_from: Option<u16>,
    /// Encoding for outbound messages.
    #[arg(long, value_enum, default_value_t = ProtocolArg::Json)]
    pub protocol: ProtocolArg,
    /// Number of demo parameters.
    #[arg(long, default_value = "4")]
    pub parameters: u32,
    /// JSON file holding host state, including the remembered port.
    #[arg(long, value_name = "FILE")]
    pub state_file: Option<PathBuf>,
    /// Renderer helper to attach as the local view.
    #[arg(long, value_name = "PATH")]
    pub renderer: Option<PathBuf>,
    /// Page the local renderer opens. Default: the bus's loopback URL.
    #[arg(long, requires = "renderer")]
    pub url: Option<String>,
    /// Exit after this long (e.g. 5s, 500ms). Default: run until Ctrl-C.
    #[arg(long)]
    pub duration: Option<String>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Bus address, e.g. 127.0.0.1:49152.
    pub addr: SocketAddr,
    /// Function name.
    pub function: String,
    /// Arguments. JSON scalars (`1`, `true`, `null`, `"x"`) keep their type;
    /// anything else is sent as a string.
    pub args: Vec<String>,
    /// Send the variant codec in a binary frame instead of JSON text.
    #[arg(long)]
    pub binary: bool,
    /// Wait for a message with this name and print it.
    #[arg(long, value_name = "NAME")]
    pub wait: Option<String>,
    /// Maximum time to wait when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Bus address, e.g. 127.0.0.1:49152.
    pub addr: SocketAddr,
    /// Only print these functions (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub functions: Option<Vec<String>>,
    /// Exit after printing N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// User agent announced to the bus.
    #[arg(long, default_value = "hostbus-monitor")]
    pub user_agent: String,
}

#[derive(Args, Debug)]
pub struct SpawnArgs {
    /// Renderer helper executable.
    pub helper: PathBuf,
    /// Extra arguments after the two descriptor numbers.
    #[arg(long = "arg", value_name = "ARG")]
    pub extra_args: Vec<String>,
    /// Page to open once connected.
    #[arg(long, default_value = "about:blank")]
    pub url: String,
    /// Script to run after navigating.
    #[arg(long)]
    pub script: Option<String>,
    /// Handshake timeout (e.g. 3s, 500ms).
    #[arg(long, default_value = "3s")]
    pub handshake_timeout: String,
    /// Exit after this long. Default: run until the renderer exits or Ctrl-C.
    #[arg(long)]
    pub duration: Option<String>,
}

#[derive(Args, Debug)]
pub struct ProbePortArgs {
    /// Address to probe on.
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: IpAddr,
    /// First port to try.
    #[arg(long, default_value_t = hostbus_net::FIRST_PORT)]
    pub first: u16,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `5s`, `150ms` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

pub fn parse_optional_duration(input: Option<&str>) -> CliResult<Option<Duration>> {
    input.map(parse_duration).transpose()
}

/// Ctrl-C flips the returned flag to false.
pub fn install_ctrlc_handler() -> CliResult<std::sync::Arc<std::sync::atomic::AtomicBool>> {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })?;
    Ok(running)
}
