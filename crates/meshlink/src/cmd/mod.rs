use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgGroup, Args, Subcommand};
use meshlink_session::{ChannelSink, DeviceSession, SessionConfig, SessionEvent};
use meshlink_transport::{BleParams, ConnectParams, Link, SerialParams, TcpParams};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::exit::{io_error, session_error, transport_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod channels;
pub mod monitor;
pub mod ports;
pub mod scan;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect and print session events.
    Monitor(MonitorArgs),
    /// Send one text message.
    Send(SendArgs),
    /// Print the radio's channel table.
    Channels(ChannelsArgs),
    /// List serial ports.
    Ports(PortsArgs),
    /// Scan for Bluetooth LE mesh radios.
    Scan(ScanArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Monitor(args) => monitor::run(args, format).await,
        Command::Send(args) => send::run(args, format).await,
        Command::Channels(args) => channels::run(args, format).await,
        Command::Ports(args) => ports::run(args, format),
        Command::Scan(args) => scan::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

/// Where the radio is and how to talk to it.
#[derive(Args, Debug)]
#[command(group(ArgGroup::new("link").required(true).args(["serial", "tcp", "ble"])))]
pub struct ConnectArgs {
    /// Serial port the radio is attached to.
    #[arg(long, value_name = "PORT", env = "MESHLINK_SERIAL")]
    pub serial: Option<String>,
    /// Serial baud rate.
    #[arg(long, default_value_t = meshlink_transport::DEFAULT_BAUD_RATE)]
    pub baud: u32,
    /// Radio reachable over TCP (host, host:port or [v6]:port).
    #[arg(long, value_name = "HOST", env = "MESHLINK_TCP")]
    pub tcp: Option<String>,
    /// Bluetooth LE address or name. Without a value, the first radio found.
    #[arg(
        long,
        value_name = "DEVICE",
        env = "MESHLINK_BLE",
        num_args = 0..=1,
        default_missing_value = ""
    )]
    pub ble: Option<String>,
    /// JSON file with session timing overrides.
    #[arg(long, value_name = "FILE", env = "MESHLINK_CONFIG")]
    pub config: Option<PathBuf>,
    /// Maximum time to wait for the radio (e.g. 90s, 500ms).
    #[arg(long, default_value = "90s")]
    pub timeout: String,
}

impl ConnectArgs {
    pub fn params(&self) -> CliResult<ConnectParams> {
        if let Some(port) = &self.serial {
            let mut params = SerialParams::new(port);
            params.baud_rate = self.baud;
            return Ok(ConnectParams::Serial(params));
        }
        if let Some(target) = &self.tcp {
            let params =
                TcpParams::parse(target).map_err(|err| transport_error("invalid --tcp", err))?;
            return Ok(ConnectParams::Tcp(params));
        }
        if let Some(target) = &self.ble {
            return Ok(ConnectParams::Ble(BleParams::new(target.trim())));
        }
        Err(CliError::new(USAGE, "one of --serial, --tcp or --ble is required"))
    }

    pub fn session_config(&self) -> CliResult<SessionConfig> {
        match &self.config {
            Some(path) => SessionConfig::load(path)
                .map_err(|err| io_error(&format!("failed reading {}", path.display()), err)),
            None => Ok(SessionConfig::default()),
        }
    }

    pub fn timeout(&self) -> CliResult<Duration> {
        parse_duration(&self.timeout)
    }

    /// Build a session whose events land in the returned receiver, and
    /// start connecting it.
    pub async fn open(
        &self,
    ) -> CliResult<(DeviceSession<Link>, UnboundedReceiver<SessionEvent>)> {
        let params = self.params()?;
        let config = self.session_config()?;
        let target = params.target();
        let (sink, events) = ChannelSink::new();
        let session = DeviceSession::for_params(params, config, sink)
            .map_err(|err| session_error("connect failed", err))?;
        tracing::info!(%target, "connecting");
        session
            .connect()
            .await
            .map_err(|err| session_error("connect failed", err))?;
        Ok((session, events))
    }
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Exit after printing N events.
    #[arg(long)]
    pub count: Option<usize>,
    /// Include packet counter updates.
    #[arg(long)]
    pub packets: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Message text.
    pub text: String,
    /// Destination node (!aabbccdd, 0x-hex or decimal). Default: broadcast.
    #[arg(long)]
    pub to: Option<String>,
    /// Channel slot to send on.
    #[arg(long, short = 'c', default_value = "0")]
    pub channel: u32,
}

#[derive(Args, Debug)]
pub struct ChannelsArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug, Default)]
pub struct PortsArgs {}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// How long to listen for advertisements (e.g. 5s).
    #[arg(long, default_value = "5s")]
    pub duration: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

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

#[cfg(test)]
mod tests {
    use super::*;

    fn connect_args(serial: Option<&str>, tcp: Option<&str>, ble: Option<&str>) -> ConnectArgs {
        ConnectArgs {
            serial: serial.map(Into::into),
            baud: 9600,
            tcp: tcp.map(Into::into),
            ble: ble.map(Into::into),
            config: None,
            timeout: "90s".into(),
        }
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn serial_params_carry_baud() {
        let params = connect_args(Some("/dev/ttyACM0"), None, None)
            .params()
            .expect("serial params should build");
        match params {
            ConnectParams::Serial(serial) => {
                assert_eq!(serial.port, "/dev/ttyACM0");
                assert_eq!(serial.baud_rate, 9600);
            }
            other => panic!("unexpected params: {other:?}"),
        }
    }

    #[test]
    fn tcp_target_is_parsed() {
        let params = connect_args(None, Some("radio.local:4000"), None)
            .params()
            .expect("tcp params should build");
        assert_eq!(params.target(), "radio.local:4000");

        let err = connect_args(None, Some("radio.local:x"), None)
            .params()
            .expect_err("bad port should fail");
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn empty_ble_target_picks_first_device() {
        let params = connect_args(None, None, Some(""))
            .params()
            .expect("ble params should build");
        assert_eq!(params.target(), "first mesh device");
    }

    #[test]
    fn missing_config_file_is_reported() {
        let mut args = connect_args(Some("/dev/ttyUSB0"), None, None);
        args.config = Some(PathBuf::from("/nonexistent/meshlink.json"));
        let err = args.session_config().expect_err("missing file should fail");
        assert!(err.message.contains("/nonexistent/meshlink.json"));
    }
}
