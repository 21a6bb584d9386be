use std::time::Duration;

use crate::error::{Result, TransportError};
use crate::traits::TransportKind;

/// Serial console speed of stock mesh firmware.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// TCP port the firmware's API server listens on.
pub const DEFAULT_TCP_PORT: u16 = 4403;

/// Blocking read timeout for byte-stream readers. Timeouts are idle ticks.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Pause after each byte-stream write so the device's input buffer keeps up.
pub const DEFAULT_WRITE_PACING: Duration = Duration::from_millis(100);

/// Serial/USB link parameters. Framing is always 8N1 without flow control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialParams {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub write_pacing: Duration,
}

impl SerialParams {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_pacing: DEFAULT_WRITE_PACING,
        }
    }
}

/// TCP/Wi-Fi link parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpParams {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_pacing: Duration,
}

impl TcpParams {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(5),
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_pacing: DEFAULT_WRITE_PACING,
        }
    }

    /// Parse `host`, `host:port` or `[v6]:port`.
    pub fn parse(target: &str) -> Result<Self> {
        let target = target.trim();
        if target.is_empty() {
            return Err(TransportError::InvalidParams("empty tcp host".into()));
        }

        if let Some(rest) = target.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| {
                TransportError::InvalidParams(format!("unterminated IPv6 literal: {target}"))
            })?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port)?,
                None if tail.is_empty() => DEFAULT_TCP_PORT,
                None => {
                    return Err(TransportError::InvalidParams(format!(
                        "unexpected text after IPv6 literal: {target}"
                    )))
                }
            };
            return Ok(Self::new(host, port));
        }

        match target.split_once(':') {
            Some((host, port)) if !port.contains(':') => Ok(Self::new(host, parse_port(port)?)),
            // No port, or a bare IPv6 address without brackets.
            _ => Ok(Self::new(target, DEFAULT_TCP_PORT)),
        }
    }

    pub fn endpoint(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn parse_port(port: &str) -> Result<u16> {
    port.parse()
        .map_err(|_| TransportError::InvalidParams(format!("invalid tcp port: {port}")))
}

/// Bluetooth LE link parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BleParams {
    /// Device address (`AA:BB:CC:DD:EE:FF`) or advertised name. Empty picks
    /// the first device advertising the mesh service.
    pub target: String,
    pub scan_timeout: Duration,
    /// Interval between FromRadio polls while the mailbox is empty.
    pub poll_interval: Duration,
    /// Upper bound on reads in one drain after a write or FromNum notification.
    pub max_drain_reads: usize,
}

impl BleParams {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            scan_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(5),
            max_drain_reads: 64,
        }
    }
}

/// Parameters for whichever link the caller picked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectParams {
    Serial(SerialParams),
    Tcp(TcpParams),
    Ble(BleParams),
}

impl ConnectParams {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Serial(_) => TransportKind::Serial,
            Self::Tcp(_) => TransportKind::Tcp,
            Self::Ble(_) => TransportKind::Ble,
        }
    }

    /// Where the link points, for logs and errors.
    pub fn target(&self) -> String {
        match self {
            Self::Serial(params) => params.port.clone(),
            Self::Tcp(params) => params.endpoint(),
            Self::Ble(params) if params.target.is_empty() => "first mesh device".to_string(),
            Self::Ble(params) => params.target.clone(),
        }
    }
}
