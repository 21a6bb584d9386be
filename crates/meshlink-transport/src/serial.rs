use std::io::Write;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use tracing::{debug, info, trace};

use crate::error::{Result, TransportError};
use crate::params::SerialParams;
use crate::reader::{join_reader, spawn_stream_reader};
use crate::state::{lock, LinkState};
use crate::traits::{LinkListener, Transport, TransportKind};

type SharedPort = Arc<Mutex<Option<Box<dyn SerialPort>>>>;

/// Serial/USB link.
///
/// Reads happen on a dedicated thread over a cloned port handle; writes go
/// through the original handle on the blocking pool.
pub struct SerialLink {
    params: SerialParams,
    state: Arc<LinkState>,
    port: SharedPort,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SerialLink {
    pub fn new(params: SerialParams) -> Self {
        Self {
            params,
            state: LinkState::new(),
            port: Arc::new(Mutex::new(None)),
            reader: Mutex::new(None),
        }
    }

    pub fn params(&self) -> &SerialParams {
        &self.params
    }

    async fn teardown(&self) {
        self.state.begin_stop();
        let reader = lock(&self.reader).take();
        if let Some(reader) = reader {
            join_reader(reader).await;
        }
        if lock(&self.port).take().is_some() {
            debug!(port = %self.params.port, "serial port closed");
        }
    }
}

fn open_port(params: &SerialParams) -> serialport::Result<Box<dyn SerialPort>> {
    let mut port = serialport::new(&params.port, params.baud_rate)
        .data_bits(DataBits::Eight)
        .stop_bits(StopBits::One)
        .parity(Parity::None)
        .flow_control(FlowControl::None)
        .timeout(params.read_timeout)
        .open()?;

    port.write_data_terminal_ready(true)?;
    port.write_request_to_send(true)?;
    port.clear(ClearBuffer::All)?;
    Ok(port)
}

impl Transport for SerialLink {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn display_name(&self) -> String {
        self.params.port.clone()
    }

    fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    async fn connect(&self, listener: Arc<dyn LinkListener>) -> Result<()> {
        if self.state.is_connected() {
            return Err(TransportError::AlreadyConnected);
        }
        self.teardown().await;

        let target = self.params.port.clone();
        let params = self.params.clone();
        let port = tokio::task::spawn_blocking(move || open_port(&params))
            .await
            .map_err(|err| TransportError::connect_failed(&target, err))?
            .map_err(|err| TransportError::connect_failed(&target, err))?;
        let reader_port = port
            .try_clone()
            .map_err(|err| TransportError::connect_failed(&target, err))?;

        *lock(&self.port) = Some(port);
        self.state.attach(listener);
        self.state.set_connected(true);

        match spawn_stream_reader("meshlink-serial", reader_port, self.state.clone(), false) {
            Ok(handle) => *lock(&self.reader) = Some(handle),
            Err(err) => {
                self.disconnect().await;
                return Err(TransportError::connect_failed(&target, err));
            }
        }

        info!(port = %target, baud = self.params.baud_rate, "serial link open");
        Ok(())
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        if !self.state.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let port = Arc::clone(&self.port);
        let data = data.to_vec();
        let len = data.len();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut guard = lock(&port);
            let port = guard.as_mut().ok_or(TransportError::NotConnected)?;
            port.write_all(&data).map_err(TransportError::write_failed)?;
            port.flush().map_err(TransportError::write_failed)
        })
        .await
        .map_err(TransportError::write_failed)??;

        trace!(len, "serial write");
        tokio::time::sleep(self.params.write_pacing).await;
        Ok(())
    }

    async fn disconnect(&self) {
        self.teardown().await;
        self.state.set_connected(false);
        self.state.detach();
    }
}

/// A serial port that may have a radio attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub description: String,
}

/// List serial ports known to the OS.
pub fn available_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(std::io::Error::from)?;
    Ok(ports
        .into_iter()
        .map(|port| PortInfo {
            description: describe(&port.port_type),
            name: port.port_name,
        })
        .collect())
}

fn describe(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => {
            let mut text = format!("USB {:04x}:{:04x}", usb.vid, usb.pid);
            if let Some(product) = &usb.product {
                text.push(' ');
                text.push_str(product);
            }
            text
        }
        SerialPortType::BluetoothPort => "Bluetooth".to_string(),
        SerialPortType::PciPort => "PCI".to_string(),
        SerialPortType::Unknown => "unknown".to_string(),
    }
}
