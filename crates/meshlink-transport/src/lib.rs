//! Physical links to mesh radio devices.
//!
//! Provides one contract over the three ways a radio can be attached:
//! - Serial/USB (byte stream, needs framing)
//! - TCP/Wi-Fi (byte stream, needs framing)
//! - Bluetooth LE (whole messages per characteristic read, no framing)
//!
//! This is the lowest layer of meshlink. The session layer only ever talks
//! to a [`Transport`]; [`Link`] picks the concrete variant at connect time.

pub mod error;
pub mod link;
pub mod params;
pub mod traits;

mod reader;
mod state;
pub mod tcp;

#[cfg(feature = "ble")]
pub mod ble;
#[cfg(feature = "serial")]
pub mod serial;

pub use error::{BoxError, Result, TransportError};
pub use link::Link;
pub use params::{
    BleParams, ConnectParams, SerialParams, TcpParams, DEFAULT_BAUD_RATE, DEFAULT_TCP_PORT,
};
pub use traits::{LinkListener, Transport, TransportKind};

#[cfg(feature = "ble")]
pub use ble::{scan, BleDevice, BleLink};
#[cfg(feature = "serial")]
pub use serial::{available_ports, PortInfo, SerialLink};
pub use tcp::TcpLink;
