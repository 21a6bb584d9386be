use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;

/// Which physical link a transport drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Serial,
    Tcp,
    Ble,
}

impl TransportKind {
    /// Byte-stream links carry `0x94 0xC3` framing; BLE delivers whole messages.
    pub fn needs_framing(self) -> bool {
        !matches!(self, Self::Ble)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Serial => "serial",
            Self::Tcp => "tcp",
            Self::Ble => "ble",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives inbound traffic from a transport.
///
/// Callbacks run on the transport's background reader (an OS thread for
/// byte streams, a tokio task for BLE) and must not block for long.
pub trait LinkListener: Send + Sync {
    /// One inbound chunk, in arrival order.
    fn on_data(&self, data: Bytes);

    /// Called exactly once per transition between connected and disconnected.
    fn on_connection_changed(&self, connected: bool);
}

/// A connection to one mesh radio.
///
/// A transport owns at most one live link. Once [`disconnect`](Self::disconnect)
/// returns, or the background reader has reported the link lost, no further
/// [`LinkListener::on_data`] calls are made.
pub trait Transport: Send + Sync + 'static {
    fn kind(&self) -> TransportKind;

    fn needs_framing(&self) -> bool {
        self.kind().needs_framing()
    }

    /// Human-readable name of the device or endpoint.
    fn display_name(&self) -> String;

    fn is_connected(&self) -> bool;

    /// Open the link and start delivering inbound data to `listener`.
    fn connect(&self, listener: Arc<dyn LinkListener>) -> impl Future<Output = Result<()>> + Send;

    /// Write one outbound unit (a frame for byte streams, a raw message for BLE).
    fn write(&self, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Close the link. Idempotent and infallible.
    fn disconnect(&self) -> impl Future<Output = ()> + Send;
}
