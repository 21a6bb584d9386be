use std::sync::Arc;

use crate::error::Result;
use crate::params::ConnectParams;
use crate::tcp::TcpLink;
use crate::traits::{LinkListener, Transport, TransportKind};

#[cfg(feature = "ble")]
use crate::ble::BleLink;
#[cfg(feature = "serial")]
use crate::serial::SerialLink;

/// Whichever link [`ConnectParams`] selected, behind the [`Transport`] contract.
pub struct Link {
    inner: LinkInner,
}

enum LinkInner {
    #[cfg(feature = "serial")]
    Serial(SerialLink),
    Tcp(TcpLink),
    #[cfg(feature = "ble")]
    Ble(BleLink),
}

impl Link {
    /// Build the link for `params`. Nothing is opened until `connect`.
    pub fn new(params: ConnectParams) -> Result<Self> {
        let inner = match params {
            #[cfg(feature = "serial")]
            ConnectParams::Serial(params) => LinkInner::Serial(SerialLink::new(params)),
            #[cfg(not(feature = "serial"))]
            ConnectParams::Serial(_) => {
                return Err(crate::error::TransportError::Unsupported("serial"))
            }
            ConnectParams::Tcp(params) => LinkInner::Tcp(TcpLink::new(params)),
            #[cfg(feature = "ble")]
            ConnectParams::Ble(params) => LinkInner::Ble(BleLink::new(params)),
            #[cfg(not(feature = "ble"))]
            ConnectParams::Ble(_) => {
                return Err(crate::error::TransportError::Unsupported("bluetooth"))
            }
        };
        Ok(Self { inner })
    }
}

impl Transport for Link {
    fn kind(&self) -> TransportKind {
        match &self.inner {
            #[cfg(feature = "serial")]
            LinkInner::Serial(link) => link.kind(),
            LinkInner::Tcp(link) => link.kind(),
            #[cfg(feature = "ble")]
            LinkInner::Ble(link) => link.kind(),
        }
    }

    fn display_name(&self) -> String {
        match &self.inner {
            #[cfg(feature = "serial")]
            LinkInner::Serial(link) => link.display_name(),
            LinkInner::Tcp(link) => link.display_name(),
            #[cfg(feature = "ble")]
            LinkInner::Ble(link) => link.display_name(),
        }
    }

    fn is_connected(&self) -> bool {
        match &self.inner {
            #[cfg(feature = "serial")]
            LinkInner::Serial(link) => link.is_connected(),
            LinkInner::Tcp(link) => link.is_connected(),
            #[cfg(feature = "ble")]
            LinkInner::Ble(link) => link.is_connected(),
        }
    }

    async fn connect(&self, listener: Arc<dyn LinkListener>) -> Result<()> {
        match &self.inner {
            #[cfg(feature = "serial")]
            LinkInner::Serial(link) => link.connect(listener).await,
            LinkInner::Tcp(link) => link.connect(listener).await,
            #[cfg(feature = "ble")]
            LinkInner::Ble(link) => link.connect(listener).await,
        }
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        match &self.inner {
            #[cfg(feature = "serial")]
            LinkInner::Serial(link) => link.write(data).await,
            LinkInner::Tcp(link) => link.write(data).await,
            #[cfg(feature = "ble")]
            LinkInner::Ble(link) => link.write(data).await,
        }
    }

    async fn disconnect(&self) {
        match &self.inner {
            #[cfg(feature = "serial")]
            LinkInner::Serial(link) => link.disconnect().await,
            LinkInner::Tcp(link) => link.disconnect().await,
            #[cfg(feature = "ble")]
            LinkInner::Ble(link) => link.disconnect().await,
        }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("kind", &self.kind())
            .field("target", &self.display_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::params::{BleParams, SerialParams, TcpParams};

    #[test]
    fn tcp_link_from_params() {
        let link = Link::new(ConnectParams::Tcp(TcpParams::new("radio.lan", 4403))).unwrap();
        assert_eq!(link.kind(), TransportKind::Tcp);
        assert!(link.needs_framing());
        assert_eq!(link.display_name(), "radio.lan:4403");
        assert!(!link.is_connected());
    }

    #[cfg(feature = "serial")]
    #[test]
    fn serial_link_from_params() {
        let link = Link::new(ConnectParams::Serial(SerialParams::new("COM4"))).unwrap();
        assert_eq!(link.kind(), TransportKind::Serial);
        assert_eq!(link.display_name(), "COM4");
    }

    #[cfg(feature = "ble")]
    #[test]
    fn ble_link_skips_framing() {
        let link = Link::new(ConnectParams::Ble(BleParams::new("Meshtastic_1a2b"))).unwrap();
        assert!(!link.needs_framing());
    }

    #[cfg(not(feature = "ble"))]
    #[test]
    fn ble_unsupported_without_feature() {
        assert!(matches!(
            Link::new(ConnectParams::Ble(BleParams::new("x"))),
            Err(TransportError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn write_before_connect() {
        let link = Link::new(ConnectParams::Tcp(TcpParams::new("radio.lan", 4403))).unwrap();
        assert!(matches!(
            link.write(b"x").await,
            Err(TransportError::NotConnected)
        ));
    }
}
