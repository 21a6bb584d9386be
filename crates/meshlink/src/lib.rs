//! Client driver for LoRa mesh radios.
//!
//! meshlink talks to a mesh radio over Serial/USB, TCP/Wi-Fi or Bluetooth LE,
//! keeps protocol sync on noisy byte streams, and presents the radio's nodes,
//! channels and messages as a stream of session events.
//!
//! # Crate Structure
//!
//! - [`transport`] - Physical links behind one transport contract
//! - [`frame`] - Length-prefixed framing and stream resynchronization
//! - [`session`] - Device session: handshake, dispatch, reconciliation, recovery

/// Re-export transport types.
pub mod transport {
    pub use meshlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use meshlink_frame::*;
}

/// Re-export session types.
pub mod session {
    pub use meshlink_session::*;
}

pub use meshlink_session::{DeviceSession, SessionConfig, SessionEvent, SessionState};
pub use meshlink_transport::{ConnectParams, Link};
