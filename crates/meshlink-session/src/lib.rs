//! Device sessions for LoRa mesh radios.
//!
//! A [`DeviceSession`] sits on top of any [`Transport`]:
//! - frames byte-stream traffic and separates it from console text
//! - runs the configuration handshake and drains the node backlog
//! - replays the collected snapshot in a stable order, then goes live
//! - requests channel slots the radio left out of its dump
//! - re-synchronizes a radio that drifted into text-only output
//!
//! The radio's message schema sits behind [`RadioCodec`]; [`ProtobufCodec`]
//! speaks the firmware's protobuf client API.
//!
//! [`Transport`]: meshlink_transport::Transport

pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod handshake;
pub mod proto;
pub mod radio;
pub mod reconcile;
pub mod session;

mod diagnostics;
mod dispatch;
mod recovery;
#[cfg(test)]
mod testing;

pub use codec::{Inbound, Outbound, ProtobufCodec, RadioCodec};
pub use config::SessionConfig;
pub use error::{Anomaly, CodecError, Result, SessionError};
pub use event::{
    ChannelSink, EventSink, MessageKind, NullSink, ReceivedMessage, SessionEvent, SessionState,
};
pub use handshake::InitReport;
pub use radio::{
    node_id, ChannelInfo, ChannelRef, ChannelRole, DeviceIdentity, Encryption, LoraConfig,
    ModemPreset, NodeNum, NodeRecord, Position, BROADCAST, MAX_CHANNELS,
};
pub use reconcile::ReconcileOutcome;
pub use session::DeviceSession;
