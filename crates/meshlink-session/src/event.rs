//! Session states and the outbound event surface.

use std::fmt;
use std::time::SystemTime;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::radio::{ChannelInfo, ChannelRef, DeviceIdentity, LoraConfig, NodeNum, NodeRecord};

/// Lifecycle of a [`DeviceSession`](crate::DeviceSession).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Initializing,
    Ready,
    Disconnecting,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Disconnecting => "disconnecting",
            Self::Error => "error",
        }
    }

    /// Connecting, initializing or ready.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Initializing | Self::Ready)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    /// The radio could not decrypt it.
    Encrypted,
    /// Administrative response, summarized in `text`.
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceivedMessage {
    pub kind: MessageKind,
    pub from: NodeNum,
    pub from_name: String,
    pub to: NodeNum,
    pub channel: ChannelRef,
    pub text: String,
    pub rx_snr: f32,
    pub rx_rssi: i32,
    pub via_mqtt: bool,
    pub received_at: SystemTime,
}

/// Everything a session reports to its consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged(SessionState),
    NodeUpdated(NodeRecord),
    ChannelUpdated(ChannelInfo),
    RadioConfigUpdated(LoraConfig),
    IdentityResolved(DeviceIdentity),
    MessageReceived(ReceivedMessage),
    PacketCountChanged(u64),
    /// A diagnostic line the device printed between frames.
    DeviceLog(String),
}

/// Receiver for session events.
///
/// Called from the reader and initialization paths, never while session
/// locks are held. Implementations must not block.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: SessionEvent);
}

impl<F> EventSink for F
where
    F: Fn(SessionEvent) + Send + Sync + 'static,
{
    fn emit(&self, event: SessionEvent) {
        self(event)
    }
}

/// Forwards events into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink(pub mpsc::UnboundedSender<SessionEvent>);

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: SessionEvent) {
        // A dropped receiver just means nobody listens anymore.
        let _ = self.0.send(event);
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: SessionEvent) {}
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn state_display_and_activity() {
        assert_eq!(SessionState::Initializing.to_string(), "initializing");
        assert!(SessionState::Ready.is_active());
        assert!(!SessionState::Error.is_active());
        assert!(!SessionState::Disconnected.is_active());
    }

    #[test]
    fn closures_are_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |event: SessionEvent| seen.lock().unwrap().push(event)
        };
        sink.emit(SessionEvent::PacketCountChanged(3));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![SessionEvent::PacketCountChanged(3)]
        );
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(SessionEvent::DeviceLog("ignored".into()));
    }

    #[test]
    fn events_serialize_tagged() {
        let json =
            serde_json::to_value(SessionEvent::StateChanged(SessionState::Ready)).unwrap();
        assert_eq!(json["event"], "state_changed");
        assert_eq!(json["data"], "ready");
    }
}
