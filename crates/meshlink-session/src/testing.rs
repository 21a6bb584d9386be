//! In-memory transport and message builders for session tests.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use meshlink_frame::{frame_bytes, MARKER};
use meshlink_transport::{LinkListener, Transport, TransportError, TransportKind};
use prost::Message;

use crate::proto::{self, port};
use crate::session::lock;

type Responder = Box<dyn Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync>;

#[derive(Default)]
struct MockInner {
    listener: Option<Arc<dyn LinkListener>>,
    connected: bool,
    fail_writes: bool,
    raw: Vec<Vec<u8>>,
    payloads: Vec<Vec<u8>>,
}

/// A radio double. Every written message is handed to the responder, whose
/// replies are delivered back synchronously, framed when the kind needs it.
pub(crate) struct MockTransport {
    kind: TransportKind,
    responder: Responder,
    inner: Mutex<MockInner>,
}

impl MockTransport {
    pub(crate) fn new(
        kind: TransportKind,
        responder: impl Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            responder: Box::new(responder),
            inner: Mutex::new(MockInner::default()),
        }
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        lock(&self.inner).fail_writes = fail;
    }

    /// Every write as it hit the wire.
    pub(crate) fn raw_writes(&self) -> Vec<Vec<u8>> {
        lock(&self.inner).raw.clone()
    }

    /// Message payloads written, with framing removed.
    pub(crate) fn payloads(&self) -> Vec<Vec<u8>> {
        lock(&self.inner).payloads.clone()
    }

    pub(crate) fn inject(&self, bytes: &[u8]) {
        let listener = lock(&self.inner).listener.clone();
        if let Some(listener) = listener {
            listener.on_data(Bytes::copy_from_slice(bytes));
        }
    }

    pub(crate) fn inject_frame(&self, payload: &[u8]) {
        if self.kind.needs_framing() {
            let frame = frame_bytes(payload).expect("test payload should fit a frame");
            self.inject(&frame);
        } else {
            self.inject(payload);
        }
    }

    /// Simulate the reader noticing a dead link.
    pub(crate) fn drop_link(&self) {
        let listener = {
            let mut inner = lock(&self.inner);
            inner.connected = false;
            inner.listener.take()
        };
        if let Some(listener) = listener {
            listener.on_connection_changed(false);
        }
    }
}

impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn display_name(&self) -> String {
        format!("mock-{}", self.kind)
    }

    fn is_connected(&self) -> bool {
        lock(&self.inner).connected
    }

    async fn connect(&self, listener: Arc<dyn LinkListener>) -> meshlink_transport::Result<()> {
        {
            let mut inner = lock(&self.inner);
            if inner.connected {
                return Err(TransportError::AlreadyConnected);
            }
            inner.connected = true;
            inner.listener = Some(Arc::clone(&listener));
        }
        listener.on_connection_changed(true);
        Ok(())
    }

    async fn write(&self, data: &[u8]) -> meshlink_transport::Result<()> {
        let payload = {
            let mut inner = lock(&self.inner);
            if !inner.connected {
                return Err(TransportError::NotConnected);
            }
            if inner.fail_writes {
                return Err(TransportError::WriteFailed(
                    std::io::Error::other("mock write failure").into(),
                ));
            }
            inner.raw.push(data.to_vec());
            let payload = if !self.kind.needs_framing() {
                Some(data.to_vec())
            } else if data.starts_with(&MARKER) && data.len() >= 4 {
                Some(data[4..].to_vec())
            } else {
                None
            };
            if let Some(payload) = &payload {
                inner.payloads.push(payload.clone());
            }
            payload
        };

        if let Some(payload) = payload {
            for reply in (self.responder)(&payload) {
                self.inject_frame(&reply);
            }
        }
        Ok(())
    }

    async fn disconnect(&self) {
        let listener = {
            let mut inner = lock(&self.inner);
            let was = std::mem::replace(&mut inner.connected, false);
            let listener = inner.listener.take();
            listener.filter(|_| was)
        };
        if let Some(listener) = listener {
            listener.on_connection_changed(false);
        }
    }
}

fn from_radio(variant: proto::from_radio::PayloadVariant) -> Vec<u8> {
    proto::FromRadio {
        id: 0,
        payload_variant: Some(variant),
    }
    .encode_to_vec()
}

fn decoded_packet(from: u32, to: u32, channel: u32, data: proto::Data) -> Vec<u8> {
    from_radio(proto::from_radio::PayloadVariant::Packet(proto::MeshPacket {
        from,
        to,
        channel,
        id: 1,
        rx_snr: 5.25,
        rx_rssi: -97,
        payload_variant: Some(proto::mesh_packet::PayloadVariant::Decoded(data)),
        ..Default::default()
    }))
}

pub(crate) fn my_info(node: u32) -> Vec<u8> {
    from_radio(proto::from_radio::PayloadVariant::MyInfo(proto::MyNodeInfo {
        my_node_num: node,
    }))
}

pub(crate) fn node_info(node: u32, long_name: &str, short_name: &str) -> Vec<u8> {
    from_radio(proto::from_radio::PayloadVariant::NodeInfo(proto::NodeInfo {
        num: node,
        user: Some(proto::User {
            id: format!("!{node:08x}"),
            long_name: long_name.into(),
            short_name: short_name.into(),
            hw_model: 43,
        }),
        snr: 8.0,
        ..Default::default()
    }))
}

pub(crate) fn config_complete(id: u32) -> Vec<u8> {
    from_radio(proto::from_radio::PayloadVariant::ConfigCompleteId(id))
}

pub(crate) fn text_packet(from: u32, channel: u32, text: &str) -> Vec<u8> {
    decoded_packet(
        from,
        0xFFFF_FFFF,
        channel,
        proto::Data {
            portnum: port::TEXT_MESSAGE,
            payload: text.as_bytes().to_vec(),
            ..Default::default()
        },
    )
}

/// Admin get-channel response for a zero-based slot.
pub(crate) fn admin_channel_response(node: u32, index: u32, name: &str) -> Vec<u8> {
    let admin = proto::AdminMessage {
        payload_variant: Some(proto::admin_message::PayloadVariant::GetChannelResponse(
            proto::Channel {
                index: index as i32,
                role: if index == 0 { 1 } else { 2 },
                settings: proto::ChannelSettings {
                    name: name.as_bytes().to_vec(),
                    psk: vec![1],
                    ..Default::default()
                }
                .encode_to_vec(),
            },
        )),
    };
    decoded_packet(
        node,
        node,
        0,
        proto::Data {
            portnum: port::ADMIN,
            payload: admin.encode_to_vec(),
            ..Default::default()
        },
    )
}

/// The nonce of a config request, if `payload` is one.
pub(crate) fn is_want_config(payload: &[u8]) -> Option<u32> {
    match proto::ToRadio::decode(payload).ok()?.payload_variant? {
        proto::to_radio::PayloadVariant::WantConfigId(nonce) => Some(nonce),
        proto::to_radio::PayloadVariant::Packet(_) => None,
    }
}

/// The zero-based slot of a channel request, if `payload` is one.
pub(crate) fn channel_request_index(payload: &[u8]) -> Option<u32> {
    let to_radio = proto::ToRadio::decode(payload).ok()?;
    let proto::to_radio::PayloadVariant::Packet(packet) = to_radio.payload_variant? else {
        return None;
    };
    let proto::mesh_packet::PayloadVariant::Decoded(data) = packet.payload_variant? else {
        return None;
    };
    if data.portnum != port::ADMIN {
        return None;
    }
    match proto::AdminMessage::decode(data.payload.as_slice())
        .ok()?
        .payload_variant?
    {
        proto::admin_message::PayloadVariant::GetChannelRequest(wire) => wire.checked_sub(1),
        _ => None,
    }
}
