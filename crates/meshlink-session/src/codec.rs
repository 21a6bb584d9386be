//! Translation between frame payloads and session messages.
//!
//! The session routes on [`Inbound`] and produces [`Outbound`]; it never sees
//! the wire schema. [`ProtobufCodec`] speaks the firmware's protobuf API.

use bytes::Bytes;
use prost::Message;

use crate::error::CodecError;
use crate::proto::{self, port};
use crate::radio::{
    ChannelRecord, ChannelRole, DeviceMetrics, LoraConfig, ModemPreset, NodeNum, Position,
    UserInfo,
};

/// A decoded message from the radio.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// The radio's own node number.
    MyInfo { node_num: NodeNum },
    NodeInfo(NodeReport),
    Channel(ChannelRecord),
    /// A config section; `None` for sections other than LoRa.
    Config(Option<LoraConfig>),
    ModuleConfig,
    /// End of the configuration dump started by a config request.
    ConfigComplete { id: u32 },
    Rebooted,
    Packet(MeshPacket),
    /// A valid message the session does not interpret.
    Unknown,
}

/// A node database entry from the configuration dump.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeReport {
    pub num: NodeNum,
    pub user: Option<UserInfo>,
    pub position: Option<Position>,
    pub snr: f32,
    /// Unix seconds, 0 when unknown.
    pub last_heard: u32,
    pub metrics: Option<DeviceMetrics>,
}

/// A packet heard on the mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshPacket {
    pub from: NodeNum,
    pub to: NodeNum,
    pub channel: u32,
    pub id: u32,
    pub rx_snr: f32,
    pub rx_rssi: i32,
    pub hop_limit: u32,
    pub via_mqtt: bool,
    pub payload: PacketPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PacketPayload {
    App(AppPayload),
    /// Could not be decrypted by the radio.
    Encrypted(Bytes),
    Empty,
}

/// Application payload, by port.
#[derive(Debug, Clone, PartialEq)]
pub enum AppPayload {
    Text(String),
    NodeInfo(UserInfo),
    Position(Position),
    Telemetry(Option<DeviceMetrics>),
    Admin(AdminPayload),
    Other { port: i32, len: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdminPayload {
    ChannelResponse(ChannelRecord),
    ConfigResponse(Option<LoraConfig>),
    Other,
}

/// A message for the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Ask for the full configuration dump, tagged with `nonce`.
    WantConfig { nonce: u32 },
    Text {
        from: NodeNum,
        to: NodeNum,
        channel: u32,
        packet_id: u32,
        hop_limit: u32,
        text: String,
    },
    /// Admin get-channel request for a zero-based `index`, addressed to `node`.
    ChannelRequest {
        node: NodeNum,
        index: u32,
        packet_id: u32,
    },
}

/// Converts between frame payloads and session messages.
pub trait RadioCodec: Send + Sync + 'static {
    fn decode(&self, payload: &[u8]) -> Result<Inbound, CodecError>;

    fn encode(&self, message: &Outbound) -> Vec<u8>;
}

/// Codec for the firmware's protobuf client API.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtobufCodec;

impl RadioCodec for ProtobufCodec {
    fn decode(&self, payload: &[u8]) -> Result<Inbound, CodecError> {
        use proto::from_radio::PayloadVariant;

        let message = proto::FromRadio::decode(payload)?;
        Ok(match message.payload_variant {
            Some(PayloadVariant::MyInfo(info)) => Inbound::MyInfo {
                node_num: info.my_node_num,
            },
            Some(PayloadVariant::NodeInfo(info)) => Inbound::NodeInfo(node_report(info)),
            Some(PayloadVariant::Channel(channel)) => Inbound::Channel(channel_record(channel)?),
            Some(PayloadVariant::Config(config)) => Inbound::Config(lora_config(config)),
            Some(PayloadVariant::ModuleConfig(_)) => Inbound::ModuleConfig,
            Some(PayloadVariant::ConfigCompleteId(id)) => Inbound::ConfigComplete { id },
            Some(PayloadVariant::Rebooted(_)) => Inbound::Rebooted,
            Some(PayloadVariant::Packet(packet)) => Inbound::Packet(mesh_packet(packet)?),
            None => Inbound::Unknown,
        })
    }

    fn encode(&self, message: &Outbound) -> Vec<u8> {
        use proto::to_radio::PayloadVariant;

        let variant = match message {
            Outbound::WantConfig { nonce } => PayloadVariant::WantConfigId(*nonce),
            Outbound::Text {
                from,
                to,
                channel,
                packet_id,
                hop_limit,
                text,
            } => PayloadVariant::Packet(proto::MeshPacket {
                from: *from,
                to: *to,
                channel: *channel,
                id: *packet_id,
                hop_limit: *hop_limit,
                payload_variant: Some(proto::mesh_packet::PayloadVariant::Decoded(proto::Data {
                    portnum: port::TEXT_MESSAGE,
                    payload: text.as_bytes().to_vec(),
                    ..Default::default()
                })),
                ..Default::default()
            }),
            Outbound::ChannelRequest {
                node,
                index,
                packet_id,
            } => {
                let admin = proto::AdminMessage {
                    payload_variant: Some(
                        proto::admin_message::PayloadVariant::GetChannelRequest(index + 1),
                    ),
                };
                PayloadVariant::Packet(proto::MeshPacket {
                    from: *node,
                    to: *node,
                    id: *packet_id,
                    payload_variant: Some(proto::mesh_packet::PayloadVariant::Decoded(
                        proto::Data {
                            portnum: port::ADMIN,
                            payload: admin.encode_to_vec(),
                            want_response: true,
                            ..Default::default()
                        },
                    )),
                    ..Default::default()
                })
            }
        };

        proto::ToRadio {
            payload_variant: Some(variant),
        }
        .encode_to_vec()
    }
}

fn user_info(user: proto::User) -> UserInfo {
    UserInfo {
        id: user.id,
        long_name: user.long_name,
        short_name: user.short_name,
        hw_model: user.hw_model,
    }
}

fn position(pos: proto::Position) -> Position {
    Position {
        latitude_i: pos.latitude_i,
        longitude_i: pos.longitude_i,
        altitude: pos.altitude,
    }
}

fn metrics(metrics: proto::DeviceMetrics) -> DeviceMetrics {
    DeviceMetrics {
        battery_level: (metrics.battery_level > 0).then_some(metrics.battery_level),
        voltage: (metrics.voltage > 0.0).then_some(metrics.voltage),
        uptime_seconds: (metrics.uptime_seconds > 0).then_some(metrics.uptime_seconds),
    }
}

fn node_report(info: proto::NodeInfo) -> NodeReport {
    NodeReport {
        num: info.num,
        user: info.user.map(user_info),
        position: info.position.map(position),
        snr: info.snr,
        last_heard: info.last_heard,
        metrics: info.device_metrics.map(metrics),
    }
}

fn channel_record(channel: proto::Channel) -> Result<ChannelRecord, CodecError> {
    let index = u32::try_from(channel.index)
        .map_err(|_| CodecError::Malformed(format!("negative channel index {}", channel.index)))?;
    // Settings that fail to decode still reach the name scan through the raw bytes.
    let settings =
        proto::ChannelSettings::decode(channel.settings.as_slice()).unwrap_or_default();
    Ok(ChannelRecord {
        index,
        role: ChannelRole::from_i32(channel.role),
        name: String::from_utf8_lossy(&settings.name).into_owned(),
        settings_raw: channel.settings,
        psk: settings.psk,
        uplink_enabled: settings.uplink_enabled,
        downlink_enabled: settings.downlink_enabled,
    })
}

fn lora_config(config: proto::Config) -> Option<LoraConfig> {
    match config.payload_variant? {
        proto::config::PayloadVariant::Lora(lora) => Some(LoraConfig {
            use_preset: lora.use_preset,
            modem_preset: ModemPreset::from_i32(lora.modem_preset),
            bandwidth: lora.bandwidth,
            spread_factor: lora.spread_factor,
            coding_rate: lora.coding_rate,
            region: lora.region,
            hop_limit: lora.hop_limit,
            tx_enabled: lora.tx_enabled,
            tx_power: lora.tx_power,
            channel_num: lora.channel_num,
        }),
    }
}

fn mesh_packet(packet: proto::MeshPacket) -> Result<MeshPacket, CodecError> {
    let payload = match packet.payload_variant {
        Some(proto::mesh_packet::PayloadVariant::Decoded(data)) => {
            PacketPayload::App(app_payload(data)?)
        }
        Some(proto::mesh_packet::PayloadVariant::Encrypted(bytes)) => {
            PacketPayload::Encrypted(Bytes::from(bytes))
        }
        None => PacketPayload::Empty,
    };
    Ok(MeshPacket {
        from: packet.from,
        to: packet.to,
        channel: packet.channel,
        id: packet.id,
        rx_snr: packet.rx_snr,
        rx_rssi: packet.rx_rssi,
        hop_limit: packet.hop_limit,
        via_mqtt: packet.via_mqtt,
        payload,
    })
}

fn app_payload(data: proto::Data) -> Result<AppPayload, CodecError> {
    let payload = data.payload.as_slice();
    Ok(match data.portnum {
        port::TEXT_MESSAGE => AppPayload::Text(String::from_utf8_lossy(payload).into_owned()),
        port::NODEINFO => AppPayload::NodeInfo(user_info(proto::User::decode(payload)?)),
        port::POSITION => AppPayload::Position(position(proto::Position::decode(payload)?)),
        port::TELEMETRY => {
            let telemetry = proto::Telemetry::decode(payload)?;
            AppPayload::Telemetry(telemetry.variant.map(|variant| match variant {
                proto::telemetry::Variant::DeviceMetrics(m) => metrics(m),
            }))
        }
        port::ADMIN => {
            use proto::admin_message::PayloadVariant;

            let admin = proto::AdminMessage::decode(payload)?;
            AppPayload::Admin(match admin.payload_variant {
                Some(PayloadVariant::GetChannelResponse(channel)) => {
                    AdminPayload::ChannelResponse(channel_record(channel)?)
                }
                Some(PayloadVariant::GetConfigResponse(config)) => {
                    AdminPayload::ConfigResponse(lora_config(config))
                }
                Some(PayloadVariant::GetChannelRequest(_)) | None => AdminPayload::Other,
            })
        }
        other => AppPayload::Other {
            port: other,
            len: payload.len(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_radio(variant: proto::from_radio::PayloadVariant) -> Vec<u8> {
        proto::FromRadio {
            id: 1,
            payload_variant: Some(variant),
        }
        .encode_to_vec()
    }

    fn packet(portnum: i32, payload: Vec<u8>) -> Vec<u8> {
        from_radio(proto::from_radio::PayloadVariant::Packet(proto::MeshPacket {
            from: 0x1111_2222,
            to: 0xFFFF_FFFF,
            channel: 2,
            id: 99,
            payload_variant: Some(proto::mesh_packet::PayloadVariant::Decoded(proto::Data {
                portnum,
                payload,
                ..Default::default()
            })),
            ..Default::default()
        }))
    }

    #[test]
    fn want_config_request() {
        let bytes = ProtobufCodec.encode(&Outbound::WantConfig { nonce: 0x1234 });
        let decoded = proto::ToRadio::decode(bytes.as_slice()).unwrap();
        assert_eq!(
            decoded.payload_variant,
            Some(proto::to_radio::PayloadVariant::WantConfigId(0x1234))
        );
    }

    #[test]
    fn channel_request_is_one_based_and_self_addressed() {
        let bytes = ProtobufCodec.encode(&Outbound::ChannelRequest {
            node: 0xAABBCCDD,
            index: 0,
            packet_id: 5,
        });
        let decoded = proto::ToRadio::decode(bytes.as_slice()).unwrap();
        let Some(proto::to_radio::PayloadVariant::Packet(packet)) = decoded.payload_variant else {
            panic!("expected packet");
        };
        assert_eq!(packet.from, 0xAABBCCDD);
        assert_eq!(packet.to, 0xAABBCCDD);
        let Some(proto::mesh_packet::PayloadVariant::Decoded(data)) = packet.payload_variant
        else {
            panic!("expected decoded data");
        };
        assert_eq!(data.portnum, port::ADMIN);
        assert!(data.want_response);
        let admin = proto::AdminMessage::decode(data.payload.as_slice()).unwrap();
        assert_eq!(
            admin.payload_variant,
            Some(proto::admin_message::PayloadVariant::GetChannelRequest(1))
        );
    }

    #[test]
    fn text_message_fields() {
        let bytes = ProtobufCodec.encode(&Outbound::Text {
            from: 1,
            to: 0xFFFF_FFFF,
            channel: 3,
            packet_id: 77,
            hop_limit: 7,
            text: "moin".into(),
        });
        let decoded = proto::ToRadio::decode(bytes.as_slice()).unwrap();
        let Some(proto::to_radio::PayloadVariant::Packet(packet)) = decoded.payload_variant else {
            panic!("expected packet");
        };
        assert_eq!((packet.channel, packet.id, packet.hop_limit), (3, 77, 7));
    }

    #[test]
    fn decodes_text_packet() {
        let inbound = ProtobufCodec
            .decode(&packet(port::TEXT_MESSAGE, b"hallo".to_vec()))
            .unwrap();
        let Inbound::Packet(packet) = inbound else {
            panic!("expected packet");
        };
        assert_eq!(packet.from, 0x1111_2222);
        assert_eq!(packet.channel, 2);
        assert_eq!(
            packet.payload,
            PacketPayload::App(AppPayload::Text("hallo".into()))
        );
    }

    #[test]
    fn decodes_admin_channel_response() {
        let admin = proto::AdminMessage {
            payload_variant: Some(proto::admin_message::PayloadVariant::GetChannelResponse(
                proto::Channel {
                    index: 2,
                    role: 2,
                    settings: proto::ChannelSettings {
                        name: b"Hessen".to_vec(),
                        psk: vec![1],
                        ..Default::default()
                    }
                    .encode_to_vec(),
                },
            )),
        };
        let inbound = ProtobufCodec
            .decode(&packet(port::ADMIN, admin.encode_to_vec()))
            .unwrap();
        let Inbound::Packet(MeshPacket {
            payload: PacketPayload::App(AppPayload::Admin(AdminPayload::ChannelResponse(record))),
            ..
        }) = inbound
        else {
            panic!("expected channel response");
        };
        assert_eq!(record.index, 2);
        assert_eq!(record.role, ChannelRole::Secondary);
        assert_eq!(record.name, "Hessen");
        assert!(!record.settings_raw.is_empty());
    }

    #[test]
    fn invalid_utf8_name_survives_decode() {
        let bytes = from_radio(proto::from_radio::PayloadVariant::Channel(proto::Channel {
            index: 1,
            role: 2,
            settings: proto::ChannelSettings {
                name: vec![0xFF, 0xFE],
                ..Default::default()
            }
            .encode_to_vec(),
        }));
        let Inbound::Channel(record) = ProtobufCodec.decode(&bytes).unwrap() else {
            panic!("expected channel");
        };
        assert!(record.name.contains('\u{FFFD}'));
    }

    #[test]
    fn settings_bytes_are_kept_as_received() {
        // psk, a valid name, then a second name field that wins the regular decode.
        let settings = vec![
            0x12, 0x01, 0x01, 0x1A, 0x06, b'M', b'e', b's', b'h', b'H', b'E', 0x1A, 0x02, 0x01,
            0x07,
        ];
        let bytes = from_radio(proto::from_radio::PayloadVariant::Channel(proto::Channel {
            index: 2,
            role: 2,
            settings: settings.clone(),
        }));
        let Inbound::Channel(record) = ProtobufCodec.decode(&bytes).unwrap() else {
            panic!("expected channel");
        };
        assert_eq!(record.name, "\u{1}\u{7}");
        assert_eq!(record.settings_raw, settings);
        assert_eq!(record.psk, vec![1]);
        assert_eq!(crate::channel::display_name(&record, None), "MeshHE");
    }

    #[test]
    fn undecodable_settings_still_resolve_a_name() {
        // A truncated trailing varint field breaks the regular decode.
        let settings = vec![0x1A, 0x04, b'N', b'o', b'r', b'd', 0x08];
        let bytes = from_radio(proto::from_radio::PayloadVariant::Channel(proto::Channel {
            index: 3,
            role: 2,
            settings,
        }));
        let Inbound::Channel(record) = ProtobufCodec.decode(&bytes).unwrap() else {
            panic!("expected channel");
        };
        assert!(record.name.is_empty());
        assert_eq!(crate::channel::display_name(&record, None), "Nord");
    }

    #[test]
    fn decodes_config_sequence_markers() {
        let complete = from_radio(proto::from_radio::PayloadVariant::ConfigCompleteId(42));
        assert_eq!(
            ProtobufCodec.decode(&complete).unwrap(),
            Inbound::ConfigComplete { id: 42 }
        );

        let other_config = from_radio(proto::from_radio::PayloadVariant::Config(proto::Config {
            payload_variant: None,
        }));
        assert_eq!(
            ProtobufCodec.decode(&other_config).unwrap(),
            Inbound::Config(None)
        );

        let empty = proto::FromRadio::default().encode_to_vec();
        assert_eq!(ProtobufCodec.decode(&empty).unwrap(), Inbound::Unknown);
    }

    #[test]
    fn rejects_garbage() {
        assert!(ProtobufCodec.decode(&[0xFF, 0xFF, 0xFF]).is_err());
    }

    #[test]
    fn negative_channel_index_is_malformed() {
        let bytes = from_radio(proto::from_radio::PayloadVariant::Channel(proto::Channel {
            index: -1,
            role: 1,
            settings: Vec::new(),
        }));
        assert!(matches!(
            ProtobufCodec.decode(&bytes),
            Err(CodecError::Malformed(_))
        ));
    }
}
