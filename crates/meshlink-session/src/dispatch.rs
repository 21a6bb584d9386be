//! Routing of decoded radio messages into the session snapshot.

use std::time::{SystemTime, UNIX_EPOCH};

use meshlink_transport::Transport;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::channel::channel_info;
use crate::codec::{
    AdminPayload, AppPayload, Inbound, MeshPacket, NodeReport, PacketPayload,
};
use crate::event::{MessageKind, ReceivedMessage, SessionEvent};
use crate::radio::{
    node_id, ChannelRecord, ChannelRef, ChannelRole, DeviceIdentity, NodeNum, NodeRecord,
    MAX_CHANNELS,
};
use crate::session::{SessionData, Shared};

fn unix_now() -> Option<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs())
}

impl<T: Transport> Shared<T> {
    /// Decode one payload, fold it into the snapshot and emit what changed.
    ///
    /// While initializing only the snapshot is updated; the events are
    /// replayed once the backlog has drained.
    pub(crate) fn dispatch(&self, cancel: &CancellationToken, payload: &[u8]) {
        if cancel.is_cancelled() {
            return;
        }
        let inbound = match self.codec.decode(payload) {
            Ok(inbound) => inbound,
            Err(err) => {
                warn!(error = %err, len = payload.len(), "undecodable payload");
                return;
            }
        };

        let (live, events) = {
            let mut data = self.data();
            data.packet_count += 1;
            let mut events = vec![SessionEvent::PacketCountChanged(data.packet_count)];
            apply(&mut data, inbound, &mut events);
            (!data.initializing, events)
        };

        if live {
            self.emit_all(cancel, events);
        }
    }
}

/// Fold one message into `data`, collecting the events it produces.
fn apply(data: &mut SessionData, inbound: Inbound, events: &mut Vec<SessionEvent>) {
    match inbound {
        Inbound::MyInfo { node_num } => {
            info!(node = %node_id(node_num), "own node number");
            data.own_num = Some(node_num);
            let mut identity = DeviceIdentity::new(node_num);
            if let Some(node) = data.nodes.get(&node_num) {
                identity.enrich(node);
            }
            data.identity = Some(identity.clone());
            events.push(SessionEvent::IdentityResolved(identity));
        }
        Inbound::NodeInfo(report) => upsert_report(data, report, events),
        Inbound::Channel(record) => {
            debug!(index = record.index, role = ?record.role, "channel reported");
            store_channel(data, record, events);
        }
        Inbound::Config(Some(lora)) => {
            debug!(
                region = lora.region_name(),
                preset = %lora.modem_preset.display_name(),
                "lora config"
            );
            data.lora = Some(lora.clone());
            events.push(SessionEvent::RadioConfigUpdated(lora));
        }
        Inbound::Config(None) | Inbound::ModuleConfig => {}
        Inbound::ConfigComplete { id } => {
            debug!(id, "config complete");
            data.config_complete = true;
        }
        Inbound::Rebooted => warn!("radio reports a reboot"),
        Inbound::Packet(packet) => apply_packet(data, packet, events),
        Inbound::Unknown => trace!("ignoring unrecognized message"),
    }
}

fn upsert_report(data: &mut SessionData, report: NodeReport, events: &mut Vec<SessionEvent>) {
    let node = data
        .nodes
        .entry(report.num)
        .or_insert_with(|| NodeRecord::new(report.num));
    if let Some(user) = &report.user {
        node.apply_user(user);
    }
    match report.position {
        Some(pos) if pos.is_fix() => node.position = Some(pos),
        Some(_) => trace!(node = %node.id, "position without fix"),
        None => {}
    }
    node.snr = Some(report.snr);
    node.last_heard = if report.last_heard > 0 {
        Some(u64::from(report.last_heard))
    } else {
        unix_now()
    };
    if let Some(level) = report.metrics.and_then(|m| m.battery_level) {
        node.battery_level = Some(level);
    }
    let node = node.clone();
    node_changed(data, node, events);
}

/// Record a node event, enriching our identity when it is our own node.
fn node_changed(data: &mut SessionData, node: NodeRecord, events: &mut Vec<SessionEvent>) {
    let own = data.own_num == Some(node.num);
    let identity = match (&mut data.identity, own) {
        (Some(identity), true) => {
            identity.enrich(&node);
            Some(identity.clone())
        }
        _ => None,
    };
    events.push(SessionEvent::NodeUpdated(node));
    if let Some(identity) = identity {
        events.push(SessionEvent::IdentityResolved(identity));
    }
}

/// Replace a channel slot wholesale.
fn store_channel(data: &mut SessionData, record: ChannelRecord, events: &mut Vec<SessionEvent>) {
    if record.index >= MAX_CHANNELS {
        warn!(index = record.index, "ignoring channel outside slot range");
        return;
    }
    if record.role != ChannelRole::Disabled {
        events.push(SessionEvent::ChannelUpdated(channel_info(
            &record,
            data.lora.as_ref(),
        )));
    }
    data.channels.insert(record.index, record);
}

fn sender_name(data: &SessionData, from: NodeNum) -> String {
    data.nodes
        .get(&from)
        .map(|n| n.display_name().to_string())
        .unwrap_or_else(|| node_id(from))
}

fn message(
    data: &SessionData,
    packet: &MeshPacket,
    kind: MessageKind,
    text: String,
) -> SessionEvent {
    SessionEvent::MessageReceived(ReceivedMessage {
        kind,
        from: packet.from,
        from_name: sender_name(data, packet.from),
        to: packet.to,
        channel: ChannelRef::from_packet(packet.channel),
        text,
        rx_snr: packet.rx_snr,
        rx_rssi: packet.rx_rssi,
        via_mqtt: packet.via_mqtt,
        received_at: SystemTime::now(),
    })
}

fn apply_packet(data: &mut SessionData, packet: MeshPacket, events: &mut Vec<SessionEvent>) {
    let app = match &packet.payload {
        PacketPayload::App(app) => app,
        PacketPayload::Encrypted(bytes) => {
            debug!(from = %node_id(packet.from), len = bytes.len(), "encrypted packet");
            let event = message(data, &packet, MessageKind::Encrypted, String::new());
            events.push(event);
            return;
        }
        PacketPayload::Empty => return,
    };

    match app {
        AppPayload::Text(text) => {
            let event = message(data, &packet, MessageKind::Text, text.clone());
            events.push(event);
        }
        AppPayload::NodeInfo(user) => {
            let node = data
                .nodes
                .entry(packet.from)
                .or_insert_with(|| NodeRecord::new(packet.from));
            node.apply_user(user);
            node.snr = Some(packet.rx_snr);
            node.rssi = Some(packet.rx_rssi);
            node.last_heard = unix_now();
            let node = node.clone();
            node_changed(data, node, events);
        }
        AppPayload::Position(pos) => {
            let Some(node) = data.nodes.get_mut(&packet.from) else {
                debug!(from = %node_id(packet.from), "position from unknown node dropped");
                return;
            };
            if pos.is_fix() {
                node.position = Some(*pos);
            } else {
                trace!(node = %node.id, "position without fix");
            }
            node.last_heard = unix_now();
            events.push(SessionEvent::NodeUpdated(node.clone()));
        }
        AppPayload::Telemetry(metrics) => {
            let Some(node) = data.nodes.get_mut(&packet.from) else {
                return;
            };
            if let Some(level) = metrics.and_then(|m| m.battery_level) {
                node.battery_level = Some(level);
            }
            node.last_heard = unix_now();
            events.push(SessionEvent::NodeUpdated(node.clone()));
        }
        AppPayload::Admin(AdminPayload::ChannelResponse(record)) => {
            let summary = format!("channel {} response", record.index);
            debug!(index = record.index, role = ?record.role, "channel response");
            if record.index < MAX_CHANNELS {
                data.confirmed.insert(record.index);
            }
            store_channel(data, record.clone(), events);
            let event = message(data, &packet, MessageKind::Admin, summary);
            events.push(event);
        }
        AppPayload::Admin(AdminPayload::ConfigResponse(lora)) => {
            if let Some(lora) = lora {
                data.lora = Some(lora.clone());
                events.push(SessionEvent::RadioConfigUpdated(lora.clone()));
            }
            let event = message(data, &packet, MessageKind::Admin, "config response".into());
            events.push(event);
        }
        AppPayload::Admin(AdminPayload::Other) => {
            let event = message(data, &packet, MessageKind::Admin, "admin message".into());
            events.push(event);
        }
        AppPayload::Other { port, len } => {
            trace!(port, len, from = %node_id(packet.from), "unhandled port");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::{DeviceMetrics, Position, UserInfo};

    fn packet(from: NodeNum, payload: PacketPayload) -> MeshPacket {
        MeshPacket {
            from,
            to: 0xFFFF_FFFF,
            channel: 0,
            id: 1,
            rx_snr: 6.5,
            rx_rssi: -90,
            hop_limit: 3,
            via_mqtt: false,
            payload,
        }
    }

    fn user(long: &str) -> UserInfo {
        UserInfo {
            id: String::new(),
            long_name: long.into(),
            short_name: String::new(),
            hw_model: 9,
        }
    }

    fn run(data: &mut SessionData, inbound: Inbound) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        apply(data, inbound, &mut events);
        events
    }

    #[test]
    fn own_node_info_enriches_identity_after_node_event() {
        let mut data = SessionData::default();
        run(&mut data, Inbound::MyInfo { node_num: 42 });
        let events = run(
            &mut data,
            Inbound::Packet(packet(42, PacketPayload::App(AppPayload::NodeInfo(user("Me"))))),
        );
        assert!(matches!(events[0], SessionEvent::NodeUpdated(ref n) if n.num == 42));
        assert!(
            matches!(events[1], SessionEvent::IdentityResolved(ref id) if id.long_name == "Me")
        );
        assert_eq!(data.nodes[&42].rssi, Some(-90));
    }

    #[test]
    fn position_ignores_unknown_nodes_and_missing_fix() {
        let mut data = SessionData::default();
        let fix = Position {
            latitude_i: 500_000_000,
            longitude_i: 80_000_000,
            altitude: 200,
        };
        let events = run(
            &mut data,
            Inbound::Packet(packet(7, PacketPayload::App(AppPayload::Position(fix)))),
        );
        assert!(events.is_empty());
        assert!(data.nodes.is_empty());

        data.nodes.insert(7, NodeRecord::new(7));
        run(
            &mut data,
            Inbound::Packet(packet(7, PacketPayload::App(AppPayload::Position(fix)))),
        );
        let no_fix = Position {
            latitude_i: 0,
            longitude_i: 0,
            altitude: 0,
        };
        run(
            &mut data,
            Inbound::Packet(packet(7, PacketPayload::App(AppPayload::Position(no_fix)))),
        );
        assert_eq!(data.nodes[&7].position, Some(fix));
    }

    #[test]
    fn telemetry_refreshes_known_node() {
        let mut data = SessionData::default();
        data.nodes.insert(5, NodeRecord::new(5));
        let metrics = DeviceMetrics {
            battery_level: Some(87),
            voltage: Some(4.1),
            uptime_seconds: None,
        };
        let events = run(
            &mut data,
            Inbound::Packet(packet(
                5,
                PacketPayload::App(AppPayload::Telemetry(Some(metrics))),
            )),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(data.nodes[&5].battery_level, Some(87));
        assert!(data.nodes[&5].last_heard.is_some());
    }

    #[test]
    fn channel_report_replaces_slot_without_confirming() {
        let mut data = SessionData::default();
        let record = ChannelRecord {
            index: 1,
            role: ChannelRole::Secondary,
            name: "Alt".into(),
            settings_raw: Vec::new(),
            psk: Vec::new(),
            uplink_enabled: true,
            downlink_enabled: false,
        };
        run(&mut data, Inbound::Channel(record.clone()));
        let renamed = ChannelRecord {
            name: "Neu".into(),
            uplink_enabled: false,
            ..record
        };
        run(&mut data, Inbound::Channel(renamed));
        assert_eq!(data.channels[&1].name, "Neu");
        assert!(!data.channels[&1].uplink_enabled);
        assert!(data.confirmed.is_empty());
    }

    #[test]
    fn disabled_channel_is_stored_silently() {
        let mut data = SessionData::default();
        let events = run(
            &mut data,
            Inbound::Channel(ChannelRecord {
                index: 6,
                role: ChannelRole::Disabled,
                name: String::new(),
                settings_raw: Vec::new(),
                psk: Vec::new(),
                uplink_enabled: false,
                downlink_enabled: false,
            }),
        );
        assert!(events.is_empty());
        assert!(data.channels.contains_key(&6));
    }

    #[test]
    fn encrypted_packet_names_sender_by_id() {
        let mut data = SessionData::default();
        let events = run(
            &mut data,
            Inbound::Packet(packet(
                0xAB,
                PacketPayload::Encrypted(bytes::Bytes::from_static(&[1, 2, 3])),
            )),
        );
        let SessionEvent::MessageReceived(message) = &events[0] else {
            panic!("expected message");
        };
        assert_eq!(message.kind, MessageKind::Encrypted);
        assert_eq!(message.from_name, "!000000ab");
    }

    #[test]
    fn config_complete_sets_flag() {
        let mut data = SessionData::default();
        assert!(run(&mut data, Inbound::ConfigComplete { id: 9 }).is_empty());
        assert!(data.config_complete);
    }
}
