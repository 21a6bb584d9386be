use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use meshlink_session::{
    ChannelInfo, ChannelRole, MessageKind, NodeRecord, ReconcileOutcome, SessionEvent,
};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct EventOutput<'a> {
    #[serde(flatten)]
    event: &'a SessionEvent,
    timestamp: String,
}

pub fn print_event(event: &SessionEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = EventOutput {
                event,
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let (kind, detail) = summarize(event);
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "DETAIL"])
                .add_row(vec![kind.to_string(), detail]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let (kind, detail) = summarize(event);
            println!("{kind}: {detail}");
        }
    }
}

/// Event name plus a one-line description.
pub fn summarize(event: &SessionEvent) -> (&'static str, String) {
    match event {
        SessionEvent::StateChanged(state) => ("state", state.to_string()),
        SessionEvent::NodeUpdated(node) => ("node", describe_node(node)),
        SessionEvent::ChannelUpdated(channel) => (
            "channel",
            format!(
                "#{} {} ({}, {})",
                channel.index,
                channel.name,
                role_name(channel.role),
                channel.encryption
            ),
        ),
        SessionEvent::RadioConfigUpdated(lora) => (
            "radio",
            format!(
                "region={} preset={} hop_limit={} tx_power={}",
                lora.region_name(),
                lora.modem_preset.display_name(),
                lora.hop_limit,
                lora.tx_power
            ),
        ),
        SessionEvent::IdentityResolved(identity) => (
            "identity",
            format!("{} {}", identity.id, identity.long_name).trim_end().to_string(),
        ),
        SessionEvent::MessageReceived(message) => {
            let body = match message.kind {
                MessageKind::Text | MessageKind::Admin => message.text.clone(),
                MessageKind::Encrypted => "<encrypted>".to_string(),
            };
            (
                "message",
                format!(
                    "[{}] {} -> {:08x}: {} (snr={} rssi={})",
                    message.channel,
                    message.from_name,
                    message.to,
                    body,
                    message.rx_snr,
                    message.rx_rssi
                ),
            )
        }
        SessionEvent::PacketCountChanged(count) => ("packets", count.to_string()),
        SessionEvent::DeviceLog(line) => ("device", line.clone()),
    }
}

fn describe_node(node: &NodeRecord) -> String {
    let mut text = format!("{} {}", node.id, node.display_name());
    if let Some(battery) = node.battery_level {
        text.push_str(&format!(" battery={battery}%"));
    }
    if let Some(snr) = node.snr {
        text.push_str(&format!(" snr={snr}"));
    }
    if let Some(position) = node.position.filter(|p| p.is_fix()) {
        text.push_str(&format!(
            " pos={:.5},{:.5}",
            position.latitude(),
            position.longitude()
        ));
    }
    text
}

#[derive(Serialize)]
struct ChannelsOutput<'a> {
    channels: &'a [ChannelInfo],
    #[serde(skip_serializing_if = "Option::is_none")]
    reconcile: Option<&'a ReconcileOutcome>,
}

pub fn print_channels(
    channels: &[ChannelInfo],
    reconcile: Option<&ReconcileOutcome>,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => print_json(&ChannelsOutput {
            channels,
            reconcile,
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["INDEX", "NAME", "ROLE", "ENCRYPTION", "UPLINK", "DOWNLINK"]);
            for channel in channels {
                table.add_row(vec![
                    channel.index.to_string(),
                    channel.name.clone(),
                    role_name(channel.role).to_string(),
                    channel.encryption.to_string(),
                    channel.uplink_enabled.to_string(),
                    channel.downlink_enabled.to_string(),
                ]);
            }
            println!("{table}");
            print_missing(reconcile);
        }
        OutputFormat::Pretty => {
            for channel in channels {
                println!(
                    "#{} name={} role={} encryption={}",
                    channel.index,
                    channel.name,
                    role_name(channel.role),
                    channel.encryption
                );
            }
            print_missing(reconcile);
        }
    }
}

fn print_missing(reconcile: Option<&ReconcileOutcome>) {
    if let Some(outcome) = reconcile.filter(|o| !o.missing.is_empty()) {
        println!(
            "no answer for slots {:?} after {} rounds",
            outcome.missing, outcome.rounds
        );
    }
}

/// Row-shaped listing used by `ports` and `scan`.
pub fn print_rows<R: Serialize>(
    header: &[&str],
    rows: &[R],
    cells: impl Fn(&R) -> Vec<String>,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => {
            for row in rows {
                print_json(row);
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(header.to_vec());
            for row in rows {
                table.add_row(cells(row));
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in rows {
                println!("{}", cells(row).join("  "));
            }
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn role_name(role: ChannelRole) -> &'static str {
    match role {
        ChannelRole::Primary => "primary",
        ChannelRole::Secondary => "secondary",
        ChannelRole::Disabled => "disabled",
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use meshlink_session::SessionState;

    use super::*;

    #[test]
    fn event_json_is_tagged() {
        let event = SessionEvent::StateChanged(SessionState::Ready);
        let out = EventOutput {
            event: &event,
            timestamp: "1".into(),
        };
        let json = serde_json::to_value(&out).expect("event should serialize");
        assert_eq!(json["event"], "state_changed");
        assert_eq!(json["data"], "ready");
        assert_eq!(json["timestamp"], "1");
    }

    #[test]
    fn summaries_name_the_event() {
        let (kind, detail) = summarize(&SessionEvent::PacketCountChanged(42));
        assert_eq!(kind, "packets");
        assert_eq!(detail, "42");

        let (kind, detail) = summarize(&SessionEvent::DeviceLog("INFO | boot".into()));
        assert_eq!(kind, "device");
        assert_eq!(detail, "INFO | boot");
    }

    #[test]
    fn node_summary_skips_missing_fix() {
        let mut node = NodeRecord::new(0xAABBCCDD);
        node.long_name = "Home".into();
        node.battery_level = Some(87);
        assert_eq!(describe_node(&node), "!aabbccdd Home battery=87%");
    }
}
