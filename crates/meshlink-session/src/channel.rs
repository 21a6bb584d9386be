//! Channel display names.

use crate::radio::{ChannelInfo, ChannelRecord, ChannelRole, Encryption, LoraConfig};

/// Protobuf key for field 3, wire type 2 (length-delimited): the name field.
const NAME_FIELD_KEY: u8 = (3 << 3) | 2;

/// A usable channel name: no control characters beyond `\n\r\t` and no
/// replacement characters from a lossy decode.
pub fn is_valid_name(name: &str) -> bool {
    !name
        .chars()
        .any(|c| c == '\u{FFFD}' || (c.is_control() && !matches!(c, '\n' | '\r' | '\t')))
}

/// Recover a name by scanning encoded channel settings for the name field.
///
/// Some firmware builds emit settings the regular decoder reads back as an
/// empty or garbled name. Only single-byte lengths are considered.
pub fn scan_name_field(raw: &[u8]) -> Option<String> {
    if raw.len() < 3 {
        return None;
    }
    for i in 0..raw.len() - 2 {
        if raw[i] != NAME_FIELD_KEY || raw[i + 1] & 0x80 != 0 {
            continue;
        }
        let len = usize::from(raw[i + 1]);
        let start = i + 2;
        let Some(bytes) = raw.get(start..start + len) else {
            continue;
        };
        let name = String::from_utf8_lossy(bytes);
        let name = name.trim();
        if !name.is_empty() && is_valid_name(name) {
            return Some(name.to_string());
        }
    }
    None
}

/// Resolve the name shown for a channel.
///
/// Order: the decoded name when valid, then the raw settings scan, then the
/// modem preset name for an unnamed primary channel, then `Channel {index}`.
pub fn display_name(record: &ChannelRecord, lora: Option<&LoraConfig>) -> String {
    let decoded = record.name.trim();
    if !decoded.is_empty() && is_valid_name(decoded) {
        return decoded.to_string();
    }
    if let Some(name) = scan_name_field(&record.settings_raw) {
        return name;
    }
    if record.role == ChannelRole::Primary {
        if let Some(lora) = lora {
            return lora.modem_preset.display_name();
        }
    }
    format!("Channel {}", record.index)
}

/// Presentation form of a stored channel.
pub fn channel_info(record: &ChannelRecord, lora: Option<&LoraConfig>) -> ChannelInfo {
    ChannelInfo {
        index: record.index,
        name: display_name(record, lora),
        role: record.role,
        encryption: Encryption::from_psk(&record.psk),
        uplink_enabled: record.uplink_enabled,
        downlink_enabled: record.downlink_enabled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::ModemPreset;

    fn record(index: u32, role: ChannelRole, name: &str, raw: &[u8]) -> ChannelRecord {
        ChannelRecord {
            index,
            role,
            name: name.to_string(),
            settings_raw: raw.to_vec(),
            psk: vec![1],
            uplink_enabled: false,
            downlink_enabled: false,
        }
    }

    fn lora(preset: ModemPreset) -> LoraConfig {
        LoraConfig {
            use_preset: true,
            modem_preset: preset,
            bandwidth: 0,
            spread_factor: 0,
            coding_rate: 0,
            region: 3,
            hop_limit: 3,
            tx_enabled: true,
            tx_power: 27,
            channel_num: 0,
        }
    }

    #[test]
    fn decoded_name_wins() {
        let raw = [0x1A, 0x03, b'A', b'B', b'C'];
        let rec = record(1, ChannelRole::Secondary, " Hessen ", &raw);
        assert_eq!(display_name(&rec, None), "Hessen");
    }

    #[test]
    fn scan_skips_truncated_candidates() {
        let raw = [0x1A, 0x20, 0x1A, 0x02, b'o', b'k'];
        assert_eq!(scan_name_field(&raw), Some("ok".to_string()));
        assert_eq!(scan_name_field(&[0x1A, 0x05, b'x']), None);
        assert_eq!(scan_name_field(&[0x1A]), None);
    }

    #[test]
    fn unnamed_primary_uses_preset() {
        let rec = record(0, ChannelRole::Primary, "", &[0x12, 0x01, 0x01]);
        assert_eq!(
            display_name(&rec, Some(&lora(ModemPreset::MediumFast))),
            "MediumFast"
        );
        assert_eq!(display_name(&rec, None), "Channel 0");
    }

    #[test]
    fn unnamed_secondary_uses_index() {
        let rec = record(5, ChannelRole::Secondary, "", &[]);
        assert_eq!(
            display_name(&rec, Some(&lora(ModemPreset::LongFast))),
            "Channel 5"
        );
    }

    #[test]
    fn control_characters_invalidate() {
        assert!(is_valid_name("line\tone"));
        assert!(!is_valid_name("bad\u{7}bell"));
        assert!(!is_valid_name("lossy\u{FFFD}"));
    }

    #[test]
    fn info_carries_encryption() {
        let rec = record(0, ChannelRole::Primary, "Main", &[]);
        let info = channel_info(&rec, None);
        assert_eq!(info.name, "Main");
        assert_eq!(info.encryption, Encryption::Shorthand(1));
    }
}
