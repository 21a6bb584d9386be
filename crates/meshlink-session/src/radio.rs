//! Radio domain model: nodes, channels and the LoRa configuration.

use std::fmt;

use serde::Serialize;

/// Node number as assigned by the firmware.
pub type NodeNum = u32;

/// Destination for messages addressed to everyone.
pub const BROADCAST: NodeNum = 0xFFFF_FFFF;

/// Channel slots a radio exposes. Index 0 is the primary channel.
pub const MAX_CHANNELS: u32 = 8;

/// `!aabbccdd` form used by the firmware for user ids.
pub fn node_id(num: NodeNum) -> String {
    format!("!{num:08x}")
}

/// A position fix in firmware fixed-point units (degrees × 1e7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub latitude_i: i32,
    pub longitude_i: i32,
    pub altitude: i32,
}

impl Position {
    pub fn latitude(&self) -> f64 {
        f64::from(self.latitude_i) * 1e-7
    }

    pub fn longitude(&self) -> f64 {
        f64::from(self.longitude_i) * 1e-7
    }

    /// Devices without a GPS lock report 0/0.
    pub fn is_fix(&self) -> bool {
        self.latitude_i != 0 || self.longitude_i != 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DeviceMetrics {
    pub battery_level: Option<u32>,
    pub voltage: Option<f32>,
    pub uptime_seconds: Option<u32>,
}

/// Identity a node advertises about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub id: String,
    pub long_name: String,
    pub short_name: String,
    pub hw_model: i32,
}

/// Everything known about one node of the mesh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRecord {
    pub num: NodeNum,
    pub id: String,
    pub long_name: String,
    pub short_name: String,
    pub hw_model: Option<i32>,
    pub position: Option<Position>,
    pub battery_level: Option<u32>,
    pub snr: Option<f32>,
    pub rssi: Option<i32>,
    /// Unix seconds.
    pub last_heard: Option<u64>,
}

impl NodeRecord {
    pub fn new(num: NodeNum) -> Self {
        Self {
            num,
            id: node_id(num),
            long_name: String::new(),
            short_name: String::new(),
            hw_model: None,
            position: None,
            battery_level: None,
            snr: None,
            rssi: None,
            last_heard: None,
        }
    }

    pub fn apply_user(&mut self, user: &UserInfo) {
        if !user.id.is_empty() {
            self.id.clone_from(&user.id);
        }
        if !user.long_name.is_empty() {
            self.long_name.clone_from(&user.long_name);
        }
        if !user.short_name.is_empty() {
            self.short_name.clone_from(&user.short_name);
        }
        self.hw_model = Some(user.hw_model);
    }

    /// Best human-readable name.
    pub fn display_name(&self) -> &str {
        if !self.long_name.is_empty() {
            &self.long_name
        } else if !self.short_name.is_empty() {
            &self.short_name
        } else {
            &self.id
        }
    }
}

/// The connected radio's own identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    pub node_num: NodeNum,
    pub id: String,
    pub long_name: String,
    pub short_name: String,
    pub hw_model: Option<i32>,
}

impl DeviceIdentity {
    pub fn new(node_num: NodeNum) -> Self {
        Self {
            node_num,
            id: node_id(node_num),
            long_name: String::new(),
            short_name: String::new(),
            hw_model: None,
        }
    }

    pub fn enrich(&mut self, node: &NodeRecord) {
        self.id.clone_from(&node.id);
        if !node.long_name.is_empty() {
            self.long_name.clone_from(&node.long_name);
        }
        if !node.short_name.is_empty() {
            self.short_name.clone_from(&node.short_name);
        }
        if node.hw_model.is_some() {
            self.hw_model = node.hw_model;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelRole {
    Disabled,
    Primary,
    Secondary,
}

impl ChannelRole {
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => Self::Primary,
            2 => Self::Secondary,
            _ => Self::Disabled,
        }
    }
}

/// A channel slot as reported by the radio.
#[derive(Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub index: u32,
    pub role: ChannelRole,
    /// Name as decoded by the codec. May be lossy.
    pub name: String,
    /// Encoded channel settings, kept for name recovery.
    pub settings_raw: Vec<u8>,
    pub psk: Vec<u8>,
    pub uplink_enabled: bool,
    pub downlink_enabled: bool,
}

impl fmt::Debug for ChannelRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRecord")
            .field("index", &self.index)
            .field("role", &self.role)
            .field("name", &self.name)
            .field("settings_raw", &format_args!("<{} bytes>", self.settings_raw.len()))
            .field("psk", &format_args!("<redacted:{} bytes>", self.psk.len()))
            .field("uplink_enabled", &self.uplink_enabled)
            .field("downlink_enabled", &self.downlink_enabled)
            .finish()
    }
}

/// How a channel's traffic is encrypted, derived from its key length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "key")]
pub enum Encryption {
    None,
    /// One-byte shorthand selecting a well-known key.
    Shorthand(u8),
    Aes128,
    Aes256,
    Unknown,
}

impl Encryption {
    pub fn from_psk(psk: &[u8]) -> Self {
        match psk.len() {
            0 => Self::None,
            1 => Self::Shorthand(psk[0]),
            16 => Self::Aes128,
            32 => Self::Aes256,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Encryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Shorthand(0) => f.write_str("none (shorthand)"),
            Self::Shorthand(1) => f.write_str("default key"),
            Self::Shorthand(n) => write!(f, "default key #{n}"),
            Self::Aes128 => f.write_str("AES-128"),
            Self::Aes256 => f.write_str("AES-256"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// A channel as presented to event consumers, with its name resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    pub index: u32,
    pub name: String,
    pub role: ChannelRole,
    pub encryption: Encryption,
    pub uplink_enabled: bool,
    pub downlink_enabled: bool,
}

/// Named LoRa modem presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModemPreset {
    LongFast,
    LongSlow,
    VeryLongSlow,
    MediumSlow,
    MediumFast,
    ShortSlow,
    ShortFast,
    LongModerate,
    ShortTurbo,
    Unknown(i32),
}

impl ModemPreset {
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => Self::LongFast,
            1 => Self::LongSlow,
            2 => Self::VeryLongSlow,
            3 => Self::MediumSlow,
            4 => Self::MediumFast,
            5 => Self::ShortSlow,
            6 => Self::ShortFast,
            7 => Self::LongModerate,
            8 => Self::ShortTurbo,
            other => Self::Unknown(other),
        }
    }

    /// Name the firmware shows for an unnamed primary channel.
    pub fn display_name(&self) -> String {
        match self {
            Self::LongFast => "LongFast".into(),
            Self::LongSlow => "LongSlow".into(),
            Self::VeryLongSlow => "VeryLongSlow".into(),
            Self::MediumSlow => "MediumSlow".into(),
            Self::MediumFast => "MediumFast".into(),
            Self::ShortSlow => "ShortSlow".into(),
            Self::ShortFast => "ShortFast".into(),
            Self::LongModerate => "LongModerate".into(),
            Self::ShortTurbo => "ShortTurbo".into(),
            Self::Unknown(n) => format!("Preset{n}"),
        }
    }
}

/// LoRa radio configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoraConfig {
    pub use_preset: bool,
    pub modem_preset: ModemPreset,
    pub bandwidth: u32,
    pub spread_factor: u32,
    pub coding_rate: u32,
    pub region: i32,
    pub hop_limit: u32,
    pub tx_enabled: bool,
    pub tx_power: i32,
    pub channel_num: u32,
}

impl LoraConfig {
    pub fn region_name(&self) -> &'static str {
        region_name(self.region)
    }
}

/// Regulatory region codes.
pub fn region_name(code: i32) -> &'static str {
    match code {
        0 => "UNSET",
        1 => "US",
        2 => "EU_433",
        3 => "EU_868",
        4 => "CN",
        5 => "JP",
        6 => "ANZ",
        7 => "KR",
        8 => "TW",
        9 => "RU",
        10 => "IN",
        11 => "NZ_865",
        12 => "TH",
        13 => "LORA_24",
        14 => "UA_433",
        15 => "UA_868",
        16 => "MY_433",
        17 => "MY_919",
        18 => "SG_923",
        _ => "UNKNOWN",
    }
}

/// Channel a received message travelled on.
///
/// Slots 0–7 are reported by index. Anything larger is a channel hash from a
/// channel this radio does not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRef {
    Index(u32),
    Hash(u8),
}

impl ChannelRef {
    pub fn from_packet(channel: u32) -> Self {
        if channel < MAX_CHANNELS {
            Self::Index(channel)
        } else {
            Self::Hash((channel & 0xFF) as u8)
        }
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{index}"),
            Self::Hash(hash) => write!(f, "other channel ({hash})"),
        }
    }
}
