//! Wire messages exchanged with the radio firmware.
//!
//! Only the fields the session routes on are declared; prost skips the rest.
//! Field numbers follow the firmware's published `mesh.proto`, `channel.proto`,
//! `config.proto`, `admin.proto` and `telemetry.proto`.

/// Application port numbers carried in [`Data::portnum`].
pub mod port {
    pub const TEXT_MESSAGE: i32 = 1;
    pub const POSITION: i32 = 3;
    pub const NODEINFO: i32 = 4;
    pub const ROUTING: i32 = 5;
    pub const ADMIN: i32 = 6;
    pub const TELEMETRY: i32 = 67;
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FromRadio {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(oneof = "from_radio::PayloadVariant", tags = "2, 3, 4, 5, 7, 8, 9, 10")]
    pub payload_variant: ::core::option::Option<from_radio::PayloadVariant>,
}

pub mod from_radio {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        #[prost(message, tag = "2")]
        Packet(super::MeshPacket),
        #[prost(message, tag = "3")]
        MyInfo(super::MyNodeInfo),
        #[prost(message, tag = "4")]
        NodeInfo(super::NodeInfo),
        #[prost(message, tag = "5")]
        Config(super::Config),
        #[prost(uint32, tag = "7")]
        ConfigCompleteId(u32),
        #[prost(bool, tag = "8")]
        Rebooted(bool),
        #[prost(message, tag = "9")]
        ModuleConfig(super::ModuleConfig),
        #[prost(message, tag = "10")]
        Channel(super::Channel),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ToRadio {
    #[prost(oneof = "to_radio::PayloadVariant", tags = "1, 3")]
    pub payload_variant: ::core::option::Option<to_radio::PayloadVariant>,
}

pub mod to_radio {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        #[prost(message, tag = "1")]
        Packet(super::MeshPacket),
        #[prost(uint32, tag = "3")]
        WantConfigId(u32),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MeshPacket {
    #[prost(fixed32, tag = "1")]
    pub from: u32,
    #[prost(fixed32, tag = "2")]
    pub to: u32,
    #[prost(uint32, tag = "3")]
    pub channel: u32,
    #[prost(oneof = "mesh_packet::PayloadVariant", tags = "4, 5")]
    pub payload_variant: ::core::option::Option<mesh_packet::PayloadVariant>,
    #[prost(fixed32, tag = "6")]
    pub id: u32,
    #[prost(fixed32, tag = "7")]
    pub rx_time: u32,
    #[prost(float, tag = "8")]
    pub rx_snr: f32,
    #[prost(uint32, tag = "9")]
    pub hop_limit: u32,
    #[prost(bool, tag = "10")]
    pub want_ack: bool,
    #[prost(int32, tag = "12")]
    pub rx_rssi: i32,
    #[prost(bool, tag = "14")]
    pub via_mqtt: bool,
    #[prost(uint32, tag = "15")]
    pub hop_start: u32,
}

pub mod mesh_packet {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        #[prost(message, tag = "4")]
        Decoded(super::Data),
        #[prost(bytes, tag = "5")]
        Encrypted(::prost::alloc::vec::Vec<u8>),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Data {
    #[prost(int32, tag = "1")]
    pub portnum: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: ::prost::alloc::vec::Vec<u8>,
    #[prost(bool, tag = "3")]
    pub want_response: bool,
    #[prost(fixed32, tag = "4")]
    pub dest: u32,
    #[prost(fixed32, tag = "5")]
    pub source: u32,
    #[prost(fixed32, tag = "6")]
    pub request_id: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MyNodeInfo {
    #[prost(uint32, tag = "1")]
    pub my_node_num: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeInfo {
    #[prost(uint32, tag = "1")]
    pub num: u32,
    #[prost(message, optional, tag = "2")]
    pub user: ::core::option::Option<User>,
    #[prost(message, optional, tag = "3")]
    pub position: ::core::option::Option<Position>,
    #[prost(float, tag = "4")]
    pub snr: f32,
    #[prost(fixed32, tag = "5")]
    pub last_heard: u32,
    #[prost(message, optional, tag = "6")]
    pub device_metrics: ::core::option::Option<DeviceMetrics>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct User {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub long_name: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub short_name: ::prost::alloc::string::String,
    #[prost(int32, tag = "5")]
    pub hw_model: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Position {
    #[prost(sfixed32, tag = "1")]
    pub latitude_i: i32,
    #[prost(sfixed32, tag = "2")]
    pub longitude_i: i32,
    #[prost(int32, tag = "3")]
    pub altitude: i32,
    #[prost(fixed32, tag = "4")]
    pub time: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceMetrics {
    #[prost(uint32, tag = "1")]
    pub battery_level: u32,
    #[prost(float, tag = "2")]
    pub voltage: f32,
    #[prost(float, tag = "3")]
    pub channel_utilization: f32,
    #[prost(float, tag = "4")]
    pub air_util_tx: f32,
    #[prost(uint32, tag = "5")]
    pub uptime_seconds: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Channel {
    #[prost(int32, tag = "1")]
    pub index: i32,
    /// Encoded [`ChannelSettings`], kept exactly as received so the name can
    /// be recovered from the raw bytes when the regular decode garbles it.
    #[prost(bytes = "vec", tag = "2")]
    pub settings: ::prost::alloc::vec::Vec<u8>,
    #[prost(int32, tag = "3")]
    pub role: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelSettings {
    #[prost(uint32, tag = "1")]
    pub channel_num: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub psk: ::prost::alloc::vec::Vec<u8>,
    /// Declared as bytes: some firmware builds emit names that are not UTF-8.
    #[prost(bytes = "vec", tag = "3")]
    pub name: ::prost::alloc::vec::Vec<u8>,
    #[prost(fixed32, tag = "4")]
    pub id: u32,
    #[prost(bool, tag = "5")]
    pub uplink_enabled: bool,
    #[prost(bool, tag = "6")]
    pub downlink_enabled: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Config {
    #[prost(oneof = "config::PayloadVariant", tags = "6")]
    pub payload_variant: ::core::option::Option<config::PayloadVariant>,
}

pub mod config {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        #[prost(message, tag = "6")]
        Lora(super::LoRaConfig),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoRaConfig {
    #[prost(bool, tag = "1")]
    pub use_preset: bool,
    #[prost(int32, tag = "2")]
    pub modem_preset: i32,
    #[prost(uint32, tag = "3")]
    pub bandwidth: u32,
    #[prost(uint32, tag = "4")]
    pub spread_factor: u32,
    #[prost(uint32, tag = "5")]
    pub coding_rate: u32,
    #[prost(float, tag = "6")]
    pub frequency_offset: f32,
    #[prost(int32, tag = "7")]
    pub region: i32,
    #[prost(uint32, tag = "8")]
    pub hop_limit: u32,
    #[prost(bool, tag = "9")]
    pub tx_enabled: bool,
    #[prost(int32, tag = "10")]
    pub tx_power: i32,
    #[prost(uint32, tag = "11")]
    pub channel_num: u32,
}

/// Module configuration sections are acknowledged but not interpreted.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModuleConfig {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AdminMessage {
    #[prost(oneof = "admin_message::PayloadVariant", tags = "1, 2, 6")]
    pub payload_variant: ::core::option::Option<admin_message::PayloadVariant>,
}

pub mod admin_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        /// One-based channel index.
        #[prost(uint32, tag = "1")]
        GetChannelRequest(u32),
        #[prost(message, tag = "2")]
        GetChannelResponse(super::Channel),
        #[prost(message, tag = "6")]
        GetConfigResponse(super::Config),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Telemetry {
    #[prost(fixed32, tag = "1")]
    pub time: u32,
    #[prost(oneof = "telemetry::Variant", tags = "2")]
    pub variant: ::core::option::Option<telemetry::Variant>,
}

pub mod telemetry {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Variant {
        #[prost(message, tag = "2")]
        DeviceMetrics(super::DeviceMetrics),
    }
}
