use std::path::Path;
use std::time::Duration;

use meshlink_frame::AssemblerConfig;
use serde::{Deserialize, Serialize};

/// Timings and limits for a device session.
///
/// Every duration (de)serializes as integer milliseconds, so overrides can be
/// kept in a small JSON file. Missing fields keep their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Pause after the link opens before talking to the radio.
    #[serde(with = "millis", rename = "settle_delay_ms")]
    pub settle_delay: Duration,
    /// Wakeup bytes sent before the config request (byte streams only).
    pub wakeup_len: usize,
    #[serde(with = "millis", rename = "wakeup_wait_ms")]
    pub wakeup_wait: Duration,

    #[serde(with = "millis", rename = "config_poll_interval_ms")]
    pub config_poll_interval: Duration,
    /// Ceiling for the config-complete marker.
    #[serde(with = "millis", rename = "config_complete_timeout_ms")]
    pub config_complete_timeout: Duration,

    #[serde(with = "millis", rename = "backlog_poll_interval_ms")]
    pub backlog_poll_interval: Duration,
    /// Consecutive polls with an unchanged, non-zero node count.
    pub backlog_stable_polls: u32,
    /// Ceiling for the node backlog to drain.
    #[serde(with = "millis", rename = "backlog_timeout_ms")]
    pub backlog_timeout: Duration,

    /// Node replay yields after this many records.
    pub replay_batch: usize,
    #[serde(with = "millis", rename = "replay_yield_ms")]
    pub replay_yield: Duration,
    #[serde(with = "millis", rename = "channel_replay_pacing_ms")]
    pub channel_replay_pacing: Duration,

    pub reconcile_rounds: u32,
    #[serde(with = "millis", rename = "channel_request_pacing_ms")]
    pub channel_request_pacing: Duration,
    #[serde(with = "millis", rename = "reconcile_round_wait_ms")]
    pub reconcile_round_wait: Duration,

    /// Frame silence (with text still arriving) before recovery kicks in.
    #[serde(with = "millis", rename = "recovery_silence_ms")]
    pub recovery_silence: Duration,
    pub recovery_wakeup_len: usize,
    #[serde(with = "millis", rename = "recovery_wakeup_wait_ms")]
    pub recovery_wakeup_wait: Duration,
    #[serde(with = "millis", rename = "recovery_settle_ms")]
    pub recovery_settle: Duration,

    /// Hop limit stamped on outgoing text messages.
    pub hop_limit: u32,

    /// Frame assembler limits. Not part of the JSON form.
    #[serde(skip)]
    pub assembler: AssemblerConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(1),
            wakeup_len: 64,
            wakeup_wait: Duration::from_millis(500),
            config_poll_interval: Duration::from_millis(100),
            config_complete_timeout: Duration::from_secs(15),
            backlog_poll_interval: Duration::from_millis(500),
            backlog_stable_polls: 6,
            backlog_timeout: Duration::from_secs(30),
            replay_batch: 10,
            replay_yield: Duration::from_millis(10),
            channel_replay_pacing: Duration::from_millis(50),
            reconcile_rounds: 3,
            channel_request_pacing: Duration::from_millis(1500),
            reconcile_round_wait: Duration::from_secs(5),
            recovery_silence: Duration::from_secs(60),
            recovery_wakeup_len: 32,
            recovery_wakeup_wait: Duration::from_millis(500),
            recovery_settle: Duration::from_secs(3),
            hop_limit: 7,
            assembler: AssemblerConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Parse overrides from JSON.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Load overrides from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text).map_err(std::io::Error::other)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
