use std::time::Duration;

use meshlink_frame::{HEADER_SIZE, MARKER, MAX_PAYLOAD};
use meshlink_session::SessionConfig;
use meshlink_transport::{DEFAULT_BAUD_RATE, DEFAULT_TCP_PORT};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("meshlink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: meshlink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("MESHLINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "links: serial={}, tcp=true, ble={}",
        cfg!(feature = "serial"),
        cfg!(feature = "ble")
    );
    for (key, value) in radio_defaults(&SessionConfig::default()) {
        println!("{key}: {value}");
    }

    Ok(SUCCESS)
}

fn seconds(duration: Duration) -> String {
    format!("{}s", duration.as_secs_f64())
}

/// Link and session parameters a radio is driven with unless overridden.
fn radio_defaults(config: &SessionConfig) -> Vec<(&'static str, String)> {
    vec![
        ("serial_baud", DEFAULT_BAUD_RATE.to_string()),
        ("tcp_port", DEFAULT_TCP_PORT.to_string()),
        (
            "frame_marker",
            format!("{:02X} {:02X}", MARKER[0], MARKER[1]),
        ),
        ("frame_header", HEADER_SIZE.to_string()),
        ("frame_max_payload", MAX_PAYLOAD.to_string()),
        ("receive_buffer_max", config.assembler.max_buffer.to_string()),
        ("wakeup_bytes", config.wakeup_len.to_string()),
        (
            "config_complete_timeout",
            seconds(config.config_complete_timeout),
        ),
        (
            "node_backlog",
            format!(
                "{} stable polls every {}, at most {}",
                config.backlog_stable_polls,
                seconds(config.backlog_poll_interval),
                seconds(config.backlog_timeout)
            ),
        ),
        ("channel_reconcile_rounds", config.reconcile_rounds.to_string()),
        ("recovery_silence", seconds(config.recovery_silence)),
        ("hop_limit", config.hop_limit.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(rows: &'a [(&'static str, String)], key: &str) -> &'a str {
        rows.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
            .expect("key should be listed")
    }

    #[test]
    fn defaults_describe_the_radio_link() {
        let rows = radio_defaults(&SessionConfig::default());
        assert_eq!(lookup(&rows, "serial_baud"), "115200");
        assert_eq!(lookup(&rows, "tcp_port"), "4403");
        assert_eq!(lookup(&rows, "frame_marker"), "94 C3");
        assert_eq!(lookup(&rows, "frame_max_payload"), "512");
        assert_eq!(
            lookup(&rows, "node_backlog"),
            "6 stable polls every 0.5s, at most 30s"
        );
        assert_eq!(lookup(&rows, "recovery_silence"), "60s");
    }

    #[test]
    fn overrides_show_through() {
        let config = SessionConfig {
            reconcile_rounds: 0,
            recovery_silence: Duration::from_millis(1500),
            ..SessionConfig::default()
        };
        let rows = radio_defaults(&config);
        assert_eq!(lookup(&rows, "channel_reconcile_rounds"), "0");
        assert_eq!(lookup(&rows, "recovery_silence"), "1.5s");
    }
}
