//! Device console lines.

use tracing::{debug, warn};

const CRITICAL_MARKERS: [&str; 6] = ["critical", "fault", "assert", "panic", "brownout", "reboot"];

/// Firmware critical error codes and what they mean.
const CRITICAL_CODES: [(&str, &str); 12] = [
    ("TxWatchdog", "software bug while transmitting"),
    ("SleepEnterWait", "software bug while entering sleep"),
    ("NoRadio", "no LoRa radio found"),
    ("UBloxInitFailed", "GPS initialization failed"),
    ("NoAXP192", "power management chip missing or broken"),
    ("InvalidRadioSetting", "invalid radio setting, behaviour undefined"),
    ("TransmitFailed", "radio transmit hardware failure"),
    ("Brownout", "CPU voltage dropped below minimum"),
    ("SX1262Failure", "SX1262 self test failed"),
    ("RadioSpiBug", "SPI error while transmitting"),
    (
        "FlashCorruptionRecoverable",
        "flash corruption detected and repaired",
    ),
    (
        "FlashCorruptionUnrecoverable",
        "flash corruption detected, device needs reconfiguration",
    ),
];

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack
        .to_ascii_lowercase()
        .contains(&needle.to_ascii_lowercase())
}

/// True for lines reporting a fault, crash or reboot.
pub fn is_critical(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    CRITICAL_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Explanation for the first known critical error code named in `line`.
///
/// Longer codes are tried first so `FlashCorruptionUnrecoverable` is not
/// reported as its recoverable prefix.
pub fn explain(line: &str) -> Option<&'static str> {
    let mut codes = CRITICAL_CODES;
    codes.sort_by_key(|(code, _)| std::cmp::Reverse(code.len()));
    codes
        .iter()
        .find(|(code, _)| contains_ignore_case(line, code))
        .map(|(_, meaning)| *meaning)
}

/// Log one device console line.
pub fn log_line(line: &str) {
    if is_critical(line) {
        match explain(line) {
            Some(meaning) => warn!(line, meaning, "device reported critical error"),
            None => warn!(line, "device reported critical condition"),
        }
    } else {
        debug!(target: "meshlink::device", "{line}");
    }
}
