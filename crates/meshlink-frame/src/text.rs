//! Device console output interleaved with frames.

const ESC: u8 = 0x1B;

/// Minimum share of printable bytes for a run to count as console text.
pub const DEFAULT_TEXT_RATIO: f32 = 0.8;

/// Longest partial line held while waiting for a newline.
const MAX_PENDING_LINE: usize = 4 * 1024;

fn is_console_byte(b: u8) -> bool {
    matches!(b, 0x20..=0x7E | b'\n' | b'\r' | b'\t' | ESC)
}

/// Whether at least `ratio` of `bytes` look like console output.
pub fn is_diagnostic_text(bytes: &[u8], ratio: f32) -> bool {
    if bytes.is_empty() {
        return false;
    }
    let printable = bytes.iter().filter(|b| is_console_byte(**b)).count();
    printable as f32 / bytes.len() as f32 >= ratio
}

/// Remove ANSI escape sequences (`ESC [ ... letter`) and stray escapes.
pub fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c != ESC as char {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'[') {
            chars.next();
            for c in chars.by_ref() {
                if c.is_ascii_alphabetic() {
                    break;
                }
            }
        }
    }
    out
}

/// Buffers console text until newlines complete it into lines.
#[derive(Debug, Default)]
pub struct TextAccumulator {
    pending: String,
}

impl TextAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a text run and return every line it completes.
    ///
    /// Lines are trimmed, stripped of ANSI sequences, and empty lines are
    /// dropped. Bytes outside ASCII are shown as `?`.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending
            .extend(bytes.iter().map(|b| if b.is_ascii() { *b as char } else { '?' }));

        let Some(end) = self.pending.rfind('\n') else {
            if self.pending.len() > MAX_PENDING_LINE {
                let line = std::mem::take(&mut self.pending);
                return clean_line(&line).into_iter().collect();
            }
            return Vec::new();
        };

        let complete: String = self.pending.drain(..=end).collect();
        complete.split('\n').filter_map(clean_line).collect()
    }

    /// Text received since the last newline.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

fn clean_line(raw: &str) -> Option<String> {
    let line = strip_ansi(raw.trim_matches(|c| c == '\r' || c == ' '));
    let line = line.trim();
    (!line.is_empty()).then(|| line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printable_ratio() {
        assert!(is_diagnostic_text(b"INFO | boot ok\r\n", DEFAULT_TEXT_RATIO));
        assert!(!is_diagnostic_text(&[0x00, 0xFF, 0x10, b'a'], DEFAULT_TEXT_RATIO));
        // 4 of 5 printable is exactly the threshold.
        assert!(is_diagnostic_text(&[b'a', b'b', b'c', b'd', 0x00], DEFAULT_TEXT_RATIO));
        assert!(!is_diagnostic_text(&[], DEFAULT_TEXT_RATIO));
    }

    #[test]
    fn strips_color_codes() {
        assert_eq!(strip_ansi("\x1b[34mDEBUG\x1b[0m | ok"), "DEBUG | ok");
        assert_eq!(strip_ansi("a\x1bb"), "ab");
    }

    #[test]
    fn holds_partial_lines() {
        let mut acc = TextAccumulator::new();
        assert!(acc.push(b"INFO | Power").is_empty());
        assert_eq!(acc.pending(), "INFO | Power");

        let lines = acc.push(b" on\r\nDEBUG | x");
        assert_eq!(lines, vec!["INFO | Power on".to_string()]);
        assert_eq!(acc.pending(), "DEBUG | x");
    }

    #[test]
    fn drops_blank_lines() {
        let mut acc = TextAccumulator::new();
        let lines = acc.push(b"\r\n  \r\none\n\ntwo\n");
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
        assert!(acc.pending().is_empty());
    }

    #[test]
    fn flushes_runaway_line() {
        let mut acc = TextAccumulator::new();
        let lines = acc.push(&vec![b'x'; MAX_PENDING_LINE + 1]);
        assert_eq!(lines.len(), 1);
        assert!(acc.pending().is_empty());
    }
}
