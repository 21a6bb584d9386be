use std::fmt;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::codec::{declared_len, find_marker, HEADER_SIZE, MARKER, MAX_PAYLOAD};
use crate::text::{is_diagnostic_text, TextAccumulator, DEFAULT_TEXT_RATIO};

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// Receive buffer bound. Exceeding it wipes the buffer.
pub const DEFAULT_MAX_BUFFER: usize = 100_000;

/// How long a partially received frame may wait for its remaining bytes.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for [`FrameAssembler`].
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Largest declared length accepted as a real frame. Default: 512.
    pub max_payload: usize,
    /// Receive buffer bound in bytes. Default: 100 000.
    pub max_buffer: usize,
    /// Pending-frame timeout. Default: 5 s.
    pub stall_timeout: Duration,
    /// Printable share above which a non-frame run is treated as text.
    pub text_ratio: f32,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            max_payload: MAX_PAYLOAD,
            max_buffer: DEFAULT_MAX_BUFFER,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            text_ratio: DEFAULT_TEXT_RATIO,
        }
    }
}

/// Why bytes were dropped from the receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discard {
    /// The buffer outgrew its bound and was wiped.
    BufferOverflow { len: usize },
    /// A marker was followed by an impossible length; only the marker was dropped.
    OversizedLength { declared: usize },
    /// A frame never completed; only its marker was dropped.
    StalledFrame { declared: usize, buffered: usize },
    /// A run between frames that was neither a frame nor console text.
    Garbage { len: usize },
}

impl fmt::Display for Discard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferOverflow { len } => write!(f, "receive buffer overflow ({len} bytes)"),
            Self::OversizedLength { declared } => {
                write!(f, "corrupted header (declared length {declared})")
            }
            Self::StalledFrame { declared, buffered } => write!(
                f,
                "incomplete frame timed out ({buffered} of {} bytes)",
                declared + HEADER_SIZE
            ),
            Self::Garbage { len } => write!(f, "{len} non-text bytes between frames"),
        }
    }
}

/// One unit of assembler output, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblerEvent {
    /// A complete frame payload (header stripped).
    Frame(Bytes),
    /// A complete line of device console output.
    TextLine(String),
    /// Bytes dropped while resynchronizing.
    Discarded(Discard),
}

/// Reassembles frames from an arbitrarily chunked byte stream.
///
/// The assembler never fails: corrupted headers, stalled frames and stray
/// bytes are discarded and scanning resumes at the next candidate marker.
/// Feeding the same bytes in any chunking yields the same frames, as long as
/// no chunk arrives after a partial frame's stall timeout.
#[derive(Debug)]
pub struct FrameAssembler {
    buf: BytesMut,
    config: AssemblerConfig,
    pending_since: Option<Instant>,
    text: TextAccumulator,
    text_runs: u32,
    last_frame_at: Option<Instant>,
    frames: u64,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAssembler {
    /// Create an assembler with default configuration.
    pub fn new() -> Self {
        Self::with_config(AssemblerConfig::default())
    }

    /// Create an assembler with explicit configuration.
    pub fn with_config(config: AssemblerConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            pending_since: None,
            text: TextAccumulator::new(),
            text_runs: 0,
            last_frame_at: None,
            frames: 0,
        }
    }

    /// Append received bytes and drain everything that can be decided.
    pub fn push(&mut self, data: &[u8]) -> Vec<AssemblerEvent> {
        self.push_at(data, Instant::now())
    }

    /// Like [`push`](Self::push) with an explicit clock reading.
    pub fn push_at(&mut self, data: &[u8], now: Instant) -> Vec<AssemblerEvent> {
        let mut out = Vec::new();
        self.buf.extend_from_slice(data);

        if self.buf.len() > self.config.max_buffer {
            let len = self.buf.len();
            warn!(len, "receive buffer overflow, clearing");
            self.buf.clear();
            self.pending_since = None;
            out.push(AssemblerEvent::Discarded(Discard::BufferOverflow { len }));
            return out;
        }

        self.drain(now, &mut out);
        out
    }

    /// Re-evaluate buffered bytes without new input (stall expiry).
    pub fn poll_at(&mut self, now: Instant) -> Vec<AssemblerEvent> {
        let mut out = Vec::new();
        self.drain(now, &mut out);
        out
    }

    fn drain(&mut self, now: Instant, out: &mut Vec<AssemblerEvent>) {
        while self.buf.len() >= HEADER_SIZE {
            let Some(start) = find_marker(&self.buf) else {
                // A trailing start byte may be the first half of a split marker.
                let keep = usize::from(self.buf.last() == Some(&MARKER[0]));
                self.take_non_frame(self.buf.len() - keep, out);
                self.pending_since = None;
                break;
            };

            if start > 0 {
                self.take_non_frame(start, out);
                continue;
            }

            let Some(declared) = declared_len(&self.buf) else {
                break;
            };

            if declared > self.config.max_payload {
                debug!(declared, "false frame start, skipping marker");
                self.buf.advance(MARKER.len());
                self.pending_since = None;
                out.push(AssemblerEvent::Discarded(Discard::OversizedLength {
                    declared,
                }));
                continue;
            }

            if declared == 0 {
                self.buf.advance(HEADER_SIZE);
                self.pending_since = None;
                continue;
            }

            let total = HEADER_SIZE + declared;
            if self.buf.len() < total {
                match self.pending_since {
                    None => self.pending_since = Some(now),
                    Some(since)
                        if now.saturating_duration_since(since) > self.config.stall_timeout =>
                    {
                        let buffered = self.buf.len();
                        debug!(declared, buffered, "frame stalled, skipping marker");
                        self.buf.advance(MARKER.len());
                        self.pending_since = None;
                        out.push(AssemblerEvent::Discarded(Discard::StalledFrame {
                            declared,
                            buffered,
                        }));
                        continue;
                    }
                    Some(_) => {}
                }
                break;
            }

            self.buf.advance(HEADER_SIZE);
            let payload = self.buf.split_to(declared).freeze();
            self.pending_since = None;
            self.text_runs = 0;
            self.last_frame_at = Some(now);
            self.frames += 1;
            trace!(len = payload.len(), "frame");
            out.push(AssemblerEvent::Frame(payload));
        }
    }

    fn take_non_frame(&mut self, len: usize, out: &mut Vec<AssemblerEvent>) {
        if len == 0 {
            return;
        }
        let run = self.buf.split_to(len);
        if is_diagnostic_text(&run, self.config.text_ratio) {
            self.text_runs = self.text_runs.saturating_add(1);
            out.extend(self.text.push(&run).into_iter().map(AssemblerEvent::TextLine));
        } else {
            trace!(len, "dropping non-text run");
            out.push(AssemblerEvent::Discarded(Discard::Garbage { len }));
        }
    }

    /// Drop all buffered bytes, pending text and counters.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.text.clear();
        self.pending_since = None;
        self.text_runs = 0;
        self.last_frame_at = None;
        self.frames = 0;
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Console text runs seen since the last complete frame. Binary garbage
    /// and partial frames do not count.
    pub fn text_runs(&self) -> u32 {
        self.text_runs
    }

    /// When the last complete frame was extracted.
    pub fn last_frame_at(&self) -> Option<Instant> {
        self.last_frame_at
    }

    /// Complete frames extracted since creation or the last reset.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Current assembler configuration.
    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }
}
