//! Length-prefixed framing for mesh radios attached over a byte stream.
//!
//! Serial and TCP links deliver an undifferentiated byte stream in which
//! protocol frames are interleaved with the firmware's own console output.
//! Every frame on the wire carries:
//! - A 2-byte start marker (`0x94 0xC3`) for stream synchronization
//! - A 2-byte big-endian payload length (at most 512)
//!
//! [`FrameAssembler`] recovers frames from such a stream, discards false
//! starts without losing sync, and hands printable console output back as
//! text lines.

pub mod assembler;
pub mod codec;
pub mod error;
pub mod text;

pub use assembler::{AssemblerConfig, AssemblerEvent, Discard, FrameAssembler};
pub use codec::{
    encode_frame, frame_bytes, wakeup_burst, HEADER_SIZE, MARKER, MAX_PAYLOAD, WAKEUP_BYTE,
};
pub use error::{FrameError, Result};
pub use text::{is_diagnostic_text, strip_ansi, TextAccumulator};
