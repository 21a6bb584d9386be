use std::fmt;
use std::time::Duration;

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] meshlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] meshlink_frame::FrameError),

    /// A payload could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The session has no live link.
    #[error("session is not connected")]
    NotConnected,

    /// `connect` was called while a session is already active.
    #[error("session is already {0}")]
    AlreadyActive(crate::event::SessionState),

    /// The radio's own node number is not known yet.
    #[error("own node number not known yet")]
    IdentityUnknown,

    /// Channel index outside 0–7.
    #[error("channel index {0} out of range (0-7)")]
    InvalidChannel(u32),

    /// The session was torn down while the operation was in flight.
    #[error("operation cancelled by disconnect")]
    Cancelled,

    /// Waiting for a session state timed out.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors raised by a [`RadioCodec`](crate::codec::RadioCodec).
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The payload is not a valid message.
    #[error("decode failed: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The payload decoded but carries impossible values.
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Conditions the session absorbs and logs instead of returning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// A bounded handshake wait hit its ceiling.
    HandshakeTimeout { phase: &'static str, waited: Duration },
    /// Channel slots that never answered reconciliation.
    ChannelIncomplete { missing: Vec<u32> },
    /// Only console text for too long: the stream lost protocol sync.
    Desynchronized { silent_for: Duration },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandshakeTimeout { phase, waited } => {
                write!(f, "{phase} not finished after {waited:?}")
            }
            Self::ChannelIncomplete { missing } => {
                write!(f, "channels never answered: {missing:?}")
            }
            Self::Desynchronized { silent_for } => {
                write!(f, "no valid frame for {silent_for:?} while text keeps arriving")
            }
        }
    }
}
