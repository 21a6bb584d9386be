use std::fmt;
use std::io;

use meshlink_frame::FrameError;
use meshlink_session::SessionError;
use meshlink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::ConnectFailed { target, source } => match source.downcast::<io::Error>() {
            Ok(io) => io_error(&format!("{context} ({target})"), *io),
            Err(source) => CliError::new(
                TRANSPORT_ERROR,
                format!("{context}: failed to connect to {target}: {source}"),
            ),
        },
        TransportError::Io(source) => io_error(context, source),
        TransportError::InvalidParams(_) | TransportError::Unsupported(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
    }
}

pub fn session_error(context: &str, err: SessionError) -> CliError {
    match err {
        SessionError::Transport(err) => transport_error(context, err),
        SessionError::Frame(err) => frame_error(context, err),
        SessionError::Codec(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        SessionError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        SessionError::InvalidChannel(_) => CliError::new(USAGE, format!("{context}: {err}")),
        SessionError::NotConnected | SessionError::Cancelled | SessionError::IdentityUnknown => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        SessionError::AlreadyActive(_) => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}
