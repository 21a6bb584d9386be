/// Boxed cause carried by connect and write failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The link could not be established.
    #[error("failed to connect to {target}: {source}")]
    ConnectFailed { target: String, source: BoxError },

    /// `connect` was called on a link that is already up.
    #[error("already connected")]
    AlreadyConnected,

    /// An operation needed a live link and there is none.
    #[error("not connected")]
    NotConnected,

    /// The device or OS rejected an outbound write.
    #[error("write failed: {0}")]
    WriteFailed(BoxError),

    /// An I/O error occurred outside connect and write.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The Bluetooth stack reported an error.
    #[cfg(feature = "ble")]
    #[error("bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),

    /// Connection parameters could not be understood.
    #[error("invalid connection parameters: {0}")]
    InvalidParams(String),

    /// The requested link type was compiled out.
    #[error("{0} links are not supported in this build")]
    Unsupported(&'static str),
}

impl TransportError {
    pub(crate) fn connect_failed(target: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::ConnectFailed {
            target: target.into(),
            source: source.into(),
        }
    }

    pub(crate) fn write_failed(source: impl Into<BoxError>) -> Self {
        Self::WriteFailed(source.into())
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
