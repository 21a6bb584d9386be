/// Errors that can occur while framing outbound payloads.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload does not fit in a single radio frame.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
