/// Convenience result type used across the crate.
pub type TimelapseResult<T> = Result<T, TimelapseError>;

/// Top-level error taxonomy for a timelapse request.
#[derive(thiserror::Error, Debug)]
pub enum TimelapseError {
    /// The request was rejected before any encoder or container resources were allocated.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The encoder or container writer could not be created, configured, started or kept alive.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// An encoder/container state-machine contract was breached. Never retried.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A single source image could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The request was cancelled between frames.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TimelapseError {
    /// Build a [`TimelapseError::InvalidInput`] value.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Build a [`TimelapseError::ResourceUnavailable`] value.
    pub fn resource(msg: impl Into<String>) -> Self {
        Self::ResourceUnavailable(msg.into())
    }

    /// Build a [`TimelapseError::ProtocolViolation`] value.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Build a [`TimelapseError::Decode`] value.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Build a [`TimelapseError::Cancelled`] value.
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Stable machine-readable code reported at the response boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ResourceUnavailable(_) => "RESOURCE_UNAVAILABLE",
            Self::ProtocolViolation(_) => "PROTOCOL_VIOLATION",
            Self::Decode(_) => "DECODE_FAILED",
            Self::Cancelled(_) => "CANCELLED",
            Self::Other(_) => "ENCODER_ERROR",
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
