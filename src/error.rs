//! Error types for signaling and call orchestration

/// Result type alias using callsign Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in signaling and session operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Rendezvous store error (write/watch failure, dropped connection)
    #[error("Store error: {0}")]
    StoreError(String),

    /// Signaling channel error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// SDP negotiation error (description create/apply failure)
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    CandidateError(String),

    /// Media track/device error (capture setup, track replacement)
    #[error("Media error: {0}")]
    MediaError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is transient
    ///
    /// Transient errors come from the rendezvous transport, which retries
    /// internally on reconnect; they are logged but never fail a session.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::StoreError(_) | Error::SignalingError(_))
    }

    /// Check if this error is a negotiation error
    ///
    /// Negotiation errors end the session as `Failed`; a new session must be
    /// constructed to retry the call.
    pub fn is_negotiation_error(&self) -> bool {
        matches!(self, Error::SdpError(_))
    }

    /// Check if this error is a media capture/track error
    pub fn is_media_error(&self) -> bool {
        matches!(self, Error::MediaError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("test".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: test");
    }

    #[test]
    fn test_error_is_transient() {
        assert!(Error::StoreError("test".to_string()).is_transient());
        assert!(Error::SignalingError("test".to_string()).is_transient());
        assert!(!Error::SdpError("test".to_string()).is_transient());
    }

    #[test]
    fn test_error_is_negotiation_error() {
        assert!(Error::SdpError("test".to_string()).is_negotiation_error());
        assert!(!Error::MediaError("test".to_string()).is_negotiation_error());
    }

    #[test]
    fn test_error_is_media_error() {
        assert!(Error::MediaError("no camera".to_string()).is_media_error());
        assert!(!Error::StoreError("test".to_string()).is_media_error());
    }
}
