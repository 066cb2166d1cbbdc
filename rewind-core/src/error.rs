//! Error types for the capture and flush pipeline

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, RewindError>;

/// Error types for the replay pipeline
#[derive(Debug, thiserror::Error)]
pub enum RewindError {
    /// Flush attempted without a valid session
    #[error("No valid session to flush")]
    NoSession,

    /// Transport rejected the envelope or returned no response
    #[error("Unable to send Replay: {0}")]
    SendFailure(String),

    /// All retry attempts for a segment failed
    #[error("Unable to send Replay: max retries exceeded after {attempts} attempts")]
    MaxRetriesExceeded {
        /// Total attempts made, including the initial one
        attempts: u32,
    },

    /// Unexpected failure inside the event buffer
    #[error("Buffer corruption: {0}")]
    BufferCorruption(String),

    /// Operation on a buffer that was already destroyed
    #[error("Event buffer has been destroyed")]
    BufferDestroyed,

    /// A pending delayed task was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// `start` called while a recording is already running
    #[error("Replay recording is already in progress")]
    AlreadyRecording,

    /// Segment started too long ago to belong to the current session
    #[error("Session is too long, not sending replay segment")]
    SessionTooLong,

    /// Session storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Compression of a segment failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl RewindError {
    /// Errors produced by the sending path itself.
    ///
    /// Their messages start with [`crate::UNABLE_TO_SEND_REPLAY`], which is
    /// how the event processor keeps them from converting a buffered replay.
    pub fn is_send_error(&self) -> bool {
        matches!(
            self,
            RewindError::SendFailure(_) | RewindError::MaxRetriesExceeded { .. }
        )
    }

    /// Errors after which the engine must stop recording entirely.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RewindError::BufferCorruption(_) | RewindError::Compression(_)
        )
    }
}

impl From<String> for RewindError {
    fn from(s: String) -> Self {
        RewindError::Other(s)
    }
}

impl From<&str> for RewindError {
    fn from(s: &str) -> Self {
        RewindError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for RewindError {
    fn from(err: anyhow::Error) -> Self {
        RewindError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_errors_carry_the_replay_prefix() {
        let err = RewindError::MaxRetriesExceeded { attempts: 4 };
        assert!(err.to_string().starts_with(crate::UNABLE_TO_SEND_REPLAY));
        assert!(err.is_send_error());
        assert!(!err.is_fatal());
    }

    #[test]
    fn buffer_failures_are_fatal() {
        assert!(RewindError::BufferCorruption("bad".into()).is_fatal());
        assert!(!RewindError::NoSession.is_fatal());
    }
}
