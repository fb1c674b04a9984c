//! Backend errors

/// Error returned by [`crate::ChatBackend`] operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// No session, or the session was rejected
    #[error("not signed in")]
    Unauthenticated,
    /// The requested row or user does not exist
    #[error("not found: {0}")]
    NotFound(String),
    /// The call did not complete within the client-side bound
    #[error("request timed out after {0}ms")]
    Timeout(u64),
    /// Connection-level failure
    #[error("transport error: {0}")]
    Transport(String),
    /// The backend answered with an error status
    #[error("rejected ({status}): {message}")]
    Rejected {
        /// HTTP-like status code
        status: u16,
        /// Backend-provided message
        message: String,
    },
    /// The response could not be decoded
    #[error("decode error: {0}")]
    Decode(String),
    /// The realtime channel is closed
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

impl BackendError {
    /// Whether retrying the same call later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Transport(_) | Self::ChannelClosed(_)
        ) || matches!(self, Self::Rejected { status, .. } if *status >= 500)
    }
}
