//! Error types for chatmux.

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ChatmuxError {
    #[error("Terminal session not found for conversation: {0}")]
    SessionNotFound(Uuid),

    #[error("Poller already running for conversation: {0}")]
    PollerAlreadyRunning(Uuid),

    #[error("No poller registered for conversation: {0}")]
    PollerNotFound(Uuid),

    #[error("Buffer capture failed: {0}")]
    CaptureFailed(String),

    #[error("Keystroke injection failed: {0}")]
    InjectFailed(String),

    #[error("Chat surface error: {0}")]
    SurfaceError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ChatmuxError {
    /// Whether this failure means the underlying terminal session is gone.
    ///
    /// This is the sole trigger for tearing a conversation's poller down;
    /// every other failure is treated as transient and retried on the next
    /// tick.
    pub fn is_session_gone(&self) -> bool {
        matches!(self, ChatmuxError::SessionNotFound(_))
    }
}
