//! Terminal session abstraction.
//!
//! The scheduler sees the underlying assistant process only through these
//! four operations on a plain-text scrollback buffer. Session bookkeeping
//! (spawning, naming, killing) happens elsewhere; a capture returning
//! [`crate::ChatmuxError::SessionNotFound`] is the one signal that a session
//! is gone for good.

use crate::Result;
use std::future::Future;
use uuid::Uuid;

/// Capture and keystroke operations against a named terminal session.
pub trait TerminalSessions: Send + Sync + 'static {
    /// Snapshot the last `lines` lines of scrollback, escape sequences
    /// included.
    fn capture_buffer(
        &self,
        conversation_id: Uuid,
        lines: u32,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Type `text` into the session and submit it.
    fn send_keystrokes(
        &self,
        conversation_id: Uuid,
        text: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Inject the interrupt keystroke. Fire-and-forget; does not affect the
    /// poller.
    fn send_interrupt(&self, conversation_id: Uuid) -> impl Future<Output = Result<()>> + Send;

    /// Whether the session still exists.
    fn session_exists(&self, conversation_id: Uuid) -> impl Future<Output = bool> + Send;
}
