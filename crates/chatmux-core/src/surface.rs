//! Chat surface abstraction.
//!
//! The scheduler drives a chat platform through these few primitives and
//! never depends on surface-specific formatting beyond what the color
//! downconverter already produced. Implementations live outside the core
//! (a Discord bot, a console harness, a test fake).

use crate::Result;
use chatmux_types::MessageId;
use std::future::Future;
use uuid::Uuid;

/// Outbound message operations offered by a chat platform.
pub trait ChatSurface: Send + Sync + 'static {
    /// Post a new message; `with_interrupt` attaches the interruption
    /// control affordance to it.
    fn create_message(
        &self,
        conversation_id: Uuid,
        text: &str,
        with_interrupt: bool,
    ) -> impl Future<Output = Result<MessageId>> + Send;

    /// Replace the text of an existing message. Affordances attached to the
    /// message are left untouched.
    fn edit_message(
        &self,
        conversation_id: Uuid,
        message: &MessageId,
        text: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove only the interruption control from a message, preserving any
    /// other affordances it carries.
    fn retire_interrupt(
        &self,
        conversation_id: Uuid,
        message: &MessageId,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Show a liveness signal (typing indicator) without sending anything.
    fn show_typing(&self, conversation_id: Uuid) -> impl Future<Output = Result<()>> + Send;

    /// Post a one-off notice outside the turn stream (e.g. session ended).
    fn notify(
        &self,
        conversation_id: Uuid,
        text: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}
