//! Console chat surface for driving one binding without a chat platform.
//!
//! Messages render as bordered blocks on stdout; edits re-render the block
//! under the same id. Useful for exercising the whole pipeline against a
//! live tmux session from a shell.

use chatmux_core::{ChatSurface, Result};
use chatmux_types::MessageId;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct ConsoleSurface {
    next_id: AtomicU64,
}

impl ConsoleSurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn print_block(&self, id: &MessageId, text: &str, with_interrupt: bool, edited: bool) {
        let tag = if edited { "edit" } else { "new" };
        let control = if with_interrupt { " [⏹ stop]" } else { "" };
        println!("┌─ message {id} ({tag}){control}");
        for line in text.lines() {
            println!("│ {line}");
        }
        println!("└─");
    }
}

impl ChatSurface for ConsoleSurface {
    async fn create_message(
        &self,
        _conversation_id: Uuid,
        text: &str,
        with_interrupt: bool,
    ) -> Result<MessageId> {
        let id = MessageId::new(format!("{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
        self.print_block(&id, text, with_interrupt, false);
        Ok(id)
    }

    async fn edit_message(
        &self,
        _conversation_id: Uuid,
        message: &MessageId,
        text: &str,
    ) -> Result<()> {
        self.print_block(message, text, false, true);
        Ok(())
    }

    async fn retire_interrupt(
        &self,
        _conversation_id: Uuid,
        message: &MessageId,
    ) -> Result<()> {
        println!("· message {message}: stop control removed");
        Ok(())
    }

    async fn show_typing(&self, _conversation_id: Uuid) -> Result<()> {
        println!("· typing…");
        Ok(())
    }

    async fn notify(&self, _conversation_id: Uuid, text: &str) -> Result<()> {
        println!("! {text}");
        Ok(())
    }
}
