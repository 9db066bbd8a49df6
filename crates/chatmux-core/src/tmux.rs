//! Tmux-backed terminal sessions.
//!
//! Each conversation maps to one named tmux session hosting the assistant
//! process. Everything goes through the tmux CLI: `capture-pane` for
//! snapshots, `send-keys` for input and interrupts, `has-session` for
//! liveness.

use crate::error::ChatmuxError;
use crate::terminal::TerminalSessions;
use crate::Result;
use std::collections::HashMap;
use std::process::Output;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Conversation-to-tmux-session registry plus the CLI plumbing.
#[derive(Debug, Default)]
pub struct TmuxSessions {
    sessions: RwLock<HashMap<Uuid, String>>,
}

impl TmuxSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a conversation to a tmux session name.
    pub async fn register(&self, conversation_id: Uuid, session_name: impl Into<String>) {
        let name = session_name.into();
        debug!(target: "chatmux::tmux", "Binding conversation {} to tmux session '{}'", conversation_id, name);
        self.sessions.write().await.insert(conversation_id, name);
    }

    /// Remove a binding. Does not touch the tmux session itself.
    pub async fn unregister(&self, conversation_id: Uuid) {
        self.sessions.write().await.remove(&conversation_id);
    }

    async fn session_name(&self, conversation_id: Uuid) -> Result<String> {
        self.sessions
            .read()
            .await
            .get(&conversation_id)
            .cloned()
            .ok_or(ChatmuxError::SessionNotFound(conversation_id))
    }

    async fn run_tmux(&self, args: &[&str]) -> Result<Output> {
        let output = Command::new("tmux").args(args).output().await?;
        Ok(output)
    }

    async fn session_alive(&self, name: &str) -> bool {
        match self.run_tmux(&["has-session", "-t", name]).await {
            Ok(output) => output.status.success(),
            Err(e) => {
                warn!(target: "chatmux::tmux", "tmux has-session failed: {}", e);
                false
            }
        }
    }
}

impl TerminalSessions for TmuxSessions {
    async fn capture_buffer(&self, conversation_id: Uuid, lines: u32) -> Result<String> {
        let name = self.session_name(conversation_id).await?;
        let start = format!("-{lines}");
        let output = self
            .run_tmux(&["capture-pane", "-p", "-e", "-t", &name, "-S", &start])
            .await?;
        if !output.status.success() {
            // Distinguish a vanished session from a transient tmux hiccup.
            if !self.session_alive(&name).await {
                return Err(ChatmuxError::SessionNotFound(conversation_id));
            }
            return Err(ChatmuxError::CaptureFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn send_keystrokes(&self, conversation_id: Uuid, text: &str) -> Result<()> {
        let name = self.session_name(conversation_id).await?;
        // Literal text first, then Enter as its own key so tmux never
        // interprets the message body.
        let typed = self
            .run_tmux(&["send-keys", "-t", &name, "-l", text])
            .await?;
        if !typed.status.success() {
            return Err(ChatmuxError::InjectFailed(
                String::from_utf8_lossy(&typed.stderr).trim().to_string(),
            ));
        }
        let submitted = self.run_tmux(&["send-keys", "-t", &name, "Enter"]).await?;
        if !submitted.status.success() {
            return Err(ChatmuxError::InjectFailed(
                String::from_utf8_lossy(&submitted.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    async fn send_interrupt(&self, conversation_id: Uuid) -> Result<()> {
        let name = self.session_name(conversation_id).await?;
        let output = self.run_tmux(&["send-keys", "-t", &name, "Escape"]).await?;
        if !output.status.success() {
            return Err(ChatmuxError::InjectFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    async fn session_exists(&self, conversation_id: Uuid) -> bool {
        match self.session_name(conversation_id).await {
            Ok(name) => self.session_alive(&name).await,
            Err(_) => false,
        }
    }
}
