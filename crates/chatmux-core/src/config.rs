//! Relay configuration.

use std::time::Duration;

/// Tunables for the per-conversation delivery scheduler.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How often each conversation's poller samples the terminal buffer.
    pub poll_interval: Duration,
    /// How long output must stay unchanged before the interruption control
    /// is dropped from the in-flight message.
    pub idle_retirement: Duration,
    /// Scrollback lines requested from the terminal on each capture.
    pub capture_lines: u32,
    /// Hard per-message character ceiling of the chat surface.
    pub message_limit: usize,
    /// Split target: chunks are cut at or before this many characters,
    /// leaving a safety margin below the ceiling.
    pub split_target: usize,
    /// A newline is an acceptable cut point only within this many characters
    /// of the split target.
    pub split_search_window: usize,
    /// A cut point must be past this many characters to avoid degenerate
    /// tiny chunks.
    pub min_chunk: usize,
    /// Formatted output shorter than this is not worth a message; while the
    /// turn awaits its first real output it only drives a liveness signal.
    pub trivial_floor: usize,
    /// Minimum gap between two keystroke-sends triggered by the same user.
    pub min_send_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1500),
            idle_retirement: Duration::from_secs(30),
            capture_lines: 2000,
            message_limit: 2000,
            split_target: 1950,
            split_search_window: 300,
            min_chunk: 100,
            trivial_floor: 3,
            min_send_interval: Duration::from_secs(2),
        }
    }
}
