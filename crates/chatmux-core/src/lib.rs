//! Core output-streaming pipeline for the chatmux bridge.
//!
//! Bridges a chat platform to a long-running assistant process inside a
//! terminal multiplexer. The pipeline turns raw scrollback snapshots into
//! chat messages: sanitize, downconvert colors, strip chrome, segment the
//! latest turn, format tool-call groups, then diff/split/dispatch against
//! the chat surface on a fixed poll interval.

mod chrome;
mod config;
mod error;
mod gate;
mod marker;
mod poller;
mod render;
mod sanitize;
mod segment;
mod style;
mod surface;
mod terminal;
mod tmux;

pub use chrome::strip_chrome;
pub use config::RelayConfig;
pub use error::ChatmuxError;
pub use gate::SendGate;
pub use marker::scan as scan_markers;
pub use poller::{Relay, RelayEvent, TickFlow};
pub use render::render;
pub use sanitize::{strip_for_compare, strip_for_display};
pub use segment::segment;
pub use style::to_surface_style;
pub use surface::ChatSurface;
pub use terminal::TerminalSessions;
pub use tmux::TmuxSessions;

/// Result type for chatmux operations.
pub type Result<T> = std::result::Result<T, ChatmuxError>;
