//! Daemon wiring for the chatmux bridge.

pub mod config;
pub mod console;
pub mod logging;
