//! Daemon configuration.

use anyhow::Result;
use chatmux_core::RelayConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Name of the tmux session hosting the assistant process.
    #[serde(default = "default_tmux_session")]
    pub tmux_session: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_idle_retirement_secs")]
    pub idle_retirement_secs: u64,
    #[serde(default = "default_capture_lines")]
    pub capture_lines: u32,
    #[serde(default = "default_message_limit")]
    pub message_limit: usize,
    #[serde(default = "default_min_send_interval_ms")]
    pub min_send_interval_ms: u64,
}

fn default_tmux_session() -> String {
    "assistant".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1500
}

fn default_idle_retirement_secs() -> u64 {
    30
}

fn default_capture_lines() -> u32 {
    2000
}

fn default_message_limit() -> usize {
    2000
}

fn default_min_send_interval_ms() -> u64 {
    2000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tmux_session: default_tmux_session(),
            poll_interval_ms: default_poll_interval_ms(),
            idle_retirement_secs: default_idle_retirement_secs(),
            capture_lines: default_capture_lines(),
            message_limit: default_message_limit(),
            min_send_interval_ms: default_min_send_interval_ms(),
        }
    }
}

impl Config {
    /// Load config from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load config from the default location, falling back to defaults if
    /// no file exists.
    pub fn load() -> Result<Self> {
        let path = default_config_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Map the file-level settings onto the core relay configuration.
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            idle_retirement: Duration::from_secs(self.idle_retirement_secs),
            capture_lines: self.capture_lines,
            message_limit: self.message_limit,
            min_send_interval: Duration::from_millis(self.min_send_interval_ms),
            ..RelayConfig::default()
        }
    }
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chatmux")
        .join("config.toml")
}
