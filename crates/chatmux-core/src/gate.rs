//! Per-user send gating.
//!
//! The only cross-conversation shared state in the system: a map from user
//! id to the instant of their last accepted keystroke-send. A user whose
//! message arrives inside the minimum interval simply does not reach the
//! terminal.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Rate gate keyed by platform user id.
#[derive(Debug, Default)]
pub struct SendGate {
    last_send: DashMap<String, Instant>,
}

impl SendGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a send for `user` if enough time has passed since their last
    /// one. Returns false when the send should be dropped.
    pub fn try_acquire(&self, user: &str, min_interval: Duration) -> bool {
        let now = Instant::now();
        let mut allowed = true;
        self.last_send
            .entry(user.to_string())
            .and_modify(|last| {
                if now.duration_since(*last) < min_interval {
                    allowed = false;
                } else {
                    *last = now;
                }
            })
            .or_insert(now);
        allowed
    }
}
