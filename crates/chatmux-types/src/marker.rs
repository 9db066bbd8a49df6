//! Side-channel request markers embedded in terminal output.
//!
//! The assistant can ask the outside world for something (install an
//! extension, confirm a file edit) by printing a bracketed marker of the form
//! `[KEYWORD: key="value" key="value"]` into its own output stream. The core
//! only detects and deduplicates these; confirmation and resolution are
//! handled externally.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One `key="value"` field of a side-channel marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerField {
    pub key: String,
    pub value: String,
}

/// A parsed side-channel request detected in a conversation's output stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideChannelRequest {
    /// Conversation whose output carried the marker.
    pub conversation_id: Uuid,
    /// The marker keyword (e.g. `SKILL_INSTALL`).
    pub keyword: String,
    /// Fields in the order they appeared.
    pub fields: Vec<MarkerField>,
    /// The full marker text as matched; doubles as the dedup key.
    pub raw: String,
    /// When the marker was first observed.
    pub detected_at: DateTime<Utc>,
}

impl SideChannelRequest {
    /// Look up a field value by key (first occurrence wins).
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.key == key)
            .map(|f| f.value.as_str())
    }
}
