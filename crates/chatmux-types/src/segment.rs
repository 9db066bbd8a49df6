//! Output segments produced by the turn segmenter.
//!
//! A segment is a classified run of terminal output lines: either assistant
//! prose or a tool invocation. Chrome, prompt echoes and tool output never
//! materialize as segments; the segmenter drops them during classification.

use serde::{Deserialize, Serialize};

/// What a segment represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    /// Running assistant prose.
    Prose,
    /// A single tool invocation line.
    ToolCall,
}

/// A classified run of output lines for one conversational turn.
///
/// Segments are ephemeral: a fresh list is produced on every poll tick and
/// consumed by a single formatting pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSegment {
    pub kind: SegmentKind,
    /// The cleaned line(s) belonging to this segment.
    pub text: String,
    /// Normalized tool identifier (tool-call segments only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Short description of what the tool acted on, already truncated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_target: Option<String>,
}

impl OutputSegment {
    /// Create a prose segment.
    pub fn prose(text: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Prose,
            text: text.into(),
            tool_name: None,
            tool_target: None,
        }
    }

    /// Create a tool-call segment.
    pub fn tool_call(
        line: impl Into<String>,
        name: impl Into<String>,
        target: Option<String>,
    ) -> Self {
        Self {
            kind: SegmentKind::ToolCall,
            text: line.into(),
            tool_name: Some(name.into()),
            tool_target: target,
        }
    }

    /// Whether this segment is a tool call.
    pub fn is_tool_call(&self) -> bool {
        self.kind == SegmentKind::ToolCall
    }
}
