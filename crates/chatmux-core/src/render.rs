//! Presentation formatting: segments to chat-ready text.
//!
//! Consecutive tool calls collapse into one compact summary block per flush,
//! bucketed by tool name; prose segments pass through as their own blocks.
//! Detail degrades with volume: one call shows its target, a few calls list
//! targets, a burst shows only a count.

use chatmux_types::{OutputSegment, SegmentKind};

/// Icon and friendly verb per normalized tool name.
const TOOL_STYLES: &[(&str, &str, &str)] = &[
    ("Read", "📖", "Read"),
    ("Edit", "✏️", "Edited"),
    ("MultiEdit", "✏️", "Edited"),
    ("Write", "📝", "Wrote"),
    ("Bash", "💻", "Ran"),
    ("Grep", "🔍", "Searched"),
    ("Search", "🔍", "Searched"),
    ("Glob", "📁", "Matched files"),
    ("List", "📁", "Listed"),
    ("WebSearch", "🌐", "Searched the web"),
    ("WebFetch", "🌐", "Fetched"),
    ("Fetch", "🌐", "Fetched"),
    ("Task", "🤖", "Delegated"),
    ("TodoWrite", "☑️", "Updated todos"),
    ("Update", "☑️", "Updated"),
];

/// Above this many calls of one tool, targets are dropped for a count.
const MAX_LISTED_TARGETS: usize = 3;

/// Render a segment list into the formatted turn text.
pub fn render(segments: &[OutputSegment]) -> String {
    let mut blocks: Vec<String> = Vec::new();
    let mut pending: Vec<&OutputSegment> = Vec::new();

    for seg in segments {
        match seg.kind {
            SegmentKind::ToolCall => pending.push(seg),
            SegmentKind::Prose => {
                flush_tool_group(&mut blocks, &mut pending);
                let text = seg.text.trim();
                if !text.is_empty() {
                    blocks.push(text.to_string());
                }
            }
        }
    }
    flush_tool_group(&mut blocks, &mut pending);

    blocks.join("\n\n")
}

/// Flush the pending run of tool calls as one visual block.
fn flush_tool_group(blocks: &mut Vec<String>, pending: &mut Vec<&OutputSegment>) {
    if pending.is_empty() {
        return;
    }

    // Bucket by tool name, preserving first-seen order.
    let mut order: Vec<&str> = Vec::new();
    for seg in pending.iter() {
        let name = seg.tool_name.as_deref().unwrap_or_default();
        if !order.contains(&name) {
            order.push(name);
        }
    }

    let mut lines: Vec<String> = Vec::new();
    for name in order {
        let calls: Vec<&&OutputSegment> = pending
            .iter()
            .filter(|s| s.tool_name.as_deref().unwrap_or_default() == name)
            .collect();
        lines.push(summarize_bucket(name, &calls));
    }
    blocks.push(lines.join("\n"));
    pending.clear();
}

fn summarize_bucket(name: &str, calls: &[&&OutputSegment]) -> String {
    let (icon, verb) = tool_style(name);
    let targets: Vec<&str> = calls
        .iter()
        .filter_map(|s| s.tool_target.as_deref())
        .filter(|t| !t.is_empty())
        .collect();

    match calls.len() {
        1 => match targets.first() {
            Some(target) => format!("{icon} {verb}: `{target}`"),
            None => format!("{icon} {verb}"),
        },
        n if n <= MAX_LISTED_TARGETS && !targets.is_empty() => {
            let listed = targets
                .iter()
                .map(|t| format!("`{t}`"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{icon} {verb}: {listed}")
        }
        n => format!("{icon} {verb} ×{n}"),
    }
}

fn tool_style(name: &str) -> (&'static str, &str) {
    TOOL_STYLES
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|(_, icon, verb)| (*icon, *verb))
        .unwrap_or(("🔧", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, target: Option<&str>) -> OutputSegment {
        OutputSegment::tool_call(
            format!("{name}(...)"),
            name,
            target.map(|t| t.to_string()),
        )
    }

    #[test]
    fn test_single_call_shows_target() {
        let segments = vec![tool("Read", Some("a.ts"))];
        assert_eq!(render(&segments), "📖 Read: `a.ts`");
    }

    #[test]
    fn test_single_call_without_target() {
        let segments = vec![tool("TodoWrite", None)];
        assert_eq!(render(&segments), "☑️ Updated todos");
    }

    #[test]
    fn test_three_calls_list_targets() {
        let segments = vec![
            tool("Read", Some("a.ts")),
            tool("Read", Some("b.ts")),
            tool("Read", Some("c.ts")),
        ];
        assert_eq!(render(&segments), "📖 Read: `a.ts`, `b.ts`, `c.ts`");
    }

    #[test]
    fn test_four_calls_collapse_to_count() {
        // Volume beats detail even when every call has a distinct target.
        let segments = vec![
            tool("Read", Some("a.ts")),
            tool("Read", Some("b.ts")),
            tool("Read", Some("c.ts")),
            tool("Read", Some("d.ts")),
        ];
        assert_eq!(render(&segments), "📖 Read ×4");
    }

    #[test]
    fn test_multiple_calls_without_targets_use_count() {
        let segments = vec![tool("Bash", None), tool("Bash", None)];
        assert_eq!(render(&segments), "💻 Ran ×2");
    }

    #[test]
    fn test_grouped_tools_then_prose() {
        let segments = vec![
            tool("Read", Some("a.ts")),
            tool("Read", Some("b.ts")),
            tool("Edit", Some("a.ts")),
            OutputSegment::prose("Updated both files."),
        ];
        let out = render(&segments);
        assert_eq!(
            out,
            "📖 Read: `a.ts`, `b.ts`\n✏️ Edited: `a.ts`\n\nUpdated both files."
        );
    }

    #[test]
    fn test_prose_splits_tool_groups() {
        let segments = vec![
            tool("Read", Some("a.ts")),
            OutputSegment::prose("Checking."),
            tool("Read", Some("b.ts")),
        ];
        let out = render(&segments);
        assert_eq!(out, "📖 Read: `a.ts`\n\nChecking.\n\n📖 Read: `b.ts`");
    }

    #[test]
    fn test_unknown_tool_gets_generic_style() {
        let segments = vec![tool("linear", Some("create_issue"))];
        assert_eq!(render(&segments), "🔧 linear: `create_issue`");
    }

    #[test]
    fn test_empty_segments_render_empty() {
        assert_eq!(render(&[]), "");
    }
}
