//! Side-channel request marker detection.
//!
//! Scans comparison-mode buffer text for the bracketed marker grammar
//! `[KEYWORD: key="value" key="value"]`. Values are quoted with no escaping
//! defined; a value containing a quote simply fails the grammar and the
//! marker is ignored rather than guessed at.

use chatmux_types::{MarkerField, SideChannelRequest};
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

/// The full marker: an uppercase keyword and one or more quoted fields.
static MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\[([A-Z][A-Z0-9_]{2,31}):\s*((?:[a-z_][a-z0-9_]*="[^"\n]*"\s*)+)\]"#).unwrap()
});

/// One `key="value"` field inside a marker body.
static FIELD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([a-z_][a-z0-9_]*)="([^"\n]*)""#).unwrap());

/// Find every well-formed marker in `text`.
pub fn scan(conversation_id: Uuid, text: &str) -> Vec<SideChannelRequest> {
    MARKER_RE
        .captures_iter(text)
        .map(|caps| {
            let fields = FIELD_RE
                .captures_iter(&caps[2])
                .map(|f| MarkerField {
                    key: f[1].to_string(),
                    value: f[2].to_string(),
                })
                .collect();
            SideChannelRequest {
                conversation_id,
                keyword: caps[1].to_string(),
                fields,
                raw: caps[0].to_string(),
                detected_at: chrono::Utc::now(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv() -> Uuid {
        Uuid::new_v4()
    }

    #[test]
    fn test_parses_single_marker() {
        let text = r#"some output [SKILL_INSTALL: name="rust-helper" url="https://example.com/pkg"] more"#;
        let found = scan(conv(), text);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].keyword, "SKILL_INSTALL");
        assert_eq!(found[0].field("name"), Some("rust-helper"));
        assert_eq!(found[0].field("url"), Some("https://example.com/pkg"));
    }

    #[test]
    fn test_parses_multiple_markers() {
        let text = r#"[FILE_EDIT: path="a.rs"] text [FILE_EDIT: path="b.rs"]"#;
        let found = scan(conv(), text);
        assert_eq!(found.len(), 2);
        assert_ne!(found[0].raw, found[1].raw);
    }

    #[test]
    fn test_rejects_unquoted_values() {
        let found = scan(conv(), "[REQUEST: name=bare]");
        assert!(found.is_empty());
    }

    #[test]
    fn test_rejects_lowercase_keyword() {
        let found = scan(conv(), r#"[request: name="x"]"#);
        assert!(found.is_empty());
    }

    #[test]
    fn test_embedded_quote_fails_grammar() {
        // No escaping is defined for quotes inside values; such a marker is
        // not recognized at all.
        let found = scan(conv(), r#"[REQUEST: name="he said "hi""]"#);
        assert!(found.is_empty());
    }

    #[test]
    fn test_raw_is_dedup_key() {
        let text = r#"[SKILL_INSTALL: name="x"]"#;
        let a = scan(conv(), text);
        let b = scan(conv(), text);
        assert_eq!(a[0].raw, b[0].raw);
    }
}
