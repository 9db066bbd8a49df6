//! Turn segmentation: classifying terminal output into typed segments.
//!
//! The terminal buffer is append-only scrollback of the entire session, so
//! the segmenter first anchors on the most recent echoed user input and only
//! parses what follows it. Each line after the anchor is classified by an
//! ordered rule list; the rule order is load-bearing (tool-invocation forms
//! must be tried before the generic prose lead, or every tool call would
//! read as prose).

use chatmux_types::OutputSegment;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::chrome::{PROMPT_GLYPH, is_rule_line};
use crate::sanitize::strip_styles;

/// Glyph that leads every assistant response block.
const RESPONSE_GLYPH: char = '●';

/// Glyph that leads tool output continuation lines.
const TOOL_OUTPUT_GLYPH: char = '⎿';

/// Spinner/status glyphs the terminal UI uses for transient state lines.
const STATUS_GLYPHS: &[char] = &[
    '✢', '✳', '✶', '✻', '✽', '·', '⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏',
];

/// Substrings that mark a line as a terminal hint / status bar.
const STATUS_HINTS: &[&str] = &[
    "bypass permissions",
    "Context left until auto-compact",
    "esc to interrupt",
    "to expand",
    "for shortcuts",
    "shift+tab to cycle",
    "ctrl+c to quit",
];

/// Maximum length of a tool target description.
const MAX_TARGET_LEN: usize = 50;

/// Web-search surface form: `Web Search("query")`.
static WEB_SEARCH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^Web Search\("(.+)"\)$"#).unwrap());

/// MCP surface form: `provider - method (MCP)`.
static MCP_CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][\w.-]*)\s+-\s+(.+?)\s+\(MCP\)$").unwrap());

/// Verb-summary surface form: `Searched for "query": 12 files`.
static VERB_SUMMARY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(Searched|Listed|Fetched|Found|Downloaded|Updated)\b\s*:?\s*(.*)$").unwrap()
});

/// Parenthesized-call surface form: `ToolName(args)`.
static TOOL_CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z][A-Za-z_]{1,30})\((.*)\)$").unwrap());

/// Boilerplate counts inside verb summaries: `12 files`, `(3 results)`.
static COUNT_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(?\b\d+\s+(?:files?|lines?|results?|matches|edits?)\)?").unwrap()
});

/// Expand hints appended to collapsed tool summaries.
static EXPAND_HINT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(?ctrl\+\w+ to expand\)?").unwrap());

/// A quoted JSON key leaking from a tool result: `"name":`.
static QUOTED_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^"[^"]+"\s*:"#).unwrap());

/// Past-tense verbs and the tool they normalize to.
const VERB_TOOLS: &[(&str, &str)] = &[
    ("Searched", "Search"),
    ("Listed", "List"),
    ("Fetched", "Fetch"),
    ("Found", "Search"),
    ("Downloaded", "Fetch"),
    ("Updated", "Update"),
];

/// Classification of a single chrome-stripped, trimmed line.
///
/// Variants are listed in rule priority order; `classify` tries them top to
/// bottom and returns on the first match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LineClass {
    /// Empty line: paragraph break inside prose, otherwise ignored.
    Blank,
    /// Pure separator rule.
    Separator,
    /// Status bar / spinner / keybinding hint.
    StatusHint,
    /// Historical or in-progress prompt echo.
    PromptEcho,
    /// Tool output continuation glyph; flips the inside-tool-output flag.
    ToolOutput,
    /// Vertical-bar prefix: tool output when inside a tool block, part of a
    /// prose-rendered table otherwise.
    BarPrefixed,
    /// Raw structured data leaking from a tool result.
    DataLeak,
    /// A recognized tool invocation, normalized.
    ToolCall {
        name: String,
        target: Option<String>,
    },
    /// Assistant response lead glyph opening a prose segment.
    ProseLead,
    /// Anything else: prose continuation if a prose segment is open.
    Plain,
}

/// Classify one line. Pure; the inside-tool-output flag lives in `segment`.
pub(crate) fn classify(line: &str) -> LineClass {
    if line.is_empty() {
        return LineClass::Blank;
    }
    if is_rule_line(line) {
        return LineClass::Separator;
    }
    if is_status_line(line) {
        return LineClass::StatusHint;
    }
    if line.starts_with(PROMPT_GLYPH) {
        return LineClass::PromptEcho;
    }
    if line.starts_with(TOOL_OUTPUT_GLYPH) {
        return LineClass::ToolOutput;
    }
    if line.starts_with('│') || line.starts_with('|') {
        return LineClass::BarPrefixed;
    }
    if is_data_leak(line) {
        return LineClass::DataLeak;
    }
    let (has_lead, body) = strip_lead(line);
    if let Some((name, target)) = match_tool_call(body, !has_lead) {
        return LineClass::ToolCall { name, target };
    }
    if has_lead {
        return LineClass::ProseLead;
    }
    LineClass::Plain
}

/// Parse a cleaned buffer into the ordered segment list for the latest turn.
pub fn segment(cleaned: &str) -> Vec<OutputSegment> {
    let lines: Vec<&str> = cleaned.lines().collect();
    let start = turn_boundary(&lines).map(|i| i + 1).unwrap_or(0);

    let mut segments: Vec<OutputSegment> = Vec::new();
    let mut prose: Option<String> = None;
    let mut in_tool_output = false;

    for styled in &lines[start..] {
        let plain_owned = strip_styles(styled);
        let plain = plain_owned.trim();
        match classify(plain) {
            LineClass::Blank => {
                if let Some(buf) = prose.as_mut() {
                    buf.push('\n');
                }
            }
            LineClass::Separator
            | LineClass::StatusHint
            | LineClass::PromptEcho
            | LineClass::DataLeak => {}
            LineClass::ToolOutput => in_tool_output = true,
            LineClass::BarPrefixed => {
                if !in_tool_output {
                    append_prose_line(&mut prose, styled);
                }
            }
            LineClass::ToolCall { name, target } => {
                flush_prose(&mut segments, &mut prose);
                segments.push(OutputSegment::tool_call(plain, name, target));
                in_tool_output = true;
            }
            LineClass::ProseLead => {
                flush_prose(&mut segments, &mut prose);
                prose = Some(lead_remainder(styled).to_string());
                in_tool_output = false;
            }
            LineClass::Plain => {
                if !in_tool_output {
                    append_prose_line(&mut prose, styled);
                }
            }
        }
    }
    flush_prose(&mut segments, &mut prose);
    segments
}

/// Index of the most recent echoed user input: a prompt-glyph line with
/// non-empty content after the glyph. An empty echoed prompt (the still-open
/// input box) is not a boundary.
fn turn_boundary(lines: &[&str]) -> Option<usize> {
    lines.iter().rposition(|line| {
        let plain = strip_styles(line);
        let trimmed = plain.trim();
        trimmed
            .strip_prefix(PROMPT_GLYPH)
            .is_some_and(|rest| !rest.trim().is_empty())
    })
}

fn is_status_line(line: &str) -> bool {
    line.starts_with(STATUS_GLYPHS) || STATUS_HINTS.iter().any(|h| line.contains(h))
}

fn is_data_leak(line: &str) -> bool {
    line.starts_with('[')
        || line.starts_with('{')
        || line.starts_with('"')
        || QUOTED_KEY_RE.is_match(line)
        || matches!(line, "]" | "}" | "]," | "},")
        || line.starts_with('…')
        || line.starts_with("...")
}

fn strip_lead(line: &str) -> (bool, &str) {
    match line.strip_prefix(RESPONSE_GLYPH) {
        Some(rest) => (true, rest.trim_start()),
        None => (false, line),
    }
}

/// Content following the response lead glyph on a (possibly styled) line,
/// used to seed a fresh prose segment. Mirrors `strip_lead` but returns the
/// remainder directly; leading whitespace and the glyph are stripped.
fn lead_remainder(line: &str) -> &str {
    let trimmed = line.trim_start();
    trimmed.strip_prefix(RESPONSE_GLYPH).unwrap_or(trimmed).trim()
}

/// Try the tool-invocation surface forms in priority order.
///
/// The verb-summary form is only attempted on lines without the response
/// lead glyph: a prose sentence like "Updated both files." carries the lead,
/// a tool summary line never does.
fn match_tool_call(body: &str, allow_verb_form: bool) -> Option<(String, Option<String>)> {
    if let Some(caps) = WEB_SEARCH_RE.captures(body) {
        return Some(("WebSearch".to_string(), clean_target(&caps[1])));
    }
    if let Some(caps) = MCP_CALL_RE.captures(body) {
        return Some((caps[1].to_string(), clean_target(&caps[2])));
    }
    if allow_verb_form {
        if let Some(caps) = VERB_SUMMARY_RE.captures(body) {
            let remainder = caps[2].trim();
            if looks_like_summary_remainder(remainder) {
                let verb = caps[1].to_string();
                let tool = VERB_TOOLS
                    .iter()
                    .find(|(v, _)| *v == verb)
                    .map(|(_, t)| (*t).to_string())
                    .unwrap_or(verb);
                let remainder = remainder.strip_prefix("for ").unwrap_or(remainder);
                return Some((tool, clean_target(remainder)));
            }
        }
    }
    if let Some(caps) = TOOL_CALL_RE.captures(body) {
        return Some((caps[1].to_string(), clean_target(&caps[2])));
    }
    None
}

/// Guard against prose sentences that happen to open with a summary verb.
fn looks_like_summary_remainder(remainder: &str) -> bool {
    if remainder.ends_with(['.', '!', '?']) {
        return false;
    }
    remainder.split_whitespace().count() <= 8
}

/// Strip boilerplate from a raw target and truncate it for display.
fn clean_target(raw: &str) -> Option<String> {
    let s = EXPAND_HINT_RE.replace_all(raw, "");
    let s = COUNT_SUFFIX_RE.replace_all(&s, "");
    let mut t = s.trim();
    if t.len() >= 2 && t.starts_with('(') && t.ends_with(')') {
        t = t[1..t.len() - 1].trim();
    }
    let t = t
        .trim_matches('"')
        .trim_matches('\'')
        .trim()
        .trim_end_matches(':')
        .trim();
    if t.is_empty() {
        return None;
    }
    Some(truncate_target(t))
}

fn truncate_target(s: &str) -> String {
    if s.chars().count() <= MAX_TARGET_LEN {
        s.to_string()
    } else {
        let cut: String = s.chars().take(MAX_TARGET_LEN - 1).collect();
        format!("{}…", cut.trim_end())
    }
}

fn append_prose_line(prose: &mut Option<String>, styled: &str) {
    if let Some(buf) = prose.as_mut() {
        if !buf.is_empty() {
            buf.push('\n');
        }
        buf.push_str(styled.trim());
    }
}

fn flush_prose(segments: &mut Vec<OutputSegment>, prose: &mut Option<String>) {
    if let Some(buf) = prose.take() {
        let text = buf.trim();
        if !text.is_empty() {
            segments.push(OutputSegment::prose(text));
        }
    }
}
