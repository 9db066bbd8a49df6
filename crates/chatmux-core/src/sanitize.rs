//! Text sanitization for captured terminal buffers.
//!
//! Two flavors, both total over arbitrary input:
//! - [`strip_for_compare`] removes every escape sequence, so two captures can
//!   be compared byte-for-byte without spinner colors causing false deltas.
//! - [`strip_for_display`] keeps color escapes (the downconverter deals with
//!   them later) and only normalizes carriage returns and newline runs.

use once_cell::sync::Lazy;
use regex::Regex;

/// Comprehensive regex for ANSI escape sequences.
/// Matches:
/// - CSI sequences: ESC [ ... letter (colors, cursor, etc.)
/// - OSC sequences: ESC ] ... BEL or ESC \ (window title, etc.)
/// - Character set: ESC ( or ESC ) followed by character
/// - Other escapes: ESC = ESC > ESC M etc.
static ANSI_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\x1b\[[0-9;?]*[A-Za-z]",    // CSI sequences (colors, cursor, etc.)
        r"|\x1b\][^\x07]*\x07",       // OSC sequences ending with BEL
        r"|\x1b\][^\x1b]*\x1b\\",     // OSC sequences ending with ST
        r"|\x1b[()][A-Z0-9]",         // Character set selection
        r"|\x1b[=>MNOP78]",           // Other single-char escapes
        r"|\x1b",                     // Catch any remaining bare ESC
    ))
    .unwrap()
});

/// SGR color/style sequences only (`ESC [ ... m`).
static SGR_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;:]*m").unwrap());

/// Runs of three or more newlines.
static NEWLINE_RUN_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Strip all escape sequences and normalize whitespace, for change detection.
pub fn strip_for_compare(raw: &str) -> String {
    let stripped = ANSI_REGEX.replace_all(raw, "");
    normalize_whitespace(&stripped)
}

/// Normalize whitespace but keep color escapes, for the display pipeline.
pub fn strip_for_display(raw: &str) -> String {
    normalize_whitespace(raw)
}

/// Remove only SGR color/style sequences from a single line.
///
/// Used by the chrome filter and segmenter to run predicates against the
/// plain text of a line whose styled form is being carried forward.
pub(crate) fn strip_styles(line: &str) -> String {
    SGR_REGEX.replace_all(line, "").to_string()
}

fn normalize_whitespace(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "");
    NEWLINE_RUN_REGEX.replace_all(&text, "\n\n").trim().to_string()
}
