//! Color downconversion for the chat surface.
//!
//! Terminal output arrives with the full zoo of escape sequences: named
//! 8-color SGR, 256-indexed, 24-bit RGB, bright and background variants,
//! cursor movement, OSC title updates, private DEC modes. The chat surface
//! renders only a narrow subset: reset, bold, underline, and the 8 base
//! foreground/background colors. Everything else either folds onto that
//! subset or is stripped.
//!
//! Total over arbitrary input. Partial or malformed sequences are deleted
//! rather than left dangling.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Every control sequence we know how to classify. CSI sequences keep their
/// parameter body so SGR codes can be rewritten in place; all other forms
/// are dropped outright.
static CONTROL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\x1b\[[0-9;:?]*[ -/]*[@-~]",       // CSI, any final byte
        r"|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)?", // OSC, possibly unterminated
        r"|\x1b[()][A-Z0-9]",                // Character set selection
        r"|\x1b[=>MNOP78]",                  // Keypad / single-char escapes
        r"|\x1b",                            // Bare ESC
    ))
    .unwrap()
});

/// Convert raw terminal text into the surface's supported style subset.
pub fn to_surface_style(raw: &str) -> String {
    let converted = CONTROL_REGEX.replace_all(raw, |caps: &Captures| {
        let seq = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        rewrite_sequence(seq)
    });
    // A literal triple backtick would close the surface's code fencing early;
    // a zero-width space between the first two backticks defuses it.
    converted.replace("```", "`\u{200B}``")
}

/// Rewrite one matched control sequence. Only SGR survives, and only with
/// filtered parameters; everything else becomes the empty string.
fn rewrite_sequence(seq: &str) -> String {
    let Some(body) = seq
        .strip_prefix("\x1b[")
        .and_then(|rest| rest.strip_suffix('m'))
    else {
        return String::new();
    };
    // Private-mode parameters never belong to SGR.
    if body.contains('?') {
        return String::new();
    }
    let kept = filter_sgr_params(body);
    if kept.is_empty() {
        String::new()
    } else {
        let joined = kept
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(";");
        format!("\x1b[{joined}m")
    }
}

/// Filter an SGR parameter list down to the supported subset.
fn filter_sgr_params(body: &str) -> Vec<u16> {
    // `ESC[m` is shorthand for `ESC[0m`.
    let params: Vec<i64> = if body.is_empty() {
        vec![0]
    } else {
        body.split([';', ':'])
            .map(|p| {
                if p.is_empty() {
                    0
                } else {
                    p.parse::<i64>().unwrap_or(-1)
                }
            })
            .collect()
    };

    let mut kept: Vec<u16> = Vec::new();
    let mut i = 0;
    while i < params.len() {
        match params[i] {
            0 => kept.push(0),
            1 => kept.push(1),
            4 => kept.push(4),
            p @ 30..=37 | p @ 40..=47 => kept.push(p as u16),
            // Default fg/bg: the surface has no notion of "default", reset
            // is the closest equivalent.
            39 | 49 => kept.push(0),
            // Bright variants fold to their normal counterpart.
            p @ 90..=97 | p @ 100..=107 => kept.push((p - 60) as u16),
            p @ (38 | 48) => {
                let base: u16 = if p == 38 { 30 } else { 40 };
                match params.get(i + 1) {
                    Some(&5) => {
                        if let Some(&idx) = params.get(i + 2) {
                            if (0..=255).contains(&idx) {
                                kept.push(base + u16::from(bucket_indexed(idx as u8)));
                            }
                        }
                        i += 2;
                    }
                    Some(&2) => {
                        if let (Some(&r), Some(&g), Some(&b)) =
                            (params.get(i + 2), params.get(i + 3), params.get(i + 4))
                        {
                            if [r, g, b].iter().all(|c| (0..=255).contains(c)) {
                                kept.push(
                                    base + u16::from(bucket_rgb(r as u8, g as u8, b as u8)),
                                );
                            }
                        }
                        i += 4;
                    }
                    // Malformed extended color; drop it.
                    _ => {}
                }
            }
            // Every other SGR parameter (dim, italic, blink, reverse, ...)
            // has no surface equivalent.
            _ => {}
        }
        i += 1;
    }
    kept
}

/// Bucket a 256-palette index onto the 8 base colors (0..=7).
fn bucket_indexed(idx: u8) -> u8 {
    match idx {
        0..=7 => idx,
        8..=15 => idx - 8,
        16..=231 => {
            // 6x6x6 color cube: a channel counts as "high" at level 3 of 5.
            let c = idx - 16;
            let (r, g, b) = (c / 36, (c % 36) / 6, c % 6);
            hue_bucket(r >= 3, g >= 3, b >= 3)
        }
        // Grayscale ramp splits on brightness.
        232..=255 => {
            if idx >= 244 {
                7
            } else {
                0
            }
        }
    }
}

/// Bucket a 24-bit color onto the 8 base colors by channel magnitude.
fn bucket_rgb(r: u8, g: u8, b: u8) -> u8 {
    let high = |c: u8| c >= 150;
    match (high(r), high(g), high(b)) {
        (false, false, false) => {
            // No dominant channel: dark shades collapse to black, midtones
            // are closer to white than to any hue.
            if r < 120 && g < 120 && b < 120 { 0 } else { 7 }
        }
        (hr, hg, hb) => hue_bucket(hr, hg, hb),
    }
}

fn hue_bucket(r: bool, g: bool, b: bool) -> u8 {
    match (r, g, b) {
        (false, false, false) => 0, // black
        (true, false, false) => 1,  // red
        (false, true, false) => 2,  // green
        (true, true, false) => 3,   // yellow
        (false, false, true) => 4,  // blue
        (true, false, true) => 5,   // magenta
        (false, true, true) => 6,   // cyan
        (true, true, true) => 7,    // white
    }
}
