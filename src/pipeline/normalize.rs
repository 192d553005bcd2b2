//! Normalisation: deterministic cleanup of extracted page text.
//!
//! ## Why is normalisation necessary?
//!
//! PDF text extraction yields layout artefacts that are *visually correct*
//! on the page but *audibly wrong* when spoken — for example:
//!
//! - Words split by end-of-line hyphenation ("seg-" / "ment"), which a TTS
//!   engine reads as two fragments
//! - Hard line breaks mid-sentence, column gutters rendered as runs of
//!   spaces, stray form feeds
//! - Invisible Unicode (soft hyphens, zero-width spaces) that some engines
//!   spell out or choke on
//!
//! This module applies cheap, deterministic rules that fix extraction quirks
//! without touching content. The segmenter relies on the result: sentence
//! detection only works once spacing and hyphenation are repaired. Each rule
//! is a pure function (`&str → String`) and independently testable.
//!
//! ## Rule Order
//!
//! Rules must run in this specific order: line endings first so every later
//! rule sees plain `\n`, de-hyphenation before whitespace collapsing (the
//! pattern spans a line break), and blank-line collapsing after per-line
//! trimming so whitespace-only lines count as blank.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all normalisation rules to one page of extracted text.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF/CR → LF, form feed → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens, etc.)
/// 3. Re-join words hyphenated across line breaks
/// 4. Collapse runs of spaces and tabs to a single space
/// 5. Trim whitespace at both ends of every line
/// 6. Collapse 3+ consecutive newlines down to 2
/// 7. Trim the whole page (a whitespace-only page becomes empty)
pub fn clean_page_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = repair_hyphenation(&s);
    let s = collapse_spaces(&s);
    let s = trim_lines(&s);
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\u{000C}', "\n")
}

// ── Rule 2: Strip invisible Unicode characters ───────────────────────────────
//
// The soft hyphen (U+00AD) matters most here: extractors emit it at
// hyphenation points, and several TTS engines render it as a spoken pause
// or, worse, the word "hyphen".

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Re-join words hyphenated across line breaks ──────────────────────
//
// "seg-\nment" → "segment". The lowercase-continuation guard keeps real
// compounds intact: "UTF-\nEight" or "Navier-\nStokes" stay hyphenated
// because the continuation starts with an uppercase letter.

static RE_HYPHEN_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z])-[ \t]*\n[ \t]*([a-z])").unwrap());

fn repair_hyphenation(input: &str) -> String {
    RE_HYPHEN_BREAK.replace_all(input, "${1}${2}").to_string()
}

// ── Rule 4: Collapse runs of spaces and tabs ─────────────────────────────────

static RE_SPACE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());

fn collapse_spaces(input: &str) -> String {
    RE_SPACE_RUNS.replace_all(input, " ").to_string()
}

// ── Rule 5: Trim whitespace on every line ────────────────────────────────────

fn trim_lines(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 6: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc\u{000C}d"), "a\nb\nc\nd");
    }

    #[test]
    fn test_remove_invisible() {
        let input = "hel\u{00AD}lo\u{200B}world\u{FEFF}!";
        assert_eq!(remove_invisible_chars(input), "helloworld!");
    }

    #[test]
    fn test_repair_hyphenation() {
        assert_eq!(repair_hyphenation("seg-\nment"), "segment");
        assert_eq!(repair_hyphenation("exam- \n ple"), "example");
    }

    #[test]
    fn test_hyphenation_keeps_proper_compounds() {
        // Uppercase continuation means a real compound split across lines.
        assert_eq!(repair_hyphenation("Navier-\nStokes"), "Navier-\nStokes");
    }

    #[test]
    fn test_collapse_spaces() {
        assert_eq!(collapse_spaces("a \t  b     c"), "a b c");
    }

    #[test]
    fn test_trim_lines() {
        assert_eq!(trim_lines("  hello   \n  world  "), "hello\nworld");
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_whitespace_only_page_becomes_empty() {
        assert_eq!(clean_page_text("  \n\t \n  \u{000C}  "), "");
    }

    #[test]
    fn test_clean_page_text_full_pipeline() {
        let input = "The   quick\r\nbrown fox jum-\nped over.\n\n\n\n\nThe lazy dog.   ";
        let result = clean_page_text(input);
        assert_eq!(
            result,
            "The quick\nbrown fox jumped over.\n\nThe lazy dog."
        );
    }
}
