//! Segmentation: split normalised page text into speech-sized chunks.
//!
//! ## Splitting strategy
//!
//! Three levels, in order of preference:
//!
//! 1. **Sentence boundaries** — terminal punctuation followed by whitespace,
//!    with a guard list so "Dr. Smith" does not become two utterances.
//! 2. **Whitespace boundaries** — when a single sentence exceeds the maximum
//!    segment length, it is packed word by word.
//! 3. **Hard character cuts** — only for an unbroken run (URL, base64 blob)
//!    longer than the maximum on its own.
//!
//! Sentences are greedily packed into segments of at most `max_chars`. A
//! buffered run shorter than `min_chars` is merged forward rather than
//! flushed, so tiny fragments only appear as the final segment of a page.
//! The minimum is best-effort: word integrity always wins when the two
//! collide.
//!
//! Sequence numbers are global and monotonic across pages — segment `seq`
//! values for the whole document form the contiguous range `0..n` in reading
//! order, which is what lets the assembler reorder out-of-order synthesis
//! results by index alone.

use crate::pipeline::extract::PageText;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

/// Rough speaking speed at rate 1.0. English narration runs around 150–180
/// words per minute at ~5 characters per word, i.e. ~15 characters a second.
pub const CHARS_PER_SECOND: f32 = 15.0;

/// A speech-sized unit of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Global 0-indexed sequence number, monotonic across pages.
    pub seq: usize,
    /// 0-indexed page this segment came from.
    pub page: usize,
    /// Single-line text handed to the speech backend.
    pub text: String,
}

impl Segment {
    /// Advisory duration estimate at the given speaking rate.
    ///
    /// Used to size silence placeholders for skipped segments and for
    /// listening-time estimates; the real duration comes from the WAV header
    /// after synthesis.
    pub fn estimated_duration(&self, rate: f32) -> Duration {
        let chars = self.text.chars().count() as f32;
        Duration::from_secs_f32(chars / (CHARS_PER_SECOND * rate))
    }
}

/// Segment every non-empty page, numbering segments globally.
///
/// Blank pages contribute nothing but do not interrupt the numbering: the
/// result's `seq` values are exactly `0..result.len()` in reading order.
pub fn segment_pages(pages: &[PageText], max_chars: usize, min_chars: usize) -> Vec<Segment> {
    let mut segments = Vec::new();
    for page in pages {
        if page.is_empty() {
            continue;
        }
        for text in chunk_page(&page.text, max_chars, min_chars) {
            segments.push(Segment {
                seq: segments.len(),
                page: page.index,
                text,
            });
        }
    }
    segments
}

/// Split one page into chunk texts of at most `max_chars` characters.
fn chunk_page(text: &str, max_chars: usize, min_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf = String::new();

    for paragraph in text.split("\n\n") {
        for sentence in split_sentences(paragraph) {
            let s_len = char_len(&sentence);
            let buf_len = char_len(&buf);
            let joined_len = if buf.is_empty() {
                s_len
            } else {
                buf_len + 1 + s_len
            };

            if joined_len <= max_chars {
                if !buf.is_empty() {
                    buf.push(' ');
                }
                buf.push_str(&sentence);
                continue;
            }

            if buf_len >= min_chars && s_len <= max_chars {
                out.push(std::mem::replace(&mut buf, sentence));
                continue;
            }

            // The buffer is too short to stand alone, or the sentence
            // overflows on its own: pack the joined text word by word.
            let joined = if buf.is_empty() {
                sentence
            } else {
                format!("{buf} {sentence}")
            };
            buf.clear();
            let mut chunks = split_at_whitespace(&joined, max_chars);
            if let Some(last) = chunks.pop() {
                buf = last;
            }
            out.extend(chunks);
        }
    }

    if !buf.is_empty() {
        out.push(buf);
    }
    out
}

// ── Sentence detection ───────────────────────────────────────────────────────

/// Terminal punctuation, optional closing quotes/brackets, then whitespace.
/// The whitespace requirement keeps decimals ("3.14") and version numbers
/// intact.
static RE_SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[.!?]+["')\]]*\s+"#).unwrap());

/// Trailing words that end in a period without ending a sentence.
const ABBREVIATIONS: &[&str] = &[
    "Mr.", "Mrs.", "Ms.", "Dr.", "Prof.", "Sr.", "Jr.", "St.", "vs.", "etc.", "e.g.", "i.e.",
    "Fig.", "fig.", "al.", "No.", "approx.",
];

/// Split a paragraph into whitespace-normalised sentences.
///
/// A paragraph without terminal punctuation (a heading, a list item) comes
/// back as a single sentence.
fn split_sentences(paragraph: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0usize;

    for m in RE_SENTENCE_END.find_iter(paragraph) {
        let candidate = &paragraph[start..m.end()];
        if ends_with_abbreviation(candidate) {
            continue;
        }
        push_normalised(&mut sentences, candidate);
        start = m.end();
    }
    if start < paragraph.len() {
        push_normalised(&mut sentences, &paragraph[start..]);
    }
    sentences
}

fn ends_with_abbreviation(candidate: &str) -> bool {
    let Some(last_word) = candidate.trim_end().split_whitespace().next_back() else {
        return false;
    };
    ABBREVIATIONS.contains(&last_word)
}

/// Collapse internal whitespace (including line breaks) to single spaces and
/// drop the sentence if nothing remains.
fn push_normalised(sentences: &mut Vec<String>, raw: &str) {
    let normalised = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if !normalised.is_empty() {
        sentences.push(normalised);
    }
}

// ── Whitespace fallback and hard cuts ────────────────────────────────────────

/// Pack text into chunks of at most `max_chars`, breaking at whitespace.
/// Words longer than `max_chars` are cut by character count as a last resort.
fn split_at_whitespace(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut cur = String::new();
    let mut cur_len = 0usize;

    for word in text.split_whitespace().flat_map(|w| cut_word(w, max_chars)) {
        let w_len = char_len(&word);
        if cur_len == 0 {
            cur = word;
            cur_len = w_len;
        } else if cur_len + 1 + w_len <= max_chars {
            cur.push(' ');
            cur.push_str(&word);
            cur_len += 1 + w_len;
        } else {
            chunks.push(std::mem::replace(&mut cur, word));
            cur_len = w_len;
        }
    }
    if cur_len > 0 {
        chunks.push(cur);
    }
    chunks
}

/// Cut a single word into pieces of at most `max_chars` characters.
fn cut_word(word: &str, max_chars: usize) -> Vec<String> {
    if char_len(word) <= max_chars {
        return vec![word.to_string()];
    }
    let mut pieces = Vec::new();
    let mut cur = String::new();
    let mut count = 0usize;
    for ch in word.chars() {
        if count == max_chars {
            pieces.push(std::mem::take(&mut cur));
            count = 0;
        }
        cur.push(ch);
        count += 1;
    }
    if !cur.is_empty() {
        pieces.push(cur);
    }
    pieces
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn page(index: usize, text: &str) -> PageText {
        PageText {
            index,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_split_sentences_basic() {
        let s = split_sentences("First sentence. Second one! A third? Tail without end");
        assert_eq!(
            s,
            vec![
                "First sentence.",
                "Second one!",
                "A third?",
                "Tail without end"
            ]
        );
    }

    #[test]
    fn test_abbreviations_do_not_split() {
        let s = split_sentences("Dr. Smith spoke to Mrs. Jones. They left.");
        assert_eq!(s, vec!["Dr. Smith spoke to Mrs. Jones.", "They left."]);
    }

    #[test]
    fn test_decimals_do_not_split() {
        let s = split_sentences("Pi is roughly 3.14159 in value. Next sentence.");
        assert_eq!(s.len(), 2);
        assert!(s[0].contains("3.14159"));
    }

    #[test]
    fn test_quotes_stay_with_their_sentence() {
        let s = split_sentences("She said \"stop.\" He did not.");
        assert_eq!(s, vec!["She said \"stop.\"", "He did not."]);
    }

    #[test]
    fn test_heading_is_one_sentence() {
        let s = split_sentences("Chapter One");
        assert_eq!(s, vec!["Chapter One"]);
    }

    #[test]
    fn test_packing_respects_bounds() {
        let text = "One two three. Four five six. Seven eight nine. Ten eleven twelve. \
                    Thirteen fourteen. Fifteen sixteen seventeen. Eighteen nineteen twenty.";
        let chunks = chunk_page(text, 60, 10);
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert!(char_len(chunk) <= 60, "chunk {i} too long: {chunk:?}");
            if i + 1 < chunks.len() {
                assert!(char_len(chunk) >= 10, "chunk {i} too short: {chunk:?}");
            }
        }
    }

    #[test]
    fn test_short_run_merges_forward() {
        // "Hi." is under the minimum; it must not be flushed alone even
        // though the following sentence cannot share a segment with it.
        let long_tail = "word ".repeat(14); // 70 chars, overflows max=60
        let text = format!("Hi. {}", long_tail.trim());
        let chunks = chunk_page(&text, 60, 10);
        assert!(chunks[0].starts_with("Hi. word"), "got: {:?}", chunks[0]);
        for (i, chunk) in chunks.iter().enumerate() {
            if i + 1 < chunks.len() {
                assert!(char_len(chunk) >= 10, "chunk {i} too short: {chunk:?}");
            }
        }
    }

    #[test]
    fn test_long_sentence_falls_back_to_whitespace() {
        // 500 chars of words, no terminal punctuation anywhere.
        let words: Vec<String> = (0..100).map(|i| format!("word{i:02}")).collect();
        let text = words.join(" ");
        assert!(char_len(&text) >= 500);

        let chunks = chunk_page(&text, 50, 10);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(char_len(chunk) <= 50);
        }
        // No word was cut: re-joining the chunks reproduces the input.
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn test_unbroken_run_is_hard_cut() {
        let blob = "x".repeat(120);
        let chunks = chunk_page(&blob, 50, 10);
        let lens: Vec<usize> = chunks.iter().map(|c| char_len(c)).collect();
        assert_eq!(lens, vec![50, 50, 20]);
    }

    #[test]
    fn test_hard_cut_respects_char_boundaries() {
        let blob = "é".repeat(7); // two bytes per char
        let chunks = chunk_page(&blob, 3, 1);
        let lens: Vec<usize> = chunks.iter().map(|c| char_len(c)).collect();
        assert_eq!(lens, vec![3, 3, 1]);
    }

    #[test]
    fn test_sequence_is_contiguous_across_pages() {
        let pages = vec![
            page(0, "Page one, sentence one. Page one, sentence two."),
            page(1, ""),
            page(2, "Page three starts here. And continues."),
        ];
        let segments = segment_pages(&pages, 40, 5);

        let seqs: Vec<usize> = segments.iter().map(|s| s.seq).collect();
        assert_eq!(seqs, (0..segments.len()).collect::<Vec<_>>());

        let first_from_page_2 = segments.iter().find(|s| s.page == 2).unwrap();
        let last_from_page_0 = segments.iter().filter(|s| s.page == 0).next_back().unwrap();
        assert_eq!(first_from_page_2.seq, last_from_page_0.seq + 1);
        assert!(segments.iter().all(|s| s.page != 1));
    }

    #[test]
    fn test_segmentation_is_deterministic() {
        let pages = vec![page(0, "Some text here. More text there. And a tail")];
        let a = segment_pages(&pages, 30, 5);
        let b = segment_pages(&pages, 30, 5);
        assert_eq!(a, b);
    }

    #[test]
    fn test_internal_newlines_become_spaces() {
        let pages = vec![page(0, "A line\nbroken in two. Another one.")];
        let segments = segment_pages(&pages, 100, 5);
        assert_eq!(segments[0].text, "A line broken in two. Another one.");
    }

    #[test]
    fn test_estimated_duration_scales_with_rate() {
        let seg = Segment {
            seq: 0,
            page: 0,
            text: "x".repeat(150),
        };
        assert_eq!(seg.estimated_duration(1.0), Duration::from_secs_f32(10.0));
        assert_eq!(seg.estimated_duration(2.0), Duration::from_secs_f32(5.0));
    }
}
