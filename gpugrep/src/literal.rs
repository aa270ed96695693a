use memchr::{memchr_iter, memrchr};
use tracing::trace;

use crate::config::SearchOptions;
use crate::errors::{SearchError, SearchResult};
use crate::results::{MatchRecord, SearchOutput};
use crate::skip::{build_skip_table, MAX_PATTERN_LEN};

/// Word bytes for `-w` semantics: `[A-Za-z0-9_]`.
#[inline]
pub fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Whether a match spanning `[start, end)` sits on word boundaries.
#[inline]
pub fn on_word_boundary(text: &[u8], start: usize, end: usize) -> bool {
    let left_ok = start == 0 || !is_word_byte(text[start - 1]);
    let right_ok = end == text.len() || !is_word_byte(text[end]);
    left_ok && right_ok
}

/// Offset of the first byte of the line containing `pos`.
#[inline]
pub fn line_start_before(text: &[u8], pos: usize) -> u32 {
    memrchr(b'\n', &text[..pos]).map_or(0, |p| p as u32 + 1)
}

#[inline]
fn window_matches(window: &[u8], pattern: &[u8], case_insensitive: bool) -> bool {
    if case_insensitive {
        window.eq_ignore_ascii_case(pattern)
    } else {
        window == pattern
    }
}

/// Searches `text` for literal `pattern` with Boyer-Moore-Horspool,
/// producing non-overlapping matches in left-to-right order.
///
/// Line numbers are left unset (0); the aggregator fills them lazily.
pub fn find_literal(
    text: &[u8],
    pattern: &[u8],
    options: &SearchOptions,
) -> SearchResult<SearchOutput> {
    if pattern.len() > MAX_PATTERN_LEN {
        return Err(SearchError::config_error(format!(
            "literal pattern longer than {MAX_PATTERN_LEN} bytes"
        )));
    }
    if pattern.is_empty() {
        return Ok(line_records(text));
    }
    if options.invert_match {
        return Ok(find_inverted(text, pattern, options));
    }

    let mut out = SearchOutput::new();
    if text.len() < pattern.len() {
        return Ok(out);
    }

    let skip = build_skip_table(pattern, options.case_insensitive);
    trace!(pattern_len = pattern.len(), text_len = text.len(), "literal scan");

    for (start, end) in scan_range(text, 0..text.len(), pattern, &skip, options) {
        out.add_record(MatchRecord {
            position: start as u32,
            match_len: (end - start) as u32,
            line_start: line_start_before(text, start),
            line_num: 0,
            pattern_idx: 0,
        });
    }
    Ok(out)
}

/// BMH scan over `range`, yielding `(start, end)` pairs. Match starts are
/// confined to `range`; the final window may read up to `pattern.len() - 1`
/// bytes past `range.end` (never past the buffer).
pub(crate) fn scan_range(
    text: &[u8],
    range: std::ops::Range<usize>,
    pattern: &[u8],
    skip: &[u8; 256],
    options: &SearchOptions,
) -> Vec<(usize, usize)> {
    let m = pattern.len();
    let mut matches = Vec::new();
    let mut pos = range.start;
    let limit = range.end.min(text.len());

    while pos < limit && pos + m <= text.len() {
        let window = &text[pos..pos + m];
        if window_matches(window, pattern, options.case_insensitive) {
            if !options.word_boundary || on_word_boundary(text, pos, pos + m) {
                matches.push((pos, pos + m));
                pos += m;
                continue;
            }
        }
        let last = if options.case_insensitive {
            text[pos + m - 1].to_ascii_lowercase()
        } else {
            text[pos + m - 1]
        };
        pos += (skip[last as usize] as usize).max(1);
    }
    matches
}

/// Whether `pattern` occurs anywhere inside the line `[start, end)`.
fn line_contains(
    text: &[u8],
    start: usize,
    end: usize,
    pattern: &[u8],
    skip: &[u8; 256],
    options: &SearchOptions,
) -> bool {
    if end - start < pattern.len() {
        return false;
    }
    // restrict starts so the window stays inside the line
    let probe = SearchOptions {
        invert_match: false,
        ..*options
    };
    let last_start = end - pattern.len() + 1;
    !scan_range(text, start..last_start, pattern, skip, &probe).is_empty()
}

/// Line-wise inversion: emits one synthetic record per line that contains
/// no occurrence of `pattern`. The record covers the whole line.
fn find_inverted(text: &[u8], pattern: &[u8], options: &SearchOptions) -> SearchOutput {
    let skip = build_skip_table(pattern, options.case_insensitive);
    let mut out = SearchOutput::new();

    for (line_start, line_end) in line_spans(text) {
        if !line_contains(text, line_start, line_end, pattern, &skip, options) {
            out.add_record(MatchRecord {
                position: line_start as u32,
                match_len: (line_end - line_start) as u32,
                line_start: line_start as u32,
                line_num: 0,
                pattern_idx: 0,
            });
        }
    }
    out
}

/// One zero-length record per line; used for the empty pattern.
pub fn line_records(text: &[u8]) -> SearchOutput {
    let mut out = SearchOutput::new();
    for (line_start, _line_end) in line_spans(text) {
        out.add_record(MatchRecord {
            position: line_start as u32,
            match_len: 0,
            line_start: line_start as u32,
            line_num: 0,
            pattern_idx: 0,
        });
    }
    out
}

/// `(start, end)` spans of every line, newline excluded. A trailing line
/// without a newline is included; an empty buffer has no lines.
pub fn line_spans(text: &[u8]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0usize;
    for nl in memchr_iter(b'\n', text) {
        spans.push((start, nl));
        start = nl + 1;
    }
    if start < text.len() {
        spans.push((start, text.len()));
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> SearchOptions {
        SearchOptions::default()
    }

    fn positions(out: &SearchOutput) -> Vec<u32> {
        out.records.iter().map(|r| r.position).collect()
    }

    #[test]
    fn test_basic_non_overlapping() {
        let out = find_literal(b"hello world hello", b"hello", &opts()).unwrap();
        assert_eq!(positions(&out), vec![0, 12]);
        assert_eq!(out.records[0].match_len, 5);
        assert_eq!(out.records[0].line_start, 0);
        assert_eq!(out.records[1].line_start, 0);
    }

    #[test]
    fn test_overlapping_pattern_advances_past_match() {
        let out = find_literal(b"aaaa", b"aa", &opts()).unwrap();
        assert_eq!(positions(&out), vec![0, 2]);
    }

    #[test]
    fn test_case_insensitive() {
        let o = SearchOptions {
            case_insensitive: true,
            ..opts()
        };
        let out = find_literal(b"Hello HELLO hello HeLLo", b"hello", &o).unwrap();
        assert_eq!(positions(&out), vec![0, 6, 12, 18]);
    }

    #[test]
    fn test_word_boundary() {
        let o = SearchOptions {
            word_boundary: true,
            ..opts()
        };
        let out = find_literal(b"the theory there", b"the", &o).unwrap();
        assert_eq!(positions(&out), vec![0]);
    }

    #[test]
    fn test_pattern_equals_text() {
        let out = find_literal(b"needle", b"needle", &opts()).unwrap();
        assert_eq!(positions(&out), vec![0]);
    }

    #[test]
    fn test_pattern_longer_than_text() {
        let out = find_literal(b"abc", b"abcdef", &opts()).unwrap();
        assert!(out.records.is_empty());
        assert_eq!(out.total_matches, 0);
    }

    #[test]
    fn test_line_start_on_later_line() {
        let out = find_literal(b"abc\ndef needle", b"needle", &opts()).unwrap();
        assert_eq!(out.records[0].position, 8);
        assert_eq!(out.records[0].line_start, 4);
    }

    #[test]
    fn test_invert_match() {
        let text = b"line with pattern\nline without\nanother with pattern";
        let o = SearchOptions {
            invert_match: true,
            ..opts()
        };
        let out = find_literal(text, b"pattern", &o).unwrap();
        assert_eq!(out.records.len(), 1);
        let r = out.records[0];
        assert_eq!(r.position, 18);
        assert_eq!(&text[r.position as usize..r.end() as usize], b"line without");
    }

    #[test]
    fn test_empty_pattern_one_record_per_line() {
        let out = find_literal(b"a\nbb\nccc", b"", &opts()).unwrap();
        assert_eq!(out.records.len(), 3);
        assert!(out.records.iter().all(|r| r.match_len == 0));
        assert_eq!(positions(&out), vec![0, 2, 5]);
    }

    #[test]
    fn test_line_spans_trailing_newline() {
        assert_eq!(line_spans(b"a\nb\n"), vec![(0, 1), (2, 3)]);
        assert_eq!(line_spans(b"a\nb"), vec![(0, 1), (2, 3)]);
        assert_eq!(line_spans(b""), Vec::<(usize, usize)>::new());
    }

    #[test]
    fn test_pattern_too_long_is_config_error() {
        let long = vec![b'x'; MAX_PATTERN_LEN + 1];
        assert!(matches!(
            find_literal(b"xxxx", &long, &opts()),
            Err(SearchError::Config(_))
        ));
    }

    #[test]
    fn test_match_at_buffer_end_without_newline() {
        let out = find_literal(b"first\nlast word", b"word", &opts()).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].position, 11);
        assert_eq!(out.records[0].line_start, 6);
    }
}
