use memchr::memchr_iter;

use crate::gpu::RawMatch;
use crate::literal::line_spans;
use crate::results::{MatchRecord, SearchOutput};

/// Per-line offsets and lengths for the line-partitioned kernels and the
/// invert paths.
#[derive(Debug, Clone, Default)]
pub struct LineTable {
    pub offsets: Vec<u32>,
    pub lengths: Vec<u32>,
}

impl LineTable {
    pub fn build(text: &[u8]) -> Self {
        let mut offsets = Vec::new();
        let mut lengths = Vec::new();
        for (start, end) in line_spans(text) {
            offsets.push(start as u32);
            lengths.push((end - start) as u32);
        }
        Self { offsets, lengths }
    }

    pub fn num_lines(&self) -> usize {
        self.offsets.len()
    }
}

/// Incremental newline counter: line numbers are filled lazily, and the
/// cursor makes a pass over sorted records O(text) in total instead of
/// O(text) per record.
pub struct LineNumberer<'a> {
    text: &'a [u8],
    last_offset: usize,
    last_line: u32,
}

impl<'a> LineNumberer<'a> {
    pub fn new(text: &'a [u8]) -> Self {
        Self {
            text,
            last_offset: 0,
            last_line: 1,
        }
    }

    /// 1-based line number of the line starting at `line_start`. Offsets
    /// must be queried in non-decreasing order.
    pub fn line_number_at(&mut self, line_start: u32) -> u32 {
        let target = line_start as usize;
        if target < self.last_offset {
            // out-of-order query: restart the cursor
            self.last_offset = 0;
            self.last_line = 1;
        }
        let newlines = memchr_iter(b'\n', &self.text[self.last_offset..target]).count();
        self.last_line += newlines as u32;
        self.last_offset = target;
        self.last_line
    }
}

/// Establishes canonical order (line_start ascending, position breaking
/// ties) and fills any unset line numbers.
pub fn number_and_sort(records: &mut [MatchRecord], text: &[u8]) {
    records.sort_by(|a, b| {
        a.line_start
            .cmp(&b.line_start)
            .then(a.position.cmp(&b.position))
    });

    let mut numberer = LineNumberer::new(text);
    for record in records.iter_mut() {
        if record.line_num == 0 {
            record.line_num = numberer.line_number_at(record.line_start);
        }
    }
}

/// Converts backend records to the common form and canonicalizes them.
pub fn finalize(
    raw: Vec<RawMatch>,
    total_matches: u64,
    text: &[u8],
    pattern_idx: u32,
) -> SearchOutput {
    let mut records: Vec<MatchRecord> = raw
        .into_iter()
        .map(|r| MatchRecord {
            position: r.position,
            match_len: r.len,
            line_start: r.line_start,
            line_num: r.line_num,
            pattern_idx,
        })
        .collect();

    number_and_sort(&mut records, text);

    SearchOutput {
        records,
        total_matches,
    }
}

/// Keeps only the first record of each line, preserving order. Used by the
/// line-oriented output mode and the multi-pattern union.
pub fn dedup_by_line(records: &mut Vec<MatchRecord>) {
    records.dedup_by_key(|r| r.line_start);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_table() {
        let table = LineTable::build(b"ab\nc\n\nlast");
        assert_eq!(table.offsets, vec![0, 3, 5, 6]);
        assert_eq!(table.lengths, vec![2, 1, 0, 4]);
        assert_eq!(table.num_lines(), 4);
    }

    #[test]
    fn test_line_numberer_monotone() {
        let text = b"a\nb\nc\nd";
        let mut n = LineNumberer::new(text);
        assert_eq!(n.line_number_at(0), 1);
        assert_eq!(n.line_number_at(2), 2);
        assert_eq!(n.line_number_at(6), 4);
        // going backwards restarts the cursor and stays correct
        assert_eq!(n.line_number_at(4), 3);
    }

    #[test]
    fn test_finalize_sorts_and_numbers() {
        let text = b"one two\nthree one";
        let raw = vec![
            RawMatch {
                position: 14,
                len: 3,
                line_start: 8,
                line_num: 0,
            },
            RawMatch {
                position: 0,
                len: 3,
                line_start: 0,
                line_num: 0,
            },
        ];
        let out = finalize(raw, 2, text, 0);
        assert_eq!(out.records[0].position, 0);
        assert_eq!(out.records[0].line_num, 1);
        assert_eq!(out.records[1].position, 14);
        assert_eq!(out.records[1].line_num, 2);
        assert_eq!(out.total_matches, 2);
    }

    #[test]
    fn test_finalize_keeps_preset_line_numbers() {
        let text = b"x\ny";
        let raw = vec![RawMatch {
            position: 2,
            len: 1,
            line_start: 2,
            line_num: 2,
        }];
        let out = finalize(raw, 1, text, 3);
        assert_eq!(out.records[0].line_num, 2);
        assert_eq!(out.records[0].pattern_idx, 3);
    }

    #[test]
    fn test_dedup_by_line() {
        let mut records = vec![
            MatchRecord {
                position: 0,
                match_len: 1,
                line_start: 0,
                line_num: 1,
                pattern_idx: 0,
            },
            MatchRecord {
                position: 3,
                match_len: 1,
                line_start: 0,
                line_num: 1,
                pattern_idx: 0,
            },
            MatchRecord {
                position: 9,
                match_len: 1,
                line_start: 8,
                line_num: 2,
                pattern_idx: 0,
            },
        ];
        dedup_by_line(&mut records);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].line_start, 8);
    }
}
