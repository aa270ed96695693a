/// A single match in the searched buffer, in the form shared by every
/// backend after aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchRecord {
    /// Byte offset of the match start.
    pub position: u32,
    /// Number of matched bytes. Zero only for synthetic line records
    /// (empty pattern).
    pub match_len: u32,
    /// Byte offset of the first byte of the line containing `position`.
    pub line_start: u32,
    /// 1-based line number; 0 means "unset, compute lazily on the host".
    pub line_num: u32,
    /// Which pattern matched (0 for single-pattern searches).
    pub pattern_idx: u32,
}

impl MatchRecord {
    /// End offset of the match (exclusive).
    pub fn end(&self) -> u32 {
        self.position + self.match_len
    }
}

/// The complete result of one search over one buffer.
#[derive(Debug, Clone, Default)]
pub struct SearchOutput {
    /// Match records in canonical order (line_start ascending, then position).
    pub records: Vec<MatchRecord>,
    /// True match count. May exceed `records.len()` when the backend
    /// truncated at its result cap.
    pub total_matches: u64,
}

impl SearchOutput {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add_record(&mut self, record: MatchRecord) {
        self.records.push(record);
        self.total_matches += 1;
    }

    pub fn merge(&mut self, other: SearchOutput) {
        self.total_matches += other.total_matches;
        self.records.extend(other.records);
    }

    pub fn has_matches(&self) -> bool {
        self.total_matches > 0
    }

    /// Whether the backend dropped records beyond its cap.
    pub fn is_truncated(&self) -> bool {
        self.total_matches > self.records.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_end() {
        let r = MatchRecord {
            position: 12,
            match_len: 5,
            line_start: 0,
            line_num: 1,
            pattern_idx: 0,
        };
        assert_eq!(r.end(), 17);
    }

    #[test]
    fn test_add_record_counts() {
        let mut out = SearchOutput::new();
        assert!(!out.has_matches());

        out.add_record(MatchRecord {
            position: 0,
            match_len: 3,
            line_start: 0,
            line_num: 1,
            pattern_idx: 0,
        });
        out.add_record(MatchRecord {
            position: 10,
            match_len: 3,
            line_start: 8,
            line_num: 2,
            pattern_idx: 0,
        });

        assert!(out.has_matches());
        assert_eq!(out.total_matches, 2);
        assert_eq!(out.records.len(), 2);
        assert!(!out.is_truncated());
    }

    #[test]
    fn test_merge() {
        let mut a = SearchOutput::new();
        a.add_record(MatchRecord {
            position: 0,
            match_len: 1,
            line_start: 0,
            line_num: 1,
            pattern_idx: 0,
        });

        let mut b = SearchOutput::new();
        b.add_record(MatchRecord {
            position: 4,
            match_len: 1,
            line_start: 2,
            line_num: 2,
            pattern_idx: 1,
        });
        b.total_matches += 5; // simulate truncation upstream

        a.merge(b);
        assert_eq!(a.records.len(), 2);
        assert_eq!(a.total_matches, 7);
        assert!(a.is_truncated());
    }
}
