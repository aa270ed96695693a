use crate::literal::is_word_byte;

use super::nfa::{CompiledRegex, StateKind, NO_EDGE};

/// Thompson-style parallel-state simulation over a text buffer.
///
/// For each start position the evaluator finds the longest match (greedy);
/// scanning is left-to-right and non-overlapping, resuming at the end of
/// each reported match. Zero-length matches advance by one byte so the scan
/// always makes progress.
pub struct Matcher<'r> {
    re: &'r CompiledRegex,
}

/// A consuming-state set deduplicated by state index, giving the simulation
/// its O(states x text) bound per start position.
struct StateSet {
    dense: Vec<u16>,
    member: Vec<bool>,
}

impl StateSet {
    fn new(n: usize) -> Self {
        Self {
            dense: Vec::with_capacity(n),
            member: vec![false; n],
        }
    }

    fn clear(&mut self) {
        for &s in &self.dense {
            self.member[s as usize] = false;
        }
        self.dense.clear();
    }

    fn insert(&mut self, s: u16) -> bool {
        if self.member[s as usize] {
            return false;
        }
        self.member[s as usize] = true;
        self.dense.push(s);
        true
    }

    fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }
}

impl<'r> Matcher<'r> {
    pub fn new(re: &'r CompiledRegex) -> Self {
        Self { re }
    }

    /// All non-overlapping matches as `(start, end)` byte ranges.
    pub fn find_all(&self, text: &[u8]) -> Vec<(usize, usize)> {
        self.find_in(text, 0..text.len())
    }

    /// Non-overlapping matches whose start lies within `range`. Assertion
    /// context (line and word boundaries) still comes from the full buffer.
    pub fn find_in(&self, text: &[u8], range: std::ops::Range<usize>) -> Vec<(usize, usize)> {
        let mut matches = Vec::new();
        let mut current = StateSet::new(self.re.states.len());
        let mut next = StateSet::new(self.re.states.len());

        let mut pos = range.start;
        let mut last_end: Option<usize> = None;
        while pos <= range.end {
            if self.re.anchored_start && !at_line_start(text, pos) {
                pos += 1;
                continue;
            }
            match self.match_at(text, pos, range.end, &mut current, &mut next) {
                Some(end) => {
                    // an empty match butting against the previous match is
                    // a scan artifact, not a new occurrence
                    if end == pos && last_end == Some(pos) {
                        pos += 1;
                        continue;
                    }
                    matches.push((pos, end));
                    last_end = Some(end);
                    pos = if end > pos { end } else { pos + 1 };
                }
                None => pos += 1,
            }
        }
        matches
    }

    /// Longest match end starting exactly at `start`, scanning no further
    /// than `limit`.
    fn match_at(
        &self,
        text: &[u8],
        start: usize,
        limit: usize,
        current: &mut StateSet,
        next: &mut StateSet,
    ) -> Option<usize> {
        let mut best: Option<usize> = None;

        current.clear();
        self.add_closure(current, self.re.start, text, start, &mut best);

        let mut pos = start;
        while pos < limit && !current.is_empty() {
            let b = text[pos];
            next.clear();
            for i in 0..current.dense.len() {
                let s = current.dense[i];
                let st = &self.re.states[s as usize];
                let consumed = match st.kind {
                    StateKind::Literal => {
                        if st.case_insensitive {
                            b.eq_ignore_ascii_case(&st.byte)
                        } else {
                            b == st.byte
                        }
                    }
                    StateKind::Class => self.class_matches(st.class, st.negated, b),
                    StateKind::Dot => b != b'\n',
                    StateKind::Any => true,
                    _ => false,
                };
                if consumed && st.out != NO_EDGE {
                    self.add_closure(next, st.out, text, pos + 1, &mut best);
                }
            }
            std::mem::swap(current, next);
            pos += 1;
        }
        best
    }

    fn class_matches(&self, class: u16, negated: bool, b: u8) -> bool {
        let bits = &self.re.classes[class as usize];
        let has = bits[(b >> 5) as usize] & (1 << (b & 31)) != 0;
        if negated {
            b != b'\n' && !has
        } else {
            has
        }
    }

    /// Adds the epsilon closure of `state` to `set`. Zero-width assertions
    /// are tested against the position context and only contribute when
    /// their predicate holds; reaching the match state records `pos` as a
    /// candidate match end.
    fn add_closure(
        &self,
        set: &mut StateSet,
        state: u16,
        text: &[u8],
        pos: usize,
        best: &mut Option<usize>,
    ) {
        let mut stack = vec![state];
        while let Some(s) = stack.pop() {
            if !set.insert(s) {
                continue;
            }
            let st = &self.re.states[s as usize];
            match st.kind {
                StateKind::Split => {
                    if st.out != NO_EDGE {
                        stack.push(st.out);
                    }
                    if st.out2 != NO_EDGE {
                        stack.push(st.out2);
                    }
                }
                StateKind::GroupStart | StateKind::GroupEnd => {
                    if st.out != NO_EDGE {
                        stack.push(st.out);
                    }
                }
                StateKind::Match => {
                    if best.map_or(true, |b| pos > b) {
                        *best = Some(pos);
                    }
                }
                StateKind::LineStart => {
                    if at_line_start(text, pos) && st.out != NO_EDGE {
                        stack.push(st.out);
                    }
                }
                StateKind::LineEnd => {
                    if at_line_end(text, pos) && st.out != NO_EDGE {
                        stack.push(st.out);
                    }
                }
                StateKind::WordBoundary => {
                    if at_word_boundary(text, pos) && st.out != NO_EDGE {
                        stack.push(st.out);
                    }
                }
                StateKind::NotWordBoundary => {
                    if !at_word_boundary(text, pos) && st.out != NO_EDGE {
                        stack.push(st.out);
                    }
                }
                // consuming states wait in the set for the next byte
                StateKind::Literal | StateKind::Class | StateKind::Dot | StateKind::Any => {}
                // Perl-only kinds never reach this evaluator
                _ => {}
            }
        }
    }

    /// Capture spans of the first match at or after `start`, for callers
    /// that want group positions. Threads carry their own capture slots and
    /// are deduplicated by state, first thread wins.
    pub fn captures_at(
        &self,
        text: &[u8],
        start: usize,
    ) -> Option<(usize, usize, Vec<Option<(usize, usize)>>)> {
        let num_slots = self.re.num_groups as usize * 2;
        let mut pos = start;
        while pos <= text.len() {
            if self.re.anchored_start && !at_line_start(text, pos) {
                pos += 1;
                continue;
            }
            if let Some((end, caps)) = self.captures_from(text, pos, num_slots) {
                let groups = (0..self.re.num_groups as usize)
                    .map(|g| match (caps[g * 2], caps[g * 2 + 1]) {
                        (Some(s), Some(e)) => Some((s, e)),
                        _ => None,
                    })
                    .collect();
                return Some((pos, end, groups));
            }
            pos += 1;
        }
        None
    }

    fn captures_from(
        &self,
        text: &[u8],
        start: usize,
        num_slots: usize,
    ) -> Option<(usize, Vec<Option<usize>>)> {
        type Thread = (u16, Vec<Option<usize>>);
        let mut best: Option<(usize, Vec<Option<usize>>)> = None;

        let mut current: Vec<Thread> = Vec::new();
        let mut seen = vec![false; self.re.states.len()];
        self.spawn(
            &mut current,
            &mut seen,
            self.re.start,
            vec![None; num_slots],
            text,
            start,
            &mut best,
        );

        let mut pos = start;
        while pos < text.len() && !current.is_empty() {
            let b = text[pos];
            let mut next: Vec<Thread> = Vec::new();
            seen.iter_mut().for_each(|s| *s = false);
            for (s, caps) in current.drain(..) {
                let st = &self.re.states[s as usize];
                let consumed = match st.kind {
                    StateKind::Literal => {
                        if st.case_insensitive {
                            b.eq_ignore_ascii_case(&st.byte)
                        } else {
                            b == st.byte
                        }
                    }
                    StateKind::Class => self.class_matches(st.class, st.negated, b),
                    StateKind::Dot => b != b'\n',
                    StateKind::Any => true,
                    _ => false,
                };
                if consumed && st.out != NO_EDGE {
                    self.spawn(&mut next, &mut seen, st.out, caps, text, pos + 1, &mut best);
                }
            }
            current = next;
            pos += 1;
        }
        best
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn(
        &self,
        threads: &mut Vec<(u16, Vec<Option<usize>>)>,
        seen: &mut [bool],
        state: u16,
        caps: Vec<Option<usize>>,
        text: &[u8],
        pos: usize,
        best: &mut Option<(usize, Vec<Option<usize>>)>,
    ) {
        if seen[state as usize] {
            return;
        }
        seen[state as usize] = true;
        let st = &self.re.states[state as usize];
        match st.kind {
            StateKind::Split => {
                if st.out != NO_EDGE {
                    self.spawn(threads, seen, st.out, caps.clone(), text, pos, best);
                }
                if st.out2 != NO_EDGE {
                    self.spawn(threads, seen, st.out2, caps, text, pos, best);
                }
            }
            StateKind::GroupStart => {
                let mut caps = caps;
                if let Some(slot) = caps.get_mut(st.group as usize * 2) {
                    *slot = Some(pos);
                }
                if st.out != NO_EDGE {
                    self.spawn(threads, seen, st.out, caps, text, pos, best);
                }
            }
            StateKind::GroupEnd => {
                let mut caps = caps;
                if let Some(slot) = caps.get_mut(st.group as usize * 2 + 1) {
                    *slot = Some(pos);
                }
                if st.out != NO_EDGE {
                    self.spawn(threads, seen, st.out, caps, text, pos, best);
                }
            }
            StateKind::Match => {
                if best.as_ref().map_or(true, |(b, _)| pos > *b) {
                    *best = Some((pos, caps));
                }
            }
            StateKind::LineStart if at_line_start(text, pos) => {
                if st.out != NO_EDGE {
                    self.spawn(threads, seen, st.out, caps, text, pos, best);
                }
            }
            StateKind::LineEnd if at_line_end(text, pos) => {
                if st.out != NO_EDGE {
                    self.spawn(threads, seen, st.out, caps, text, pos, best);
                }
            }
            StateKind::WordBoundary if at_word_boundary(text, pos) => {
                if st.out != NO_EDGE {
                    self.spawn(threads, seen, st.out, caps, text, pos, best);
                }
            }
            StateKind::NotWordBoundary if !at_word_boundary(text, pos) => {
                if st.out != NO_EDGE {
                    self.spawn(threads, seen, st.out, caps, text, pos, best);
                }
            }
            StateKind::Literal | StateKind::Class | StateKind::Dot | StateKind::Any => {
                threads.push((state, caps));
            }
            _ => {}
        }
    }
}

#[inline]
pub fn at_line_start(text: &[u8], pos: usize) -> bool {
    pos == 0 || text[pos - 1] == b'\n'
}

#[inline]
pub fn at_line_end(text: &[u8], pos: usize) -> bool {
    pos == text.len() || text[pos] == b'\n'
}

#[inline]
fn at_word_boundary(text: &[u8], pos: usize) -> bool {
    let before = pos > 0 && is_word_byte(text[pos - 1]);
    let after = pos < text.len() && is_word_byte(text[pos]);
    before != after
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchOptions;

    fn compile(pat: &str) -> CompiledRegex {
        let options = SearchOptions {
            extended: true,
            ..Default::default()
        };
        CompiledRegex::compile(pat.as_bytes(), &options).unwrap()
    }

    fn find(pat: &str, text: &str) -> Vec<(usize, usize)> {
        let re = compile(pat);
        Matcher::new(&re).find_all(text.as_bytes())
    }

    #[test]
    fn test_plus_greedy() {
        // "ab+c" over "ac abc abbc abbbc": ac excluded
        let m = find("ab+c", "ac abc abbc abbbc");
        assert_eq!(m, vec![(3, 6), (7, 11), (12, 17)]);
    }

    #[test]
    fn test_alternation_positions() {
        let m = find("cat|dog", "cat dog bird cat");
        assert_eq!(m, vec![(0, 3), (4, 7), (13, 16)]);
    }

    #[test]
    fn test_greedy_longest_per_start() {
        let m = find("a+", "aaa b aa");
        assert_eq!(m, vec![(0, 3), (6, 8)]);
    }

    #[test]
    fn test_star_and_question() {
        let m = find("colou?r", "color colour");
        assert_eq!(m, vec![(0, 5), (6, 12)]);
    }

    #[test]
    fn test_interval_non_overlapping() {
        let m = find("a{1,3}", "aaaaa");
        assert_eq!(m, vec![(0, 3), (3, 5)]);
    }

    #[test]
    fn test_dot_stays_on_line() {
        let m = find("a.c", "a\nc abc");
        assert_eq!(m, vec![(4, 7)]);
    }

    #[test]
    fn test_class_and_negated_class() {
        assert_eq!(find("[0-9]+", "ab 123 c9"), vec![(3, 6), (8, 9)]);
        // negated class must not cross the newline
        assert_eq!(find("x[^y]", "x\nxz"), vec![(2, 4)]);
    }

    #[test]
    fn test_line_anchors() {
        let text = "foo bar\nfoo baz";
        assert_eq!(find("^foo", text), vec![(0, 3), (8, 11)]);
        assert_eq!(find("bar$", text), vec![(4, 7)]);
        assert_eq!(find("baz$", text), vec![(12, 15)]);
    }

    #[test]
    fn test_word_boundary_assert() {
        let m = find(r"\bthe\b", "the theory there");
        assert_eq!(m, vec![(0, 3)]);
    }

    #[test]
    fn test_empty_match_progress() {
        // a* matches empty everywhere but must advance
        let m = find("a*", "ba");
        assert_eq!(m, vec![(0, 0), (1, 2)]);
    }

    #[test]
    fn test_case_insensitive_literals() {
        let options = SearchOptions {
            extended: true,
            case_insensitive: true,
            ..Default::default()
        };
        let re = CompiledRegex::compile(b"abc", &options).unwrap();
        let m = Matcher::new(&re).find_all(b"ABC abc AbC");
        assert_eq!(m.len(), 3);
    }

    #[test]
    fn test_captures() {
        let re = compile("(a+)(b+)");
        let m = Matcher::new(&re).captures_at(b"xx aabbb", 0).unwrap();
        assert_eq!((m.0, m.1), (3, 8));
        assert_eq!(m.2[0], Some((3, 5)));
        assert_eq!(m.2[1], Some((5, 8)));
    }

    #[test]
    fn test_find_in_range_restricted() {
        let re = compile("ab");
        let text = b"ab ab ab";
        let m = Matcher::new(&re).find_in(text, 2..6);
        assert_eq!(m, vec![(3, 5)]);
    }
}
