use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::{debug, info, warn};

use crate::aggregate::{self, LineTable};
use crate::config::{BackendOverride, DispatchTuning, SearchOptions};
use crate::dispatch::{Backend, Dispatcher, Workload};
use crate::errors::SearchResult;
use crate::gpu::{self, GpuBackend};
use crate::literal::{self, line_spans, line_start_before, on_word_boundary};
use crate::pcre::PerlRegex;
use crate::regex::{CompiledRegex, Matcher};
use crate::results::{MatchRecord, SearchOutput};
use crate::skip::build_skip_table;

/// Compiled patterns are cached process-wide, keyed by the pattern bytes
/// and the option bits that affect compilation.
static REGEX_CACHE: Lazy<DashMap<(Vec<u8>, u8), Arc<CompiledRegex>>> = Lazy::new(DashMap::new);

fn cached_compile(pattern: &[u8], options: &SearchOptions) -> SearchResult<Arc<CompiledRegex>> {
    let flags = options.case_insensitive as u8 | (options.extended as u8) << 1;
    let key = (pattern.to_vec(), flags);
    if let Some(entry) = REGEX_CACHE.get(&key) {
        return Ok(entry.clone());
    }
    let re = Arc::new(CompiledRegex::compile(pattern, options)?);
    REGEX_CACHE.insert(key, re.clone());
    Ok(re)
}

/// Whether the pattern contains no regex metacharacters under the active
/// syntax, so the literal engine can serve it unchanged.
fn is_literal_pattern(pattern: &[u8], extended: bool) -> bool {
    let basic_meta = |b: u8| matches!(b, b'.' | b'[' | b'*' | b'^' | b'$' | b'\\');
    let ere_meta = |b: u8| matches!(b, b'+' | b'?' | b'|' | b'(' | b')' | b'{' | b'}');
    !pattern
        .iter()
        .any(|&b| basic_meta(b) || (extended && ere_meta(b)))
}

/// One search facade over all three execution engines.
///
/// The searcher owns the dispatcher (and through it the lazily created GPU
/// engines); the caller owns the text buffer and the result.
pub struct Searcher {
    options: SearchOptions,
    dispatcher: Dispatcher,
}

impl Searcher {
    pub fn new(options: SearchOptions) -> Self {
        Self::with_config(options, DispatchTuning::default(), BackendOverride::Auto)
    }

    pub fn with_config(
        options: SearchOptions,
        tuning: DispatchTuning,
        backend: BackendOverride,
    ) -> Self {
        Self {
            options,
            dispatcher: Dispatcher::new(tuning, backend),
        }
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    /// Searches `text` for a single pattern.
    pub fn search(&self, text: &[u8], pattern: &[u8]) -> SearchResult<SearchOutput> {
        if text.len() > u32::MAX as usize {
            // match records carry u32 offsets across every backend
            return Err(crate::errors::SearchError::config_error(
                "buffers above 4 GiB are not supported",
            ));
        }
        self.search_one(text, pattern, 0, 1)
    }

    /// Searches `text` for several patterns and unions the results by line,
    /// mimicking `grep -e p1 -e p2`: one record per line, the earliest
    /// pattern's first match wins. With `invert_match` a line is selected
    /// only when *no* pattern matches it.
    pub fn search_all(&self, text: &[u8], patterns: &[&[u8]]) -> SearchResult<SearchOutput> {
        match patterns.len() {
            0 => return Ok(SearchOutput::new()),
            1 => {
                let mut out = self.search(text, patterns[0])?;
                aggregate::dedup_by_line(&mut out.records);
                out.total_matches = out.records.len() as u64;
                return Ok(out);
            }
            _ => {}
        }

        let mut per_line: HashMap<u32, (usize, MatchRecord)> = HashMap::new();
        let mut order: Vec<u32> = Vec::new();
        for (idx, pattern) in patterns.iter().enumerate() {
            let out = self.search_one(text, pattern, idx as u32, patterns.len())?;
            for record in out.records {
                match per_line.entry(record.line_start) {
                    std::collections::hash_map::Entry::Vacant(v) => {
                        v.insert((1, record));
                        order.push(record.line_start);
                    }
                    std::collections::hash_map::Entry::Occupied(mut o) => {
                        o.get_mut().0 += 1;
                    }
                }
            }
        }

        // invert selects lines that match no pattern: every per-pattern run
        // must have emitted the line
        let need = if self.options.invert_match {
            patterns.len()
        } else {
            1
        };
        let mut records: Vec<MatchRecord> = order
            .into_iter()
            .filter_map(|line| {
                let (count, record) = per_line.get(&line)?;
                (*count >= need).then_some(*record)
            })
            .collect();
        records.sort_by_key(|r| r.line_start);

        let total = records.len() as u64;
        info!(patterns = patterns.len(), lines = total, "multi-pattern union");
        Ok(SearchOutput {
            records,
            total_matches: total,
        })
    }

    fn search_one(
        &self,
        text: &[u8],
        pattern: &[u8],
        pattern_idx: u32,
        num_patterns: usize,
    ) -> SearchResult<SearchOutput> {
        let options = &self.options;

        if pattern.is_empty() {
            let mut out = literal::line_records(text);
            for r in &mut out.records {
                r.pattern_idx = pattern_idx;
            }
            aggregate::number_and_sort(&mut out.records, text);
            return Ok(out);
        }

        if options.perl {
            return self.search_perl(text, pattern, pattern_idx);
        }

        if options.fixed_string || is_literal_pattern(pattern, options.extended) {
            return self.search_literal(text, pattern, pattern_idx, num_patterns);
        }

        self.search_regex(text, pattern, pattern_idx, num_patterns)
    }

    fn search_literal(
        &self,
        text: &[u8],
        pattern: &[u8],
        pattern_idx: u32,
        num_patterns: usize,
    ) -> SearchResult<SearchOutput> {
        let workload = Workload {
            pattern,
            text_len: text.len() as u64,
            num_patterns,
            regex_states: None,
        };
        let backend = self.dispatcher.select(&workload, &self.options);
        debug!(?backend, pattern_len = pattern.len(), "literal search");

        // the literal kernel has no invert path, so a forced GPU override
        // still runs inverted literal searches on the host
        if backend != Backend::Cpu && !self.options.invert_match {
            if let Some(out) = self.try_gpu_literal(backend, text, pattern, pattern_idx) {
                return Ok(out);
            }
        }

        let mut out = literal::find_literal(text, pattern, &self.options)?;
        for r in &mut out.records {
            r.pattern_idx = pattern_idx;
        }
        aggregate::number_and_sort(&mut out.records, text);
        Ok(out)
    }

    fn try_gpu_literal(
        &self,
        backend: Backend,
        text: &[u8],
        pattern: &[u8],
        pattern_idx: u32,
    ) -> Option<SearchOutput> {
        if pattern.len() > crate::skip::MAX_PATTERN_LEN {
            return None; // surfaced as a config error on the CPU path
        }
        let engine: &dyn GpuBackend = self.dispatcher.engine(backend)?;
        let skip = build_skip_table(pattern, self.options.case_insensitive);
        let flags = gpu::option_flags(&self.options);
        match engine.search_literal(text, pattern, &skip, flags) {
            Ok(raw) => Some(aggregate::finalize(
                raw.records,
                raw.total_matches,
                text,
                pattern_idx,
            )),
            Err(e) => {
                warn!(engine = engine.name(), "gpu literal search failed, retrying on cpu: {e}");
                None
            }
        }
    }

    fn search_regex(
        &self,
        text: &[u8],
        pattern: &[u8],
        pattern_idx: u32,
        num_patterns: usize,
    ) -> SearchResult<SearchOutput> {
        let re = cached_compile(pattern, &self.options)?;

        let workload = Workload {
            pattern,
            text_len: text.len() as u64,
            num_patterns,
            regex_states: Some(re.num_states()),
        };
        let backend = self.dispatcher.select(&workload, &self.options);
        debug!(?backend, states = re.num_states(), "regex search");

        if backend != Backend::Cpu && re.fits_gpu() {
            if let Some(out) = self.try_gpu_regex(backend, text, &re, pattern_idx) {
                return Ok(out);
            }
        }

        let spans = Matcher::new(&re).find_all(text);
        Ok(self.assemble_spans(text, spans, pattern_idx))
    }

    fn try_gpu_regex(
        &self,
        backend: Backend,
        text: &[u8],
        re: &CompiledRegex,
        pattern_idx: u32,
    ) -> Option<SearchOutput> {
        let engine: &dyn GpuBackend = self.dispatcher.engine(backend)?;
        let table = re.gpu_table();
        let lines = LineTable::build(text);
        let flags = gpu::option_flags(&self.options);
        match engine.search_regex(text, &table, &lines, flags) {
            Ok(raw) => Some(aggregate::finalize(
                raw.records,
                raw.total_matches,
                text,
                pattern_idx,
            )),
            Err(e) => {
                warn!(engine = engine.name(), "gpu regex search failed, retrying on cpu: {e}");
                None
            }
        }
    }

    fn search_perl(
        &self,
        text: &[u8],
        pattern: &[u8],
        pattern_idx: u32,
    ) -> SearchResult<SearchOutput> {
        let spans = match PerlRegex::compile(pattern, self.options.case_insensitive, true) {
            Ok(re) => re.find_all(text),
            Err(e) => {
                if cfg!(feature = "pcre") {
                    // a rejected pattern matches nothing; invert then
                    // selects every line
                    warn!("perl pattern rejected: {e}");
                    Vec::new()
                } else {
                    return Err(e);
                }
            }
        };
        Ok(self.assemble_spans(text, spans, pattern_idx))
    }

    /// Turns raw `(start, end)` spans from a CPU evaluator into the final
    /// output, applying word-boundary filtering and line-wise inversion.
    fn assemble_spans(
        &self,
        text: &[u8],
        mut spans: Vec<(usize, usize)>,
        pattern_idx: u32,
    ) -> SearchOutput {
        if self.options.word_boundary {
            spans.retain(|&(start, end)| on_word_boundary(text, start, end));
        }

        let mut records = Vec::new();
        if self.options.invert_match {
            // a line is inverted when no match starts within it
            let mut span_iter = spans.iter().peekable();
            for (line_start, line_end) in line_spans(text) {
                while span_iter.peek().is_some_and(|&&(s, _)| s < line_start) {
                    span_iter.next();
                }
                let has_match = span_iter
                    .peek()
                    .is_some_and(|&&(s, _)| s >= line_start && s < line_end.max(line_start + 1));
                if !has_match {
                    records.push(MatchRecord {
                        position: line_start as u32,
                        match_len: (line_end - line_start) as u32,
                        line_start: line_start as u32,
                        line_num: 0,
                        pattern_idx,
                    });
                }
            }
        } else {
            for (start, end) in spans {
                records.push(MatchRecord {
                    position: start as u32,
                    match_len: (end - start) as u32,
                    line_start: line_start_before(text, start),
                    line_num: 0,
                    pattern_idx,
                });
            }
        }

        let total = records.len() as u64;
        aggregate::number_and_sort(&mut records, text);
        SearchOutput {
            records,
            total_matches: total,
        }
    }
}
