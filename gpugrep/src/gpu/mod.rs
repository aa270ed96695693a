//! GPU search protocol shared by the Metal and Vulkan host drivers.
//!
//! Everything here is wire format: the kernels read these structs as raw
//! little-endian words, so byte offsets are contractual. Both drivers must
//! produce the same multiset of `(position, match_len)` records as the CPU
//! engine for any input.

use crate::aggregate::LineTable;
use crate::errors::SearchResult;
use crate::regex::GpuRegexTable;

#[cfg(target_os = "macos")]
pub mod metal;
pub mod vulkan;

/// Shared search flag bits.
pub const FLAG_CASE_INSENSITIVE: u32 = 0x01;
pub const FLAG_WORD_BOUNDARY: u32 = 0x02;
pub const FLAG_INVERT_MATCH: u32 = 0x10;
pub const FLAG_FIXED_STRING: u32 = 0x20;

/// Result-slot ceiling. `total_matches` keeps counting past it so the host
/// can detect truncation.
pub const MAX_GPU_RESULTS: u32 = 1_000_000;

/// Text bytes scanned per thread by the position-partitioned literal kernel.
pub const POSITIONS_PER_THREAD: u32 = 64;

/// Bytes per match record on the wire (8 x u32).
pub const RECORD_BYTES: usize = 32;

/// `flags` bit 0 of a regex match record: slot contains a valid record.
pub const REGEX_RECORD_VALID: u32 = 0x1;

/// Builds the shared flag word from search options.
pub fn option_flags(options: &crate::config::SearchOptions) -> u32 {
    let mut flags = 0;
    if options.case_insensitive {
        flags |= FLAG_CASE_INSENSITIVE;
    }
    if options.word_boundary {
        flags |= FLAG_WORD_BOUNDARY;
    }
    if options.invert_match {
        flags |= FLAG_INVERT_MATCH;
    }
    if options.fixed_string {
        flags |= FLAG_FIXED_STRING;
    }
    flags
}

/// Literal search configuration, 32 bytes on the wire.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralSearchConfig {
    pub text_len: u32,
    pub pattern_len: u32,
    pub num_patterns: u32,
    pub flags: u32,
    pub positions_per_thread: u32,
    pub batch_offset: u32,
    pub _pad: [u32; 2],
}

impl LiteralSearchConfig {
    pub fn to_words(self) -> [u32; 8] {
        [
            self.text_len,
            self.pattern_len,
            self.num_patterns,
            self.flags,
            self.positions_per_thread,
            self.batch_offset,
            0,
            0,
        ]
    }
}

/// Regex search configuration, 32 bytes on the wire.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexSearchConfig {
    pub text_len: u32,
    pub num_states: u32,
    pub start_state: u32,
    pub header_flags: u32,
    pub num_bitmaps: u32,
    pub max_results: u32,
    pub flags: u32,
    /// Added to the thread index to produce 1-based line numbers.
    pub line_offset: u32,
}

impl RegexSearchConfig {
    pub fn to_words(self) -> [u32; 8] {
        [
            self.text_len,
            self.num_states,
            self.start_state,
            self.header_flags,
            self.num_bitmaps,
            self.max_results,
            self.flags,
            self.line_offset,
        ]
    }
}

/// One backend-agnostic match row, converted from the 32-byte wire records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMatch {
    pub position: u32,
    pub len: u32,
    pub line_start: u32,
    /// 1-based, or 0 when the host computes it during aggregation.
    pub line_num: u32,
}

/// Everything a kernel dispatch produced.
#[derive(Debug, Clone, Default)]
pub struct RawMatches {
    pub records: Vec<RawMatch>,
    pub total_matches: u64,
}

/// Parses literal match records (position, pattern_idx, match_len,
/// line_start, line_num, pad x3) from a readback buffer.
pub fn parse_literal_records(bytes: &[u8], count: usize) -> Vec<RawMatch> {
    let mut records = Vec::with_capacity(count);
    for chunk in bytes.chunks_exact(RECORD_BYTES).take(count) {
        let word = |i: usize| {
            u32::from_le_bytes([
                chunk[i * 4],
                chunk[i * 4 + 1],
                chunk[i * 4 + 2],
                chunk[i * 4 + 3],
            ])
        };
        records.push(RawMatch {
            position: word(0),
            len: word(2),
            line_start: word(3),
            line_num: word(4),
        });
    }
    records
}

/// Parses regex match records (start, end, line_start, flags, line_num,
/// pad x3), dropping slots without the valid bit.
pub fn parse_regex_records(bytes: &[u8], count: usize) -> Vec<RawMatch> {
    let mut records = Vec::with_capacity(count);
    for chunk in bytes.chunks_exact(RECORD_BYTES).take(count) {
        let word = |i: usize| {
            u32::from_le_bytes([
                chunk[i * 4],
                chunk[i * 4 + 1],
                chunk[i * 4 + 2],
                chunk[i * 4 + 3],
            ])
        };
        if word(3) & REGEX_RECORD_VALID == 0 {
            continue;
        }
        records.push(RawMatch {
            position: word(0),
            len: word(1) - word(0),
            line_start: word(2),
            line_num: word(4),
        });
    }
    records
}

/// Dispatch geometry: threads per workgroup, capped at 256.
pub fn workgroup_size(device_max: u32) -> u32 {
    device_max.clamp(1, 256)
}

/// Workgroups needed for `work_items` at the given workgroup size.
pub fn grid_size(work_items: u32, workgroup: u32) -> u32 {
    work_items.div_ceil(workgroup).max(1)
}

/// Work items for the position-partitioned literal kernel.
pub fn literal_work_items(text_len: u32) -> u32 {
    (text_len / POSITIONS_PER_THREAD).max(1)
}

/// One-time device limits used by the dispatcher's hardware adaptation.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    pub name: String,
    pub max_threadgroup: u32,
    pub max_buffer_len: u64,
    pub working_set: u64,
    pub unified_memory: bool,
    pub is_discrete: bool,
}

/// A GPU execution engine. Engines own their device, queue and pipelines
/// from init to drop; per-search buffers live inside the call.
pub trait GpuBackend {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> &GpuCapabilities;

    /// Literal BMH search over the whole buffer.
    fn search_literal(
        &self,
        text: &[u8],
        pattern: &[u8],
        skip: &[u8; 256],
        flags: u32,
    ) -> SearchResult<RawMatches>;

    /// Line-partitioned NFA search; handles invert-match on-device.
    fn search_regex(
        &self,
        text: &[u8],
        table: &GpuRegexTable,
        lines: &LineTable,
        flags: u32,
    ) -> SearchResult<RawMatches>;
}

/// Packs bytes into the u32 words the kernels index, little-endian,
/// zero-padded to a word boundary.
pub fn bytes_to_words(bytes: &[u8]) -> Vec<u32> {
    let mut words = Vec::with_capacity(bytes.len().div_ceil(4).max(1));
    for chunk in bytes.chunks(4) {
        let mut w = [0u8; 4];
        w[..chunk.len()].copy_from_slice(chunk);
        words.push(u32::from_le_bytes(w));
    }
    if words.is_empty() {
        words.push(0);
    }
    words
}

/// Flattens u32 words to little-endian bytes for buffer upload.
pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(words.len() * 4);
    for w in words {
        bytes.extend_from_slice(&w.to_le_bytes());
    }
    bytes
}
