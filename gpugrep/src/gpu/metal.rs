//! Metal host driver.
//!
//! Owns the device, command queue and one compute pipeline per kernel,
//! compiled at init from the embedded MSL source. Per-search buffers are
//! shared-storage, written before commit and read after the fence; matches
//! come back through an atomically claimed slot array.

use metal::{
    CommandQueue, CompileOptions, ComputePipelineState, Device, MTLResourceOptions, MTLSize,
};
use tracing::debug;

use crate::aggregate::LineTable;
use crate::errors::{SearchError, SearchResult};
use crate::regex::GpuRegexTable;

use super::{
    grid_size, literal_work_items, parse_literal_records, parse_regex_records, words_to_bytes,
    workgroup_size, GpuBackend, GpuCapabilities, LiteralSearchConfig, RawMatches,
    RegexSearchConfig, MAX_GPU_RESULTS, POSITIONS_PER_THREAD, RECORD_BYTES,
};

const SHADER_SOURCE: &str = r#"
#include <metal_stdlib>
#include <metal_atomic>
using namespace metal;

#define MAX_RESULTS 1000000u
#define NO_EDGE 0xffffu
#define SENTINEL 0xffffffffu
#define STATE_WORDS 32

struct LiteralConfig {
    uint text_len;
    uint pattern_len;
    uint num_patterns;
    uint flags;
    uint positions_per_thread;
    uint batch_offset;
    uint pad0;
    uint pad1;
};

struct RegexConfig {
    uint text_len;
    uint num_states;
    uint start_state;
    uint header_flags;
    uint num_bitmaps;
    uint max_results;
    uint flags;
    uint line_offset;
};

struct LiteralMatch {
    uint position;
    uint pattern_idx;
    uint match_len;
    uint line_start;
    uint line_num;
    uint pad[3];
};

struct RegexMatch {
    uint start;
    uint end;
    uint line_start;
    uint flags;
    uint line_num;
    uint pad[3];
};

inline uchar fold(uchar b, bool ci) {
    return (ci && b >= 'A' && b <= 'Z') ? b + 32 : b;
}

inline bool is_word(uchar b) {
    return (b >= '0' && b <= '9') || (b >= 'A' && b <= 'Z')
        || (b >= 'a' && b <= 'z') || b == '_';
}

// Position-partitioned literal search. Each thread owns
// positions_per_thread match-start positions; the window compare may read
// one pattern length past the chunk end, never past the buffer.
kernel void bmh_search(
    device const uchar* text [[buffer(0)]],
    device const uchar* pattern [[buffer(1)]],
    device const uchar* skip_table [[buffer(2)]],
    constant LiteralConfig& config [[buffer(3)]],
    device LiteralMatch* results [[buffer(4)]],
    device atomic_uint* counters [[buffer(5)]],
    uint gid [[thread_position_in_grid]]
) {
    uint text_len = config.text_len;
    uint pattern_len = config.pattern_len;
    bool ci = (config.flags & 0x1u) != 0u;
    bool wb = (config.flags & 0x2u) != 0u;

    if (pattern_len == 0u || pattern_len > text_len) return;
    uint chunk_start = config.batch_offset + gid * config.positions_per_thread;
    if (chunk_start >= text_len) return;
    uint chunk_end = min(chunk_start + config.positions_per_thread, text_len);

    uint pos = chunk_start;
    while (pos < chunk_end && pos + pattern_len <= text_len) {
        bool matched = true;
        for (uint j = 0; j < pattern_len && matched; j++) {
            if (fold(text[pos + j], ci) != fold(pattern[j], ci)) {
                matched = false;
            }
        }
        if (matched && wb) {
            bool left_ok = pos == 0u || !is_word(text[pos - 1]);
            bool right_ok = pos + pattern_len == text_len || !is_word(text[pos + pattern_len]);
            matched = left_ok && right_ok;
        }
        if (matched) {
            atomic_fetch_add_explicit(&counters[1], 1u, memory_order_relaxed);
            uint slot = atomic_fetch_add_explicit(&counters[0], 1u, memory_order_relaxed);
            if (slot < MAX_RESULTS) {
                uint ls = pos;
                while (ls > 0u && text[ls - 1] != '\n') {
                    ls--;
                }
                LiteralMatch m;
                m.position = pos;
                m.pattern_idx = 0u;
                m.match_len = pattern_len;
                m.line_start = ls;
                m.line_num = 0u;
                m.pad[0] = 0u; m.pad[1] = 0u; m.pad[2] = 0u;
                results[slot] = m;
            }
            pos += pattern_len;
        } else {
            uint last = fold(text[pos + pattern_len - 1], ci);
            pos += max(uint(skip_table[last]), 1u);
        }
    }
}

inline bool get_bit(thread const uint* set, uint s) {
    return (set[s >> 5] & (1u << (s & 31u))) != 0u;
}

inline void set_bit(thread uint* set, uint s) {
    set[s >> 5] |= 1u << (s & 31u);
}

inline void clear_set(thread uint* set) {
    for (uint i = 0; i < STATE_WORDS; i++) {
        set[i] = 0u;
    }
}

inline bool word_boundary(device const uchar* text, uint pos, uint text_len) {
    bool before = pos > 0u && is_word(text[pos - 1]);
    bool after = pos < text_len && is_word(text[pos]);
    return before != after;
}

// Epsilon closure by fixpoint sweep over the packed state table. Assertion
// states gate their out edge on the position context; reaching the match
// state raises the best match end for this start position.
inline uint add_closure(
    thread uint* set,
    uint entry,
    uint pos,
    uint text_len,
    uint best,
    device const uint* states,
    device const uint* header,
    device const uchar* text
) {
    uint new_best = best;
    set_bit(set, entry);
    uint num_states = header[0];
    bool changed = true;
    while (changed) {
        changed = false;
        for (uint s = 0; s < num_states; s++) {
            if (!get_bit(set, s)) continue;
            uint w0 = states[s * 3];
            uint kind = w0 & 0xffu;
            uint out = (w0 >> 16) & 0xffffu;
            uint out2 = states[s * 3 + 1] & 0xffffu;
            bool follow = false;
            switch (kind) {
                case 4u: // split
                    follow = true;
                    if (out2 != NO_EDGE && !get_bit(set, out2)) {
                        set_bit(set, out2);
                        changed = true;
                    }
                    break;
                case 6u: // group start
                case 7u: // group end
                    follow = true;
                    break;
                case 5u: // match
                    if (new_best == SENTINEL || pos > new_best) {
                        new_best = pos;
                    }
                    break;
                case 10u: // line start
                    follow = pos == 0u || text[pos - 1] == '\n';
                    break;
                case 11u: // line end
                    follow = pos == text_len || text[pos] == '\n';
                    break;
                case 8u: // word boundary
                    follow = word_boundary(text, pos, text_len);
                    break;
                case 9u: // not word boundary
                    follow = !word_boundary(text, pos, text_len);
                    break;
                default:
                    break;
            }
            if (follow && out != NO_EDGE && !get_bit(set, out)) {
                set_bit(set, out);
                changed = true;
            }
        }
    }
    return new_best;
}

inline void record_regex(
    uint start,
    uint end,
    uint line_start,
    uint line_num,
    uint max_results,
    device RegexMatch* results,
    device atomic_uint* counters
) {
    atomic_fetch_add_explicit(&counters[1], 1u, memory_order_relaxed);
    uint slot = atomic_fetch_add_explicit(&counters[0], 1u, memory_order_relaxed);
    if (slot < max_results) {
        RegexMatch m;
        m.start = start;
        m.end = end;
        m.line_start = line_start;
        m.flags = 1u;
        m.line_num = line_num;
        m.pad[0] = 0u; m.pad[1] = 0u; m.pad[2] = 0u;
        results[slot] = m;
    }
}

// Line-partitioned NFA search, one thread per line. Line numbers are
// line_offset + thread id + 1. For invert-match the whole line is recorded
// when nothing in it matches.
kernel void regex_search_lines(
    device const uchar* text [[buffer(0)]],
    device const uint* states [[buffer(1)]],
    device const uint* bitmaps [[buffer(2)]],
    device const uint* header [[buffer(3)]],
    constant RegexConfig& config [[buffer(4)]],
    device const uint* line_offsets [[buffer(5)]],
    device const uint* line_lengths [[buffer(6)]],
    device RegexMatch* results [[buffer(7)]],
    device atomic_uint* counters [[buffer(8)]],
    uint gid [[thread_position_in_grid]]
) {
    uint text_len = config.text_len;
    uint num_states = config.num_states;
    if (num_states > STATE_WORDS * 32u) return;

    bool invert = (config.flags & 0x10u) != 0u;
    bool wb = (config.flags & 0x2u) != 0u;
    bool anchored = (config.header_flags & 0x1u) != 0u;

    uint line_start = line_offsets[gid];
    uint line_end = line_start + line_lengths[gid];
    uint line_num = config.line_offset + gid + 1u;

    uint cur[STATE_WORDS];
    uint nxt[STATE_WORDS];

    bool found = false;
    uint start = line_start;
    uint last_end = SENTINEL;

    while (start <= line_end) {
        uint best = SENTINEL;
        clear_set(cur);
        best = add_closure(cur, config.start_state, start, text_len, best, states, header, text);

        uint pos = start;
        while (pos < line_end) {
            uchar b = text[pos];
            clear_set(nxt);
            bool live = false;
            for (uint s = 0; s < num_states; s++) {
                if (!get_bit(cur, s)) continue;
                uint w0 = states[s * 3];
                uint kind = w0 & 0xffu;
                uint sflags = (w0 >> 8) & 0xffu;
                uint out = (w0 >> 16) & 0xffffu;
                uint w1 = states[s * 3 + 1];
                uchar lit = uchar((w1 >> 16) & 0xffu);
                bool consumed = false;
                switch (kind) {
                    case 0u: // literal
                        consumed = (sflags & 0x1u) != 0u
                            ? fold(b, true) == fold(lit, true)
                            : b == lit;
                        break;
                    case 1u: { // class
                        uint off = states[s * 3 + 2];
                        bool has = (bitmaps[off + (b >> 5)] & (1u << (b & 31u))) != 0u;
                        consumed = (sflags & 0x2u) != 0u ? (b != '\n' && !has) : has;
                        break;
                    }
                    case 2u: // dot
                        consumed = b != '\n';
                        break;
                    case 3u: // any
                        consumed = true;
                        break;
                    default:
                        break;
                }
                if (consumed && out != NO_EDGE) {
                    best = add_closure(nxt, out, pos + 1u, text_len, best, states, header, text);
                    live = true;
                }
            }
            if (!live) break;
            for (uint i = 0; i < STATE_WORDS; i++) {
                cur[i] = nxt[i];
            }
            pos++;
        }

        if (best != SENTINEL) {
            if (best == start && last_end == start) {
                // empty match butting against the previous one
                start++;
            } else {
                bool ok = true;
                if (wb) {
                    bool left_ok = start == 0u || !is_word(text[start - 1]);
                    bool right_ok = best == text_len || !is_word(text[best]);
                    ok = left_ok && right_ok;
                }
                if (ok) {
                    found = true;
                    if (!invert) {
                        record_regex(start, best, line_start, line_num,
                                     config.max_results, results, counters);
                    }
                }
                last_end = best;
                start = best > start ? best : start + 1u;
            }
        } else {
            start++;
        }
        if (anchored) break;
        if (invert && found) break;
    }

    if (invert && !found) {
        record_regex(line_start, line_end, line_start, line_num,
                     config.max_results, results, counters);
    }
}
"#;

pub struct MetalEngine {
    device: Device,
    queue: CommandQueue,
    literal_pipeline: ComputePipelineState,
    regex_pipeline: ComputePipelineState,
    caps: GpuCapabilities,
}

impl MetalEngine {
    /// Grabs the system device and compiles both kernels.
    pub fn new() -> SearchResult<Self> {
        let device = Device::system_default()
            .ok_or_else(|| SearchError::gpu_error("no Metal device available"))?;
        let queue = device.new_command_queue();

        let library = device
            .new_library_with_source(SHADER_SOURCE, &CompileOptions::new())
            .map_err(|e| SearchError::gpu_error(format!("shader compile failed: {e}")))?;
        let literal_fn = library
            .get_function("bmh_search", None)
            .map_err(|e| SearchError::gpu_error(format!("missing kernel: {e}")))?;
        let literal_pipeline = device
            .new_compute_pipeline_state_with_function(&literal_fn)
            .map_err(|e| SearchError::gpu_error(format!("pipeline creation failed: {e}")))?;
        let regex_fn = library
            .get_function("regex_search_lines", None)
            .map_err(|e| SearchError::gpu_error(format!("missing kernel: {e}")))?;
        let regex_pipeline = device
            .new_compute_pipeline_state_with_function(&regex_fn)
            .map_err(|e| SearchError::gpu_error(format!("pipeline creation failed: {e}")))?;

        let caps = GpuCapabilities {
            name: device.name().to_string(),
            max_threadgroup: literal_pipeline.max_total_threads_per_threadgroup() as u32,
            max_buffer_len: device.max_buffer_length(),
            working_set: device.recommended_max_working_set_size(),
            unified_memory: device.has_unified_memory(),
            is_discrete: !device.has_unified_memory(),
        };
        debug!(device = %caps.name, "metal device initialized");

        Ok(Self {
            device,
            queue,
            literal_pipeline,
            regex_pipeline,
            caps,
        })
    }

    fn upload(&self, bytes: &[u8]) -> metal::Buffer {
        // shared storage: host writes land before commit, fence makes the
        // device's writes visible after wait
        let len = bytes.len().max(4) as u64;
        let buffer = self
            .device
            .new_buffer(len, MTLResourceOptions::StorageModeShared);
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), buffer.contents() as *mut u8, bytes.len());
        }
        buffer
    }

    fn results_buffer(&self) -> metal::Buffer {
        self.device.new_buffer(
            MAX_GPU_RESULTS as u64 * RECORD_BYTES as u64,
            MTLResourceOptions::StorageModeShared,
        )
    }

    fn counters_buffer(&self) -> metal::Buffer {
        let buffer = self
            .device
            .new_buffer(8, MTLResourceOptions::StorageModeShared);
        unsafe {
            std::ptr::write_bytes(buffer.contents() as *mut u8, 0, 8);
        }
        buffer
    }

    /// Reads the counter pair and the populated result slots after a
    /// completed dispatch.
    fn collect(&self, results: &metal::Buffer, counters: &metal::Buffer) -> (Vec<u8>, u32, u64) {
        let (result_count, total) = unsafe {
            let ptr = counters.contents() as *const u32;
            (*ptr, *ptr.add(1) as u64)
        };
        let count = result_count.min(MAX_GPU_RESULTS);
        let bytes = unsafe {
            std::slice::from_raw_parts(
                results.contents() as *const u8,
                count as usize * RECORD_BYTES,
            )
            .to_vec()
        };
        (bytes, count, total)
    }
}

impl GpuBackend for MetalEngine {
    fn name(&self) -> &'static str {
        "metal"
    }

    fn capabilities(&self) -> &GpuCapabilities {
        &self.caps
    }

    fn search_literal(
        &self,
        text: &[u8],
        pattern: &[u8],
        skip: &[u8; 256],
        flags: u32,
    ) -> SearchResult<RawMatches> {
        if text.len() < pattern.len() || pattern.is_empty() {
            return Ok(RawMatches::default());
        }

        let config = LiteralSearchConfig {
            text_len: text.len() as u32,
            pattern_len: pattern.len() as u32,
            num_patterns: 1,
            flags,
            positions_per_thread: POSITIONS_PER_THREAD,
            batch_offset: 0,
            _pad: [0; 2],
        };

        let text_buf = self.upload(text);
        let pattern_buf = self.upload(pattern);
        let skip_buf = self.upload(skip);
        let config_buf = self.upload(&words_to_bytes(&config.to_words()));
        let results = self.results_buffer();
        let counters = self.counters_buffer();

        let cmd = self.queue.new_command_buffer();
        let encoder = cmd.new_compute_command_encoder();
        encoder.set_compute_pipeline_state(&self.literal_pipeline);
        encoder.set_buffer(0, Some(&text_buf), 0);
        encoder.set_buffer(1, Some(&pattern_buf), 0);
        encoder.set_buffer(2, Some(&skip_buf), 0);
        encoder.set_buffer(3, Some(&config_buf), 0);
        encoder.set_buffer(4, Some(&results), 0);
        encoder.set_buffer(5, Some(&counters), 0);

        let wg = workgroup_size(self.caps.max_threadgroup) as u64;
        let groups = grid_size(literal_work_items(text.len() as u32), wg as u32) as u64;
        encoder.dispatch_thread_groups(MTLSize::new(groups, 1, 1), MTLSize::new(wg, 1, 1));
        encoder.end_encoding();
        cmd.commit();
        cmd.wait_until_completed();

        let (bytes, count, total) = self.collect(&results, &counters);
        Ok(RawMatches {
            records: parse_literal_records(&bytes, count as usize),
            total_matches: total,
        })
    }

    fn search_regex(
        &self,
        text: &[u8],
        table: &GpuRegexTable,
        lines: &LineTable,
        flags: u32,
    ) -> SearchResult<RawMatches> {
        if lines.num_lines() == 0 {
            return Ok(RawMatches::default());
        }

        let config = RegexSearchConfig {
            text_len: text.len() as u32,
            num_states: table.num_states,
            start_state: table.start_state,
            header_flags: table.flags,
            num_bitmaps: (table.bitmaps.len() / 8) as u32,
            max_results: MAX_GPU_RESULTS,
            flags,
            line_offset: 0,
        };

        let text_buf = self.upload(text);
        let states_buf = self.upload(&table.states);
        let bitmaps_buf = self.upload(&words_to_bytes(&table.bitmaps));
        let header_buf = self.upload(&words_to_bytes(&table.header_words()));
        let config_buf = self.upload(&words_to_bytes(&config.to_words()));
        let offsets_buf = self.upload(&words_to_bytes(&lines.offsets));
        let lengths_buf = self.upload(&words_to_bytes(&lines.lengths));
        let results = self.results_buffer();
        let counters = self.counters_buffer();

        let cmd = self.queue.new_command_buffer();
        let encoder = cmd.new_compute_command_encoder();
        encoder.set_compute_pipeline_state(&self.regex_pipeline);
        encoder.set_buffer(0, Some(&text_buf), 0);
        encoder.set_buffer(1, Some(&states_buf), 0);
        encoder.set_buffer(2, Some(&bitmaps_buf), 0);
        encoder.set_buffer(3, Some(&header_buf), 0);
        encoder.set_buffer(4, Some(&config_buf), 0);
        encoder.set_buffer(5, Some(&offsets_buf), 0);
        encoder.set_buffer(6, Some(&lengths_buf), 0);
        encoder.set_buffer(7, Some(&results), 0);
        encoder.set_buffer(8, Some(&counters), 0);

        // one thread per line, exact grid
        let wg = workgroup_size(self.caps.max_threadgroup) as u64;
        encoder.dispatch_threads(
            MTLSize::new(lines.num_lines() as u64, 1, 1),
            MTLSize::new(wg.min(lines.num_lines() as u64), 1, 1),
        );
        encoder.end_encoding();
        cmd.commit();
        cmd.wait_until_completed();

        let (bytes, count, total) = self.collect(&results, &counters);
        Ok(RawMatches {
            records: parse_regex_records(&bytes, count as usize),
            total_matches: total,
        })
    }
}
