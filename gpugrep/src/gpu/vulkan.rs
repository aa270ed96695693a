//! Vulkan host driver, built on wgpu restricted to the Vulkan backend.
//!
//! Owns the device, queue, two bind-group layouts (6 storage buffers for the
//! literal kernel, 9 for the regex kernel) and the two compute pipelines,
//! compiled at init from the embedded WGSL below. Each search creates its
//! buffers, submits once, blocks on readback and releases everything.

use tracing::debug;
use wgpu::util::DeviceExt;

use crate::aggregate::LineTable;
use crate::errors::{SearchError, SearchResult};
use crate::regex::GpuRegexTable;

use super::{
    grid_size, literal_work_items, parse_literal_records, parse_regex_records, words_to_bytes,
    GpuBackend, GpuCapabilities, LiteralSearchConfig, RawMatches, RegexSearchConfig,
    MAX_GPU_RESULTS, POSITIONS_PER_THREAD, RECORD_BYTES,
};

/// Compile-time workgroup width of both kernels.
const WORKGROUP_SIZE: u32 = 256;

const LITERAL_SHADER: &str = r#"
@group(0) @binding(0) var<storage, read> text: array<u32>;
@group(0) @binding(1) var<storage, read> pattern: array<u32>;
@group(0) @binding(2) var<storage, read> skip_table: array<u32>;
@group(0) @binding(3) var<storage, read> config: array<u32>;
@group(0) @binding(4) var<storage, read_write> results: array<u32>;
@group(0) @binding(5) var<storage, read_write> counters: array<atomic<u32>, 2>;

const MAX_RESULTS: u32 = 1000000u;

fn text_byte(i: u32) -> u32 {
    return (text[i >> 2u] >> ((i & 3u) * 8u)) & 0xffu;
}

fn pattern_byte(i: u32) -> u32 {
    return (pattern[i >> 2u] >> ((i & 3u) * 8u)) & 0xffu;
}

fn skip_for(b: u32) -> u32 {
    return (skip_table[b >> 2u] >> ((b & 3u) * 8u)) & 0xffu;
}

fn fold(b: u32, ci: bool) -> u32 {
    if (ci && b >= 65u && b <= 90u) {
        return b + 32u;
    }
    return b;
}

fn is_word(b: u32) -> bool {
    return (b >= 48u && b <= 57u) || (b >= 65u && b <= 90u)
        || (b >= 97u && b <= 122u) || b == 95u;
}

// Each thread owns positions_per_thread match-start positions. The window
// compare may read up to one pattern length past the chunk end, never past
// the buffer.
@compute @workgroup_size(256)
fn bmh_search(@builtin(global_invocation_id) gid: vec3<u32>) {
    let text_len = config[0];
    let pattern_len = config[1];
    let flags = config[3];
    let ppt = config[4];
    let batch_offset = config[5];
    let ci = (flags & 0x1u) != 0u;
    let wb = (flags & 0x2u) != 0u;

    if (pattern_len == 0u || pattern_len > text_len) {
        return;
    }
    let chunk_start = batch_offset + gid.x * ppt;
    if (chunk_start >= text_len) {
        return;
    }
    let chunk_end = min(chunk_start + ppt, text_len);

    var pos = chunk_start;
    while (pos < chunk_end && pos + pattern_len <= text_len) {
        var matched = true;
        for (var j = 0u; j < pattern_len; j = j + 1u) {
            if (fold(text_byte(pos + j), ci) != fold(pattern_byte(j), ci)) {
                matched = false;
                break;
            }
        }
        if (matched && wb) {
            let left_ok = pos == 0u || !is_word(text_byte(pos - 1u));
            let right_ok = pos + pattern_len == text_len
                || !is_word(text_byte(pos + pattern_len));
            matched = left_ok && right_ok;
        }
        if (matched) {
            atomicAdd(&counters[1], 1u);
            let slot = atomicAdd(&counters[0], 1u);
            if (slot < MAX_RESULTS) {
                var ls = pos;
                while (ls > 0u && text_byte(ls - 1u) != 10u) {
                    ls = ls - 1u;
                }
                let base = slot * 8u;
                results[base] = pos;
                results[base + 1u] = 0u;
                results[base + 2u] = pattern_len;
                results[base + 3u] = ls;
                results[base + 4u] = 0u;
                results[base + 5u] = 0u;
                results[base + 6u] = 0u;
                results[base + 7u] = 0u;
            }
            pos = pos + pattern_len;
        } else {
            pos = pos + max(skip_for(fold(text_byte(pos + pattern_len - 1u), ci)), 1u);
        }
    }
}
"#;

const REGEX_SHADER: &str = r#"
@group(0) @binding(0) var<storage, read> text: array<u32>;
@group(0) @binding(1) var<storage, read> states: array<u32>;
@group(0) @binding(2) var<storage, read> bitmaps: array<u32>;
@group(0) @binding(3) var<storage, read> header: array<u32>;
@group(0) @binding(4) var<storage, read> config: array<u32>;
@group(0) @binding(5) var<storage, read> line_offsets: array<u32>;
@group(0) @binding(6) var<storage, read> line_lengths: array<u32>;
@group(0) @binding(7) var<storage, read_write> results: array<u32>;
@group(0) @binding(8) var<storage, read_write> counters: array<atomic<u32>, 2>;

const NO_EDGE: u32 = 0xffffu;
const SENTINEL: u32 = 0xffffffffu;
// 1024 device states tracked as 32 mask words
const STATE_WORDS: u32 = 32u;

fn text_byte(i: u32) -> u32 {
    return (text[i >> 2u] >> ((i & 3u) * 8u)) & 0xffu;
}

fn fold(b: u32) -> u32 {
    if (b >= 65u && b <= 90u) {
        return b + 32u;
    }
    return b;
}

fn is_word(b: u32) -> bool {
    return (b >= 48u && b <= 57u) || (b >= 65u && b <= 90u)
        || (b >= 97u && b <= 122u) || b == 95u;
}

fn word_boundary(pos: u32, text_len: u32) -> bool {
    var before = false;
    if (pos > 0u) {
        before = is_word(text_byte(pos - 1u));
    }
    var after = false;
    if (pos < text_len) {
        after = is_word(text_byte(pos));
    }
    return before != after;
}

fn get_bit(set: ptr<function, array<u32, 32>>, s: u32) -> bool {
    return ((*set)[s >> 5u] & (1u << (s & 31u))) != 0u;
}

fn set_bit(set: ptr<function, array<u32, 32>>, s: u32) {
    (*set)[s >> 5u] = (*set)[s >> 5u] | (1u << (s & 31u));
}

fn clear_set(set: ptr<function, array<u32, 32>>) {
    for (var i = 0u; i < STATE_WORDS; i = i + 1u) {
        (*set)[i] = 0u;
    }
}

// Epsilon closure by fixpoint sweep. Zero-width assertions gate their out
// edge on the position context; reaching the match state raises the best
// match end for this start position.
fn add_closure(
    set: ptr<function, array<u32, 32>>,
    entry: u32,
    pos: u32,
    text_len: u32,
    best: u32,
) -> u32 {
    var new_best = best;
    set_bit(set, entry);
    let num_states = header[0];
    var changed = true;
    while (changed) {
        changed = false;
        for (var s = 0u; s < num_states; s = s + 1u) {
            if (!get_bit(set, s)) {
                continue;
            }
            let w0 = states[s * 3u];
            let kind = w0 & 0xffu;
            let out = (w0 >> 16u) & 0xffffu;
            let out2 = states[s * 3u + 1u] & 0xffffu;
            var follow = false;
            if (kind == 4u) { // split
                follow = true;
                if (out2 != NO_EDGE && !get_bit(set, out2)) {
                    set_bit(set, out2);
                    changed = true;
                }
            } else if (kind == 6u || kind == 7u) { // group markers
                follow = true;
            } else if (kind == 5u) { // match
                if (new_best == SENTINEL || pos > new_best) {
                    new_best = pos;
                }
            } else if (kind == 10u) { // line start
                follow = pos == 0u || text_byte(pos - 1u) == 10u;
            } else if (kind == 11u) { // line end
                follow = pos == text_len || text_byte(pos) == 10u;
            } else if (kind == 8u) { // word boundary
                follow = word_boundary(pos, text_len);
            } else if (kind == 9u) { // not word boundary
                follow = !word_boundary(pos, text_len);
            }
            if (follow && out != NO_EDGE && !get_bit(set, out)) {
                set_bit(set, out);
                changed = true;
            }
        }
    }
    return new_best;
}

fn record(start: u32, end: u32, line_start: u32, line_num: u32, max_results: u32) {
    atomicAdd(&counters[1], 1u);
    let slot = atomicAdd(&counters[0], 1u);
    if (slot < max_results) {
        let base = slot * 8u;
        results[base] = start;
        results[base + 1u] = end;
        results[base + 2u] = line_start;
        results[base + 3u] = 1u;
        results[base + 4u] = line_num;
        results[base + 5u] = 0u;
        results[base + 6u] = 0u;
        results[base + 7u] = 0u;
    }
}

// One thread per line; line numbers are line_offset + thread id + 1.
@compute @workgroup_size(256)
fn regex_search_lines(@builtin(global_invocation_id) gid: vec3<u32>) {
    let line_idx = gid.x;
    if (line_idx >= arrayLength(&line_offsets)) {
        return;
    }
    let text_len = config[0];
    let num_states = config[1];
    let start_state = config[2];
    let hdr_flags = config[3];
    let max_results = config[5];
    let flags = config[6];
    let line_base = config[7];
    if (num_states > STATE_WORDS * 32u) {
        return;
    }

    let invert = (flags & 0x10u) != 0u;
    let wb = (flags & 0x2u) != 0u;
    let anchored = (hdr_flags & 0x1u) != 0u;

    let line_start = line_offsets[line_idx];
    let line_end = line_start + line_lengths[line_idx];
    let line_num = line_base + line_idx + 1u;

    var cur: array<u32, 32>;
    var nxt: array<u32, 32>;

    var found = false;
    var start = line_start;
    var last_end = SENTINEL;

    loop {
        if (start > line_end) {
            break;
        }
        var best = SENTINEL;
        clear_set(&cur);
        best = add_closure(&cur, start_state, start, text_len, best);

        var pos = start;
        while (pos < line_end) {
            let b = text_byte(pos);
            clear_set(&nxt);
            var live = false;
            for (var s = 0u; s < num_states; s = s + 1u) {
                if (!get_bit(&cur, s)) {
                    continue;
                }
                let w0 = states[s * 3u];
                let kind = w0 & 0xffu;
                let sflags = (w0 >> 8u) & 0xffu;
                let out = (w0 >> 16u) & 0xffffu;
                let w1 = states[s * 3u + 1u];
                let lit = (w1 >> 16u) & 0xffu;
                var consumed = false;
                if (kind == 0u) { // literal
                    if ((sflags & 0x1u) != 0u) {
                        consumed = fold(b) == fold(lit);
                    } else {
                        consumed = b == lit;
                    }
                } else if (kind == 1u) { // class
                    let off = states[s * 3u + 2u];
                    let has = (bitmaps[off + (b >> 5u)] & (1u << (b & 31u))) != 0u;
                    if ((sflags & 0x2u) != 0u) {
                        consumed = b != 10u && !has;
                    } else {
                        consumed = has;
                    }
                } else if (kind == 2u) { // dot
                    consumed = b != 10u;
                } else if (kind == 3u) { // any
                    consumed = true;
                }
                if (consumed && out != NO_EDGE) {
                    best = add_closure(&nxt, out, pos + 1u, text_len, best);
                    live = true;
                }
            }
            if (!live) {
                break;
            }
            for (var i = 0u; i < STATE_WORDS; i = i + 1u) {
                cur[i] = nxt[i];
            }
            pos = pos + 1u;
        }

        if (best != SENTINEL) {
            if (best == start && last_end == start) {
                // empty match butting against the previous one
                start = start + 1u;
            } else {
                var ok = true;
                if (wb) {
                    let left_ok = start == 0u || !is_word(text_byte(start - 1u));
                    let right_ok = best == text_len || !is_word(text_byte(best));
                    ok = left_ok && right_ok;
                }
                if (ok) {
                    found = true;
                    if (!invert) {
                        record(start, best, line_start, line_num, max_results);
                    }
                }
                last_end = best;
                if (best > start) {
                    start = best;
                } else {
                    start = start + 1u;
                }
            }
        } else {
            start = start + 1u;
        }
        if (anchored) {
            break;
        }
        if (invert && found) {
            break;
        }
    }

    if (invert && !found) {
        record(line_start, line_end, line_start, line_num, max_results);
    }
}
"#;

pub struct VulkanEngine {
    device: wgpu::Device,
    queue: wgpu::Queue,
    literal_layout: wgpu::BindGroupLayout,
    regex_layout: wgpu::BindGroupLayout,
    literal_pipeline: wgpu::ComputePipeline,
    regex_pipeline: wgpu::ComputePipeline,
    caps: GpuCapabilities,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl VulkanEngine {
    /// Initializes the Vulkan device, preferring a discrete adapter, and
    /// builds both compute pipelines.
    pub fn new() -> SearchResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::VULKAN,
            ..Default::default()
        });

        let mut adapters = instance.enumerate_adapters(wgpu::Backends::VULKAN);
        if adapters.is_empty() {
            return Err(SearchError::gpu_error("no Vulkan adapter available"));
        }
        adapters.sort_by_key(|a| match a.get_info().device_type {
            wgpu::DeviceType::DiscreteGpu => 0,
            wgpu::DeviceType::IntegratedGpu => 1,
            wgpu::DeviceType::VirtualGpu => 2,
            wgpu::DeviceType::Other => 3,
            wgpu::DeviceType::Cpu => 4,
        });
        let adapter = adapters.remove(0);
        let info = adapter.get_info();
        let limits = adapter.limits();
        debug!(adapter = %info.name, backend = ?info.backend, "vulkan adapter selected");

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("gpugrep-vulkan"),
            required_limits: limits.clone(),
            ..Default::default()
        }))
        .map_err(|e| SearchError::gpu_error(format!("vulkan device init failed: {e}")))?;

        let literal_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("bmh-search-layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, false),
                storage_entry(5, false),
            ],
        });
        let regex_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("regex-lines-layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, true),
                storage_entry(5, true),
                storage_entry(6, true),
                storage_entry(7, false),
                storage_entry(8, false),
            ],
        });

        let literal_pipeline = Self::build_pipeline(
            &device,
            &literal_layout,
            LITERAL_SHADER,
            "bmh_search",
        );
        let regex_pipeline = Self::build_pipeline(
            &device,
            &regex_layout,
            REGEX_SHADER,
            "regex_search_lines",
        );

        let caps = GpuCapabilities {
            name: info.name,
            max_threadgroup: limits.max_compute_invocations_per_workgroup,
            max_buffer_len: limits.max_storage_buffer_binding_size as u64,
            working_set: limits.max_buffer_size,
            unified_memory: matches!(info.device_type, wgpu::DeviceType::IntegratedGpu),
            is_discrete: matches!(info.device_type, wgpu::DeviceType::DiscreteGpu),
        };

        Ok(Self {
            device,
            queue,
            literal_layout,
            regex_layout,
            literal_pipeline,
            regex_pipeline,
            caps,
        })
    }

    fn build_pipeline(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        source: &str,
        entry: &str,
    ) -> wgpu::ComputePipeline {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(entry),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(entry),
            bind_group_layouts: &[layout],
            push_constant_ranges: &[],
        });
        device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(entry),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some(entry),
            compilation_options: Default::default(),
            cache: None,
        })
    }

    fn input_buffer(&self, label: &str, bytes: &[u8]) -> wgpu::Buffer {
        // storage arrays are word-indexed, so pad to a word boundary
        let mut data = bytes.to_vec();
        data.resize(data.len().div_ceil(4).max(1) * 4, 0);
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: &data,
                usage: wgpu::BufferUsages::STORAGE,
            })
    }

    fn results_buffer(&self) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("results"),
            size: MAX_GPU_RESULTS as u64 * RECORD_BYTES as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        })
    }

    fn counters_buffer(&self) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("counters"),
                contents: &[0u8; 8],
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            })
    }

    fn read_back(&self, buffer: &wgpu::Buffer, size: u64) -> Vec<u8> {
        let slice = buffer.slice(0..size);
        slice.map_async(wgpu::MapMode::Read, |_| {});
        let _ = self.device.poll(wgpu::PollType::Wait);
        let data = slice.get_mapped_range().to_vec();
        buffer.unmap();
        data
    }

    /// Submits one dispatch, reads the two counters, then copies back only
    /// the populated result slots.
    fn run(
        &self,
        pipeline: &wgpu::ComputePipeline,
        bind_group: &wgpu::BindGroup,
        workgroups: u32,
        results: &wgpu::Buffer,
        counters: &wgpu::Buffer,
    ) -> SearchResult<(Vec<u8>, u32, u64)> {
        let counter_rb = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("rb-counters"),
            size: 8,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("search-enc"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("search"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }
        // counters come back first so only populated slots are copied
        encoder.copy_buffer_to_buffer(counters, 0, &counter_rb, 0, 8);
        self.queue.submit(Some(encoder.finish()));

        let counter_bytes = self.read_back(&counter_rb, 8);
        let result_count = u32::from_le_bytes([
            counter_bytes[0],
            counter_bytes[1],
            counter_bytes[2],
            counter_bytes[3],
        ])
        .min(MAX_GPU_RESULTS);
        let total = u32::from_le_bytes([
            counter_bytes[4],
            counter_bytes[5],
            counter_bytes[6],
            counter_bytes[7],
        ]) as u64;

        if result_count == 0 {
            return Ok((Vec::new(), 0, total));
        }

        let byte_len = result_count as u64 * RECORD_BYTES as u64;
        let results_rb = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("rb-results"),
            size: byte_len,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("rb-enc"),
            });
        encoder.copy_buffer_to_buffer(results, 0, &results_rb, 0, byte_len);
        self.queue.submit(Some(encoder.finish()));

        let bytes = self.read_back(&results_rb, byte_len);
        Ok((bytes, result_count, total))
    }
}

impl GpuBackend for VulkanEngine {
    fn name(&self) -> &'static str {
        "vulkan"
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

        let text_buf = self.input_buffer("text", text);
        let pattern_buf = self.input_buffer("pattern", pattern);
        let skip_buf = self.input_buffer("skip", skip);
        let config_buf = self.input_buffer("config", &words_to_bytes(&config.to_words()));
        let results = self.results_buffer();
        let counters = self.counters_buffer();

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("bmh-bind"),
            layout: &self.literal_layout,
            entries: &[
                bind(0, &text_buf),
                bind(1, &pattern_buf),
                bind(2, &skip_buf),
                bind(3, &config_buf),
                bind(4, &results),
                bind(5, &counters),
            ],
        });

        let workgroups = grid_size(literal_work_items(text.len() as u32), WORKGROUP_SIZE);
        let (bytes, count, total) = self.run(
            &self.literal_pipeline,
            &bind_group,
            workgroups,
            &results,
            &counters,
        )?;
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

        let text_buf = self.input_buffer("text", text);
        let states_buf = self.input_buffer("states", &table.states);
        let bitmaps_buf = self.input_buffer("bitmaps", &words_to_bytes(&table.bitmaps));
        let header_buf = self.input_buffer("header", &words_to_bytes(&table.header_words()));
        let config_buf = self.input_buffer("config", &words_to_bytes(&config.to_words()));
        let offsets_buf = self.input_buffer("line-offsets", &words_to_bytes(&lines.offsets));
        let lengths_buf = self.input_buffer("line-lengths", &words_to_bytes(&lines.lengths));
        let results = self.results_buffer();
        let counters = self.counters_buffer();

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("regex-bind"),
            layout: &self.regex_layout,
            entries: &[
                bind(0, &text_buf),
                bind(1, &states_buf),
                bind(2, &bitmaps_buf),
                bind(3, &header_buf),
                bind(4, &config_buf),
                bind(5, &offsets_buf),
                bind(6, &lengths_buf),
                bind(7, &results),
                bind(8, &counters),
            ],
        });

        let workgroups = grid_size(lines.num_lines() as u32, WORKGROUP_SIZE);
        let (bytes, count, total) = self.run(
            &self.regex_pipeline,
            &bind_group,
            workgroups,
            &results,
            &counters,
        )?;
        Ok(RawMatches {
            records: parse_regex_records(&bytes, count as usize),
            total_matches: total,
        })
    }
}

fn bind(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}
