use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::{BackendOverride, DispatchTuning, SearchOptions};
use crate::gpu::{GpuBackend, GpuCapabilities};
use crate::regex::GPU_MAX_STATES;
use crate::skip::MAX_PATTERN_LEN;

/// The engine a search actually runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Cpu,
    Metal,
    Vulkan,
}

/// Everything the selection heuristic looks at.
#[derive(Debug, Clone, Copy)]
pub struct Workload<'a> {
    pub pattern: &'a [u8],
    pub text_len: u64,
    pub num_patterns: usize,
    /// `None` for literal searches, `Some(state count)` for compiled regex.
    pub regex_states: Option<usize>,
}

/// Tier adjustments derived from the one-time capability probe.
#[derive(Debug, Clone, Copy, Default)]
struct HwAdjust {
    gpu_bias: i32,
    min_gpu_size_shift: i32,
    /// Largest single buffer the device accepts.
    max_buffer_len: u64,
}

static HW_ADJUST: OnceCell<HwAdjust> = OnceCell::new();

/// Letters common enough in English text that a pattern containing several
/// of them tends to produce match-dense workloads the GPU wins on.
const COMMON_LETTERS: &[u8] = b"etaoinshrl";

/// Routes each search to CPU, Metal or Vulkan. GPU engines are created
/// lazily on first use and kept for the life of the dispatcher; a failed
/// init is remembered so the probe runs only once.
pub struct Dispatcher {
    tuning: DispatchTuning,
    override_: BackendOverride,
    #[cfg(target_os = "macos")]
    metal: OnceCell<Option<crate::gpu::metal::MetalEngine>>,
    vulkan: OnceCell<Option<crate::gpu::vulkan::VulkanEngine>>,
}

impl Dispatcher {
    pub fn new(tuning: DispatchTuning, override_: BackendOverride) -> Self {
        Self {
            tuning,
            override_,
            #[cfg(target_os = "macos")]
            metal: OnceCell::new(),
            vulkan: OnceCell::new(),
        }
    }

    /// The tuning in effect after the hardware probe's adjustments.
    pub fn effective_tuning(&self) -> DispatchTuning {
        let mut tuning = self.tuning;
        if let Some(adjust) = HW_ADJUST.get() {
            tuning.gpu_bias = (tuning.gpu_bias + adjust.gpu_bias).clamp(-8, 8);
            if adjust.min_gpu_size_shift > 0 {
                tuning.min_gpu_size <<= adjust.min_gpu_size_shift as u32;
            } else {
                tuning.min_gpu_size >>= (-adjust.min_gpu_size_shift) as u32;
            }
            if adjust.max_buffer_len > 0 {
                tuning.max_gpu_size = tuning.max_gpu_size.min(adjust.max_buffer_len);
            }
        }
        tuning
    }

    /// Picks the backend for a workload. Hard rules short-circuit; anything
    /// left is decided by the additive score.
    pub fn select(&self, workload: &Workload<'_>, options: &SearchOptions) -> Backend {
        match self.override_ {
            BackendOverride::Cpu => return Backend::Cpu,
            BackendOverride::Metal => return Backend::Metal,
            BackendOverride::Vulkan => return Backend::Vulkan,
            BackendOverride::Gpu => return platform_gpu(),
            BackendOverride::Auto => {}
        }

        let tuning = self.effective_tuning();

        // hard rules
        if workload.text_len < tuning.min_gpu_size || workload.text_len > tuning.max_gpu_size {
            return Backend::Cpu;
        }
        if workload.num_patterns > 1 {
            // the per-pattern union lives on the host
            return Backend::Cpu;
        }
        if options.perl {
            return Backend::Cpu;
        }
        if options.invert_match && workload.regex_states.is_none() {
            // literal inversion is line-wise host work
            return Backend::Cpu;
        }
        if workload.regex_states.is_some_and(|n| n > GPU_MAX_STATES) {
            return Backend::Cpu;
        }
        if workload.pattern.len() > MAX_PATTERN_LEN && workload.regex_states.is_none() {
            return Backend::Cpu;
        }

        let score = score_workload(workload.pattern, options, workload.text_len, &tuning);
        debug!(score, text_len = workload.text_len, "workload scored");
        if score >= 0 {
            platform_gpu()
        } else {
            Backend::Cpu
        }
    }

    /// Lazily initialized engine for a GPU backend; `None` when the device
    /// is unavailable (the caller then falls back to the CPU engine).
    pub fn engine(&self, backend: Backend) -> Option<&dyn GpuBackend> {
        match backend {
            Backend::Cpu => None,
            Backend::Metal => self.metal_engine(),
            Backend::Vulkan => self.vulkan_engine(),
        }
    }

    #[cfg(target_os = "macos")]
    fn metal_engine(&self) -> Option<&dyn GpuBackend> {
        self.metal
            .get_or_init(|| match crate::gpu::metal::MetalEngine::new() {
                Ok(engine) => {
                    apply_hw_adjust(engine.capabilities());
                    Some(engine)
                }
                Err(e) => {
                    warn!("metal unavailable: {e}");
                    None
                }
            })
            .as_ref()
            .map(|e| e as &dyn GpuBackend)
    }

    #[cfg(not(target_os = "macos"))]
    fn metal_engine(&self) -> Option<&dyn GpuBackend> {
        None
    }

    fn vulkan_engine(&self) -> Option<&dyn GpuBackend> {
        self.vulkan
            .get_or_init(|| match crate::gpu::vulkan::VulkanEngine::new() {
                Ok(engine) => {
                    apply_hw_adjust(engine.capabilities());
                    Some(engine)
                }
                Err(e) => {
                    warn!("vulkan unavailable: {e}");
                    None
                }
            })
            .as_ref()
            .map(|e| e as &dyn GpuBackend)
    }
}

/// Platform-default GPU backend.
pub fn platform_gpu() -> Backend {
    if cfg!(target_os = "macos") {
        Backend::Metal
    } else {
        Backend::Vulkan
    }
}

/// Additive workload score; non-negative means GPU. The weights are
/// tunable, only the hard rules in [`Dispatcher::select`] are contractual.
pub fn score_workload(
    pattern: &[u8],
    options: &SearchOptions,
    text_len: u64,
    tuning: &DispatchTuning,
) -> i32 {
    let mut score = 3; // base GPU advantage on eligible workloads

    if text_len >= 1 << 20 {
        score += 1;
    }
    if text_len >= 4 << 20 {
        score += 1;
    }

    let len = pattern.len() as u32;
    if len == 1 {
        score += 6;
    } else if len <= tuning.short_pattern_len {
        score += 4;
    } else if (5..=7).contains(&len) {
        score += 2;
    } else if len >= tuning.long_pattern_len {
        score += 1;
    }

    if options.case_insensitive {
        score += 6;
    }
    if options.word_boundary {
        score += 5;
    }

    let common = pattern
        .iter()
        .filter(|b| COMMON_LETTERS.contains(&b.to_ascii_lowercase()))
        .count();
    if common >= 3 {
        score += 2;
    }
    if is_rare_pattern(pattern) {
        score -= 3;
    }

    score + tuning.gpu_bias.clamp(-8, 8)
}

/// Patterns that rarely occur in prose: identifiers with digits or
/// underscores, or long all-uppercase tokens.
fn is_rare_pattern(pattern: &[u8]) -> bool {
    if pattern
        .iter()
        .any(|b| b.is_ascii_digit() || *b == b'_')
    {
        return true;
    }
    pattern.len() >= 8
        && !pattern.is_empty()
        && pattern
            .iter()
            .all(|b| !b.is_ascii_alphabetic() || b.is_ascii_uppercase())
        && pattern.iter().any(|b| b.is_ascii_uppercase())
}

/// One-time hardware adaptation: a rough performance tier computed from the
/// capability probe feeds back into the scoring bias and the minimum text
/// size worth shipping to the device.
fn apply_hw_adjust(caps: &GpuCapabilities) {
    let _ = HW_ADJUST.get_or_init(|| {
        let mut perf = 0;
        let working_set_gb = caps.working_set >> 30;
        if working_set_gb >= 16 {
            perf += 3;
        } else if working_set_gb >= 8 {
            perf += 2;
        } else if working_set_gb >= 4 {
            perf += 1;
        }
        if caps.is_discrete {
            perf += 2;
        }
        if caps.unified_memory {
            perf += 1;
        }
        if caps.max_threadgroup >= 1024 {
            perf += 1;
        }

        let (gpu_bias, min_gpu_size_shift) = match perf {
            6.. => (4, -1),
            4..=5 => (2, 0),
            2..=3 => (0, 0),
            _ => (-2, 2),
        };
        let adjust = HwAdjust {
            gpu_bias,
            min_gpu_size_shift,
            max_buffer_len: caps.max_buffer_len,
        };
        debug!(device = %caps.name, perf, ?adjust, "hardware tier probed");
        adjust
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auto_dispatcher(tuning: DispatchTuning) -> Dispatcher {
        Dispatcher::new(tuning, BackendOverride::Auto)
    }

    fn workload(pattern: &[u8], text_len: u64) -> Workload<'_> {
        Workload {
            pattern,
            text_len,
            num_patterns: 1,
            regex_states: None,
        }
    }

    #[test]
    fn test_small_text_goes_cpu() {
        let d = auto_dispatcher(DispatchTuning::default());
        let w = workload(b"hello", 1024);
        assert_eq!(d.select(&w, &SearchOptions::default()), Backend::Cpu);
    }

    #[test]
    fn test_oversized_text_goes_cpu() {
        let d = auto_dispatcher(DispatchTuning {
            max_gpu_size: 1 << 20,
            ..Default::default()
        });
        let w = workload(b"hello", 2 << 20);
        assert_eq!(d.select(&w, &SearchOptions::default()), Backend::Cpu);
    }

    #[test]
    fn test_multi_pattern_goes_cpu() {
        let d = auto_dispatcher(DispatchTuning::default());
        let mut w = workload(b"e", 8 << 20);
        w.num_patterns = 2;
        assert_eq!(d.select(&w, &SearchOptions::default()), Backend::Cpu);
    }

    #[test]
    fn test_perl_goes_cpu() {
        let d = auto_dispatcher(DispatchTuning::default());
        let w = workload(b"e", 8 << 20);
        let options = SearchOptions {
            perl: true,
            ..Default::default()
        };
        assert_eq!(d.select(&w, &options), Backend::Cpu);
    }

    #[test]
    fn test_complex_regex_goes_cpu() {
        let d = auto_dispatcher(DispatchTuning::default());
        let mut w = workload(b"e", 8 << 20);
        w.regex_states = Some(GPU_MAX_STATES + 1);
        assert_eq!(d.select(&w, &SearchOptions::default()), Backend::Cpu);
    }

    #[test]
    fn test_eligible_single_byte_goes_gpu() {
        let d = auto_dispatcher(DispatchTuning::default());
        let w = workload(b"e", 8 << 20);
        assert_eq!(d.select(&w, &SearchOptions::default()), platform_gpu());
    }

    #[test]
    fn test_override_wins() {
        let d = Dispatcher::new(DispatchTuning::default(), BackendOverride::Cpu);
        let w = workload(b"e", 8 << 20);
        assert_eq!(d.select(&w, &SearchOptions::default()), Backend::Cpu);

        let d = Dispatcher::new(DispatchTuning::default(), BackendOverride::Vulkan);
        assert_eq!(d.select(&w, &SearchOptions::default()), Backend::Vulkan);
    }

    #[test]
    fn test_rare_pattern_detection() {
        assert!(is_rare_pattern(b"FooBar_9"));
        assert!(is_rare_pattern(b"x1"));
        assert!(is_rare_pattern(b"MAX_RESULTS"));
        assert!(!is_rare_pattern(b"hello"));
        assert!(!is_rare_pattern(b"The"));
    }

    #[test]
    fn test_score_prefers_case_insensitive_short_patterns() {
        let tuning = DispatchTuning::default();
        let options_ci = SearchOptions {
            case_insensitive: true,
            ..Default::default()
        };
        let base = score_workload(b"hello", &SearchOptions::default(), 2 << 20, &tuning);
        let ci = score_workload(b"hello", &options_ci, 2 << 20, &tuning);
        assert!(ci > base);
    }
}
