//! gpugrep: a grep-compatible search core with three execution engines.
//!
//! The same match semantics run on a vectorized CPU path, a Metal compute
//! path and a Vulkan compute path; a workload-aware dispatcher picks the
//! engine per search and falls back to the CPU on any GPU failure. See
//! [`search::Searcher`] for the entry point.

pub mod aggregate;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod gpu;
pub mod literal;
pub mod pcre;
pub mod regex;
pub mod results;
pub mod search;
pub mod skip;

// Re-export commonly used types
pub use config::{BackendOverride, DispatchTuning, SearchOptions};
pub use errors::{CompileError, SearchError, SearchResult};
pub use results::{MatchRecord, SearchOutput};
pub use search::Searcher;
