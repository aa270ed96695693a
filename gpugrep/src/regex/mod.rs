//! Regex compilation and execution.
//!
//! A pattern is lowered once into an arena-based NFA that serves both the
//! CPU evaluator and, serialized into a packed table, the GPU kernels.

pub mod exec;
pub mod nfa;
pub mod parser;

pub use exec::Matcher;
pub use nfa::{CompiledRegex, GpuRegexTable, GPU_MAX_STATES, MAX_STATES};
