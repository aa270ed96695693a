use std::io;

/// Errors produced by the regex compiler.
///
/// Each variant corresponds to a distinct syntactic failure so callers can
/// decide whether to surface the error or downgrade to a literal search.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("unmatched parenthesis at byte {0}")]
    UnmatchedParen(usize),
    #[error("unmatched bracket at byte {0}")]
    UnmatchedBracket(usize),
    #[error("invalid quantifier at byte {0}")]
    InvalidQuantifier(usize),
    #[error("invalid escape sequence '\\{0}'")]
    InvalidEscape(char),
    #[error("invalid range in character class")]
    InvalidRange,
    #[error("pattern too complex: needs more than {0} NFA states")]
    PatternTooComplex(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("pattern error: {0}")]
    Compile(#[from] CompileError),
    #[error("GPU error: {0}")]
    Gpu(String),
}

impl SearchError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        SearchError::Config(msg.into())
    }

    pub fn gpu_error(msg: impl Into<String>) -> Self {
        SearchError::Gpu(msg.into())
    }
}

pub type SearchResult<T> = std::result::Result<T, SearchError>;
