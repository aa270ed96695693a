//! Perl-compatible regex adapter.
//!
//! The engine treats PCRE as an opaque collaborator: compile a handle, ask
//! it for all match spans, drop it. With the `pcre` feature the handle wraps
//! the `pcre2` crate; without it, compilation reports a configuration error
//! so the CLI can exit with status 2.

use crate::errors::{SearchError, SearchResult};

#[cfg(feature = "pcre")]
pub struct PerlRegex {
    inner: pcre2::bytes::Regex,
}

#[cfg(feature = "pcre")]
impl PerlRegex {
    pub fn compile(
        pattern: &[u8],
        case_insensitive: bool,
        multiline: bool,
    ) -> SearchResult<Self> {
        let pattern = std::str::from_utf8(pattern)
            .map_err(|_| SearchError::config_error("perl pattern must be valid UTF-8"))?;
        let inner = pcre2::bytes::RegexBuilder::new()
            .caseless(case_insensitive)
            .multi_line(multiline)
            .jit_if_available(true)
            .build(pattern)
            .map_err(|e| SearchError::config_error(format!("perl pattern rejected: {e}")))?;
        Ok(Self { inner })
    }

    /// All match spans, skipping any the library flags as errored.
    pub fn find_all(&self, text: &[u8]) -> Vec<(usize, usize)> {
        self.inner
            .find_iter(text)
            .filter_map(|m| m.ok())
            .map(|m| (m.start(), m.end()))
            .collect()
    }
}

#[cfg(not(feature = "pcre"))]
pub struct PerlRegex;

#[cfg(not(feature = "pcre"))]
impl PerlRegex {
    pub fn compile(
        _pattern: &[u8],
        _case_insensitive: bool,
        _multiline: bool,
    ) -> SearchResult<Self> {
        Err(SearchError::config_error(
            "perl regex support not compiled in (rebuild with --features pcre)",
        ))
    }

    pub fn find_all(&self, _text: &[u8]) -> Vec<(usize, usize)> {
        Vec::new()
    }
}

#[cfg(all(test, feature = "pcre"))]
mod tests {
    use super::*;

    #[test]
    fn test_find_all() {
        let re = PerlRegex::compile(br"\d+", false, true).unwrap();
        assert_eq!(re.find_all(b"a 12 b 345"), vec![(2, 4), (7, 10)]);
    }

    #[test]
    fn test_caseless() {
        let re = PerlRegex::compile(b"abc", true, true).unwrap();
        assert_eq!(re.find_all(b"ABC"), vec![(0, 3)]);
    }

    #[test]
    fn test_compile_error() {
        assert!(PerlRegex::compile(b"(unclosed", false, true).is_err());
    }
}
