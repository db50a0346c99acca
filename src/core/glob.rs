//! Package path globs.
//!
//! `*` stays within one path segment, `**` crosses segments.

use globset::{GlobBuilder, GlobMatcher};

use crate::error::{Error, Result};

/// Compile a path glob with `/` as separator.
///
/// # Errors
///
/// Returns `Error::SelectorCompile` for malformed patterns.
pub fn compile_glob(pattern: &str) -> Result<GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| Error::selector(pattern, e))
}
