//! Flat-string glob patterns over canonical request URLs.

use super::MatcherError;
use glob::{MatchOptions, Pattern as GlobPattern};

/// Options every route pattern is evaluated with.
///
/// `*` crosses `/`, `.` and `:`: the canonical URL is matched as one flat
/// string, not as path segments. Changing any of these flags changes which
/// traffic is transformed.
pub const URL_MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Compiled route pattern.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    raw: String,
    glob: GlobPattern,
}

impl UrlPattern {
    /// Compile a pattern over the literal string form of a URL.
    pub fn compile(raw: &str) -> Result<Self, MatcherError> {
        let glob = GlobPattern::new(raw).map_err(|source| MatcherError::InvalidGlob {
            pattern: raw.to_string(),
            source,
        })?;

        Ok(Self {
            raw: raw.to_string(),
            glob,
        })
    }

    /// Check a canonical URL string against the pattern.
    pub fn matches(&self, canonical: &str) -> bool {
        self.glob.matches_with(canonical, URL_MATCH_OPTIONS)
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}
