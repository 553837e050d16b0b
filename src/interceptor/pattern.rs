//! Test-file classification.
//!
//! A location is a test file when it has a known source extension and either
//! sits under a `test`, `tests` or `__tests__` directory or has a test-style
//! base name (`test.*`, `test-*`, `*.test.*`, `*-test.*`, `*_test.*`,
//! `*.spec.*`).

use std::{fmt, path::Path};

use regex::Regex;

use crate::errors::ConfigError;

pub const DEFAULT_PATTERN: &str = concat!(
    r"^(?:.*/)?",
    r"(?:",
    r"(?:test|tests|__tests__)/(?:[^/]+/)*[^/]+",
    r"|test(?:[.-][^/]*)?",
    r"|[^/]*[.\-_]test(?:\.[^/]*)?",
    r"|[^/]*\.spec(?:\.[^/]*)?",
    r")",
    r"\.(?:js|mjs|cjs|ts|mts|cts)$",
);

#[derive(Clone)]
pub struct TestPattern {
    regex: Regex,
}

impl TestPattern {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        Regex::new(pattern)
            .map(|regex| Self { regex })
            .map_err(|source| ConfigError::Pattern {
                pattern: pattern.to_string(),
                source,
            })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Match a location. Backslash separators are treated as `/`.
    pub fn matches(&self, location: &str) -> bool {
        if location.contains('\\') {
            self.regex.is_match(&location.replace('\\', "/"))
        } else {
            self.regex.is_match(location)
        }
    }

    pub fn matches_path(&self, path: &Path) -> bool {
        self.matches(&path.to_string_lossy())
    }
}

impl Default for TestPattern {
    fn default() -> Self {
        Self {
            // The default pattern is a compile-time constant covered by tests.
            regex: Regex::new(DEFAULT_PATTERN).unwrap_or_else(|_| unreachable!("default pattern is valid")),
        }
    }
}

impl fmt::Debug for TestPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TestPattern").field(&self.as_str()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_markers_match() {
        let pattern = TestPattern::default();
        assert!(pattern.matches("foo/test/bar.mjs"));
        assert!(pattern.matches("/abs/tests/deep/nested/x.js"));
        assert!(pattern.matches("src/__tests__/x.cts"));
        assert!(!pattern.matches("foo/bar.mjs"));
        assert!(!pattern.matches("foo/contest/bar.mjs"));
    }

    #[test]
    fn basename_markers_match() {
        let pattern = TestPattern::default();
        for hit in ["foo.test.ts", "test.mjs", "test-io.js", "io-test.mts", "io_test.cjs", "io.spec.js", "a/b/c.test.mjs"] {
            assert!(pattern.matches(hit), "{hit} should match");
        }
        for miss in ["latest.mjs", "footest.js", "test.rs", "foo.test.rs", "spec.js"] {
            assert!(!pattern.matches(miss), "{miss} should not match");
        }
    }

    #[test]
    fn windows_separators_are_normalized() {
        assert!(TestPattern::default().matches(r"C:\proj\test\a.mjs"));
    }

    #[test]
    fn custom_patterns_are_validated() {
        assert!(TestPattern::new(r"\.check\.mjs$").unwrap().matches("a.check.mjs"));
        assert!(matches!(TestPattern::new("("), Err(ConfigError::Pattern { .. })));
    }
}
