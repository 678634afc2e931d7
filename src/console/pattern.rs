//! Console patterns: literal substrings or regular expressions.

use std::fmt;

use regex::Regex;

/// Something to wait for on a console.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Literal substring, case-sensitive.
    Exact(String),
    /// Regular expression, searched anywhere in the unread output.
    Regex(Regex),
}

impl Pattern {
    pub fn exact(text: impl Into<String>) -> Self {
        Pattern::Exact(text.into())
    }

    pub fn regex(source: &str) -> Result<Self, regex::Error> {
        Regex::new(source).map(Pattern::Regex)
    }

    /// Byte range of the first occurrence in `haystack`.
    pub fn find(&self, haystack: &str) -> Option<(usize, usize)> {
        match self {
            Pattern::Exact(needle) => haystack.find(needle.as_str()).map(|start| (start, start + needle.len())),
            Pattern::Regex(re) => re.find(haystack).map(|m| (m.start(), m.end())),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Exact(text) => write!(f, "{text:?}"),
            Pattern::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

impl From<&str> for Pattern {
    fn from(text: &str) -> Self {
        Pattern::exact(text)
    }
}

/// Human-readable list of patterns for error messages.
pub(crate) fn describe(patterns: &[Pattern]) -> String {
    patterns.iter().map(ToString::to_string).collect::<Vec<_>>().join(" | ")
}
