//! Pre-compiled wildcard pattern matching for policy rules.
//!
//! `spec.md` §6 "Validation constants": `*` alone matches anything; `*`
//! embedded in a pattern is translated to regex `.*`. Design Notes §9
//! call for compiling patterns once at policy load time rather than
//! per-call, so [`WildcardPattern`] does the translation in
//! [`WildcardPattern::compile`] and matches cheaply thereafter.

use regex::Regex;

use crate::error::{Error, Result};

/// A wildcard pattern compiled once and matched many times.
#[derive(Debug, Clone)]
pub enum WildcardPattern {
    /// The pattern was the bare wildcard `*`; matches any input.
    Any,
    /// The pattern had no `*`; matches only the exact string.
    Exact(String),
    /// The pattern contained an embedded `*`; matches via regex.
    Regex(Box<Regex>),
}

impl WildcardPattern {
    /// Compiles a raw pattern string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if an embedded wildcard pattern
    /// does not translate into a valid regular expression.
    pub fn compile(raw: &str) -> Result<Self> {
        if raw == "*" {
            return Ok(Self::Any);
        }

        if !raw.contains('*') {
            return Ok(Self::Exact(raw.to_owned()));
        }

        let escaped = regex::escape(raw).replace(r"\*", ".*");
        let anchored = format!("^{escaped}$");
        let compiled = Regex::new(&anchored).map_err(|err| Error::InvalidPattern {
            pattern: raw.to_owned(),
            reason: err.to_string(),
        })?;

        Ok(Self::Regex(Box::new(compiled)))
    }

    /// Returns `true` if `value` matches this pattern.
    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(exact) => exact == value,
            Self::Regex(re) => re.is_match(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_wildcard_matches_anything() {
        let pattern = WildcardPattern::compile("*").unwrap();
        assert!(pattern.matches("anything"));
        assert!(pattern.matches(""));
    }

    #[test]
    fn exact_pattern_matches_only_itself() {
        let pattern = WildcardPattern::compile("sales-kb").unwrap();
        assert!(pattern.matches("sales-kb"));
        assert!(!pattern.matches("sales-kb-2"));
    }

    #[test]
    fn embedded_wildcard_matches_prefix() {
        let pattern = WildcardPattern::compile("marketing-*").unwrap();
        assert!(pattern.matches("marketing-1"));
        assert!(pattern.matches("marketing-"));
        assert!(!pattern.matches("engineering-1"));
    }
}
