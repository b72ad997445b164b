//! Validation helpers shared by the registry services.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};

fn semver_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d+\.\d+\.\d+(-[a-zA-Z0-9.-]+)?(\+[a-zA-Z0-9.-]+)?$")
            .expect("static semver pattern is valid")
    })
}

/// Validates a version string against `spec.md` §4.5's semantic-version
/// pattern.
///
/// # Errors
///
/// Returns [`Error::InvalidVersion`] when the string does not match.
pub fn validate_semver(version: &str) -> Result<()> {
    if semver_regex().is_match(version) {
        Ok(())
    } else {
        Err(Error::InvalidVersion {
            version: version.to_owned(),
        })
    }
}

/// Validates that a string is a well-formed `http(s)` URL, per `spec.md`
/// §4.5's `health_endpoint` requirement. Intentionally minimal: scheme
/// and non-empty authority, no DNS resolution.
///
/// # Errors
///
/// Returns [`Error::InvalidUrl`] when the scheme is not `http`/`https`
/// or the authority component is empty.
pub fn validate_http_url(url: &str) -> Result<()> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| Error::InvalidUrl {
            url: url.to_owned(),
            reason: "must start with http:// or https://".into(),
        })?;

    let authority = rest.split('/').next().unwrap_or("");
    if authority.is_empty() {
        return Err(Error::InvalidUrl {
            url: url.to_owned(),
            reason: "missing host".into(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semver_accepts_valid_versions() {
        assert!(validate_semver("1.0.0").is_ok());
        assert!(validate_semver("1.2.3-beta.1").is_ok());
        assert!(validate_semver("1.2.3+build.7").is_ok());
    }

    #[test]
    fn semver_rejects_invalid_versions() {
        assert!(validate_semver("1.0").is_err());
        assert!(validate_semver("v1.0.0").is_err());
        assert!(validate_semver("").is_err());
    }

    #[test]
    fn url_validation() {
        assert!(validate_http_url("https://agent.example.com/health").is_ok());
        assert!(validate_http_url("ftp://agent.example.com").is_err());
        assert!(validate_http_url("https://").is_err());
    }
}
