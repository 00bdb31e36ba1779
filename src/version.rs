// src/version.rs

//! Version ordering and predicate grammar
//!
//! Xcer orders versions by semantic-versioning precedence and expresses
//! constraints in the `semver` requirement grammar (`>=2.0`, `=1.2.3`,
//! `^1.4`, ...). Index entries are allowed to use partial versions such
//! as `2.0` or even `2`; they are padded to full `major.minor.patch`
//! form on parse. Swapping the precedence rule means swapping this
//! module, nothing else.

use crate::error::{Error, Result};

pub use semver::{Version, VersionReq};

/// Parse a version string, tolerating partial forms (`2` -> `2.0.0`)
pub fn parse_version(input: &str) -> Result<Version> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::Parse("empty version string".to_string()));
    }

    if let Ok(version) = Version::parse(trimmed) {
        return Ok(version);
    }

    // Pad partial numeric versions. Anything with pre-release or build
    // metadata must already be complete.
    let numeric_parts = trimmed.split('.').count();
    let padded = match numeric_parts {
        1 => format!("{}.0.0", trimmed),
        2 => format!("{}.0", trimmed),
        _ => trimmed.to_string(),
    };

    Version::parse(&padded).map_err(|e| Error::Parse(format!("invalid version '{}': {}", input, e)))
}

/// Parse a version predicate such as `>=2.0` or `=1.2.3`
pub fn parse_predicate(input: &str) -> Result<VersionReq> {
    VersionReq::parse(input.trim())
        .map_err(|e| Error::Parse(format!("invalid version predicate '{}': {}", input, e)))
}

/// Serde helpers for lenient version fields in index and store documents
pub mod lenient {
    use super::{parse_version, Version};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(version: &Version, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&version.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Version, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_version(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_version() {
        let v = parse_version("1.2.3").unwrap();
        assert_eq!(v, Version::new(1, 2, 3));
    }

    #[test]
    fn test_parse_partial_versions() {
        assert_eq!(parse_version("2.0").unwrap(), Version::new(2, 0, 0));
        assert_eq!(parse_version("7").unwrap(), Version::new(7, 0, 0));
    }

    #[test]
    fn test_parse_version_with_prerelease() {
        let v = parse_version("1.0.0-rc.1").unwrap();
        assert_eq!(v.pre.as_str(), "rc.1");
    }

    #[test]
    fn test_parse_garbage_version() {
        assert!(parse_version("not-a-version").is_err());
        assert!(parse_version("").is_err());
    }

    #[test]
    fn test_predicate_matching() {
        let req = parse_predicate(">=2.0").unwrap();
        assert!(req.matches(&Version::new(2, 0, 0)));
        assert!(req.matches(&Version::new(3, 5, 1)));
        assert!(!req.matches(&Version::new(1, 9, 9)));
    }

    #[test]
    fn test_exact_predicate() {
        let req = parse_predicate("=1.2.3").unwrap();
        assert!(req.matches(&Version::new(1, 2, 3)));
        assert!(!req.matches(&Version::new(1, 2, 4)));
    }

    #[test]
    fn test_precedence_ordering() {
        assert!(parse_version("2.0").unwrap() > parse_version("1.9.9").unwrap());
        assert!(parse_version("1.10.0").unwrap() > parse_version("1.9.0").unwrap());
    }
}
