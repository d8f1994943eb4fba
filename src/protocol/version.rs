//! Protocol versions and version requirements.
//!
//! Versions and requirements are `semver` types. Requirements use Cargo's
//! syntax:
//!
//! ```text
//! *  1.x  1.1.*            wildcards
//! 1.1  ^1.1                >=1.1.0, <2.0.0 (a bare version is a caret)
//! ~1.1.0                   >=1.1.0, <1.2.0
//! >=1.0.0, <2.0.0          every comparator must hold
//! ```

pub use semver::{Version, VersionReq};

use crate::error::{OrchestratorError, OrchestratorResult};

/// Parse a `MAJOR.MINOR.PATCH` protocol version.
pub fn parse_version(s: &str) -> OrchestratorResult<Version> {
    Version::parse(s.trim()).map_err(|e| {
        OrchestratorError::UnsupportedProtocolVersion(format!("malformed version '{}': {}", s.trim(), e))
    })
}

/// Parse a version requirement such as `^1.0` or `>=1.0.0, <2.0.0`.
pub fn parse_requirement(s: &str) -> OrchestratorResult<VersionReq> {
    VersionReq::parse(s.trim()).map_err(|e| {
        OrchestratorError::UnsupportedProtocolVersion(format!(
            "malformed version requirement '{}': {}",
            s.trim(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(s: &str) -> VersionReq {
        parse_requirement(s).unwrap()
    }

    fn v(s: &str) -> Version {
        parse_version(s).unwrap()
    }

    #[test]
    fn test_version_parse_and_order() {
        assert_eq!(v(" 1.10.0 "), Version::new(1, 10, 0));
        assert!(v("1.10.0") > v("1.9.9"));
        assert!(v("2.0.0") > v("1.99.0"));
        assert_eq!(v("2.0.0").to_string(), "2.0.0");

        let err = parse_version("1.0").unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_PROTOCOL_VERSION");
    }

    #[test]
    fn test_version_serde_as_string() {
        let json = serde_json::to_string(&Version::new(1, 1, 0)).unwrap();
        assert_eq!(json, "\"1.1.0\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Version::new(1, 1, 0));
        assert!(serde_json::from_str::<Version>("\"one\"").is_err());
    }

    #[test]
    fn test_requirement_forms() {
        assert!(req("*").matches(&v("0.0.1")));
        assert!(req("1.x").matches(&v("1.1.0")));
        assert!(!req("1.x").matches(&v("2.0.0")));
        assert!(req("1.1").matches(&v("1.1.0")));
        assert!(!req("1.1").matches(&v("1.0.0")));
        assert!(!req("1.0.0").matches(&v("2.0.0")));
        assert!(req("~1.1.0").matches(&v("1.1.5")));
        assert!(!req("~1.1.0").matches(&v("1.2.0")));

        let range = req(">=1.0.0, <2.0.0");
        assert!(range.matches(&v("1.1.0")));
        assert!(!range.matches(&v("2.0.0")));
    }

    #[test]
    fn test_malformed_requirements() {
        for bad in ["abc", ">=", "1.2.3.4", "not-a-version"] {
            let err = parse_requirement(bad).unwrap_err();
            assert_eq!(err.code(), "UNSUPPORTED_PROTOCOL_VERSION", "input {:?}", bad);
        }
    }
}
