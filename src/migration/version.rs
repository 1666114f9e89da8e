use std::fmt;
use std::str::FromStr;

use semver::Version;

/// Content schema version in `MAJOR.MINOR.PATCH` form
///
/// Ordering is numeric per component, so `0.0.10` sorts after `0.0.9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SchemaVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Render an optional version, `none` when absent
pub fn describe(version: Option<SchemaVersion>) -> String {
    version
        .map(|v| v.to_string())
        .unwrap_or_else(|| "none".to_string())
}

/// Error returned when a string is not a plain `MAJOR.MINOR.PATCH` version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionParseError {
    pub input: String,
    pub reason: String,
}

impl fmt::Display for VersionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid version '{}': {}", self.input, self.reason)
    }
}

impl std::error::Error for VersionParseError {}

impl FromStr for SchemaVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason: String| VersionParseError {
            input: s.to_string(),
            reason,
        };

        let version = Version::parse(s).map_err(|e| fail(e.to_string()))?;
        if !version.pre.is_empty() {
            return Err(fail("pre-release suffixes are not allowed".to_string()));
        }
        if !version.build.is_empty() {
            return Err(fail("build metadata is not allowed".to_string()));
        }
        Ok(SchemaVersion::from(&version))
    }
}

impl From<&Version> for SchemaVersion {
    fn from(version: &Version) -> Self {
        SchemaVersion::new(version.major, version.minor, version.patch)
    }
}

impl From<SchemaVersion> for Version {
    fn from(version: SchemaVersion) -> Self {
        Version::new(version.major, version.minor, version.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let v: SchemaVersion = "1.20.3".parse().unwrap();
        assert_eq!(v, SchemaVersion::new(1, 20, 3));
        assert_eq!(v.to_string(), "1.20.3");
    }

    #[test]
    fn test_numeric_ordering() {
        let a: SchemaVersion = "0.0.9".parse().unwrap();
        let b: SchemaVersion = "0.0.10".parse().unwrap();
        let c: SchemaVersion = "0.1.0".parse().unwrap();
        assert!(a < b);
        assert!(b < c);

        // An absent marker sorts below every real version
        assert!(None < Some(SchemaVersion::new(0, 0, 0)));
    }

    #[test]
    fn test_rejects_malformed() {
        for input in [
            "",
            "1",
            "1.2",
            "1.2.3.4",
            "a.b.c",
            "1.-2.3",
            "01.0.0",
            "1..3",
            " 1.2.3",
            "v1.2.3",
            "99999999999999999999.0.0",
        ] {
            assert!(input.parse::<SchemaVersion>().is_err(), "accepted {:?}", input);
        }
    }

    #[test]
    fn test_rejects_pre_release_and_build() {
        let err = "0.1.0-alpha.1".parse::<SchemaVersion>().unwrap_err();
        assert_eq!(err.reason, "pre-release suffixes are not allowed");
        let err = "0.1.0+20240101".parse::<SchemaVersion>().unwrap_err();
        assert_eq!(err.reason, "build metadata is not allowed");
    }

    #[test]
    fn test_semver_conversion() {
        let v = SchemaVersion::new(0, 0, 10);
        let semver = Version::from(v);
        assert_eq!(semver, Version::parse("0.0.10").unwrap());
        assert_eq!(SchemaVersion::from(&semver), v);
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(None), "none");
        assert_eq!(describe(Some(SchemaVersion::new(0, 0, 2))), "0.0.2");
    }
}
