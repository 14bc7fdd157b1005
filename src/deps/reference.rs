// src/deps/reference.rs

//! Package references: `name/version` or `name/[range]`

use crate::error::{Error, Result};
use semver::{Version, VersionReq};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Version constraint of a requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    /// Exact pin, compared as a string (`61.0`, `2023.09.0`)
    Exact(String),
    /// Semver range written as `[>=1.2 <2]`
    Range { source: String, req: VersionReq },
}

impl VersionSpec {
    pub fn matches(&self, version: &str) -> bool {
        match self {
            Self::Exact(v) => v == version,
            Self::Range { req, .. } => parse_lenient(version).is_some_and(|v| req.matches(&v)),
        }
    }

    /// The pinned version, if exact
    pub fn exact(&self) -> Option<&str> {
        match self {
            Self::Exact(v) => Some(v),
            Self::Range { .. } => None,
        }
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => f.write_str(v),
            Self::Range { source, .. } => write!(f, "[{}]", source),
        }
    }
}

/// Parse versions like `61.0` or `v1.17` as semver by padding missing parts
pub fn parse_lenient(version: &str) -> Option<Version> {
    let trimmed = version.trim().trim_start_matches('v');
    if let Ok(v) = Version::parse(trimmed) {
        return Some(v);
    }

    let (core, rest) = match trimmed.find(['-', '+']) {
        Some(i) => trimmed.split_at(i),
        None => (trimmed, ""),
    };
    let mut parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    while parts.len() < 3 {
        parts.push("0");
    }
    // Leading zeros (2023.09) are not valid semver
    let normalized: Vec<String> = parts
        .iter()
        .map(|p| p.parse::<u64>().map(|n| n.to_string()))
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    Version::parse(&format!("{}{}", normalized.join("."), rest)).ok()
}

/// Order two version strings, semver-aware where possible
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_lenient(a), parse_lenient(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        _ => a.cmp(b),
    }
}

/// A reference to another package
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageRef {
    pub name: String,
    pub version: VersionSpec,
}

impl FromStr for PackageRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (name, version) = s.trim().split_once('/').ok_or_else(|| {
            Error::ParseError(format!("Invalid reference '{}': expected name/version", s))
        })?;
        let name = name.trim();
        let version = version.trim();

        if name.is_empty() || name.contains(char::is_whitespace) || name.contains("::") {
            return Err(Error::ParseError(format!("Invalid package name in '{}'", s)));
        }
        if version.is_empty() {
            return Err(Error::ParseError(format!("Missing version in '{}'", s)));
        }

        let version = if let Some(inner) = version.strip_prefix('[') {
            let inner = inner.strip_suffix(']').ok_or_else(|| {
                Error::ParseError(format!("Unterminated version range in '{}'", s))
            })?;
            let source = inner.trim().to_string();
            let req = VersionReq::parse(&source.split_whitespace().collect::<Vec<_>>().join(", "))
                .map_err(|e| Error::ParseError(format!("Invalid version range in '{}': {}", s, e)))?;
            VersionSpec::Range { source, req }
        } else {
            VersionSpec::Exact(version.to_string())
        };

        Ok(Self {
            name: name.to_string(),
            version,
        })
    }
}

impl TryFrom<String> for PackageRef {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<PackageRef> for String {
    fn from(r: PackageRef) -> String {
        r.to_string()
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exact() {
        let r: PackageRef = "rdma-core/61.0".parse().unwrap();
        assert_eq!(r.name, "rdma-core");
        assert_eq!(r.version.exact(), Some("61.0"));
        assert!(r.version.matches("61.0"));
        assert!(!r.version.matches("61.0.0"));
        assert_eq!(r.to_string(), "rdma-core/61.0");
    }

    #[test]
    fn test_parse_range() {
        let r: PackageRef = "openpmix/[>=4.2 <6]".parse().unwrap();
        assert!(r.version.matches("4.2.9"));
        assert!(r.version.matches("5.0"));
        assert!(!r.version.matches("6.0.0"));
        assert!(!r.version.matches("4.1"));
        assert_eq!(r.to_string(), "openpmix/[>=4.2 <6]");
    }

    #[test]
    fn test_parse_errors() {
        assert!("munge".parse::<PackageRef>().is_err());
        assert!("munge/".parse::<PackageRef>().is_err());
        assert!("/1.0".parse::<PackageRef>().is_err());
        assert!("munge/[>=1".parse::<PackageRef>().is_err());
        assert!("munge/[bogus]".parse::<PackageRef>().is_err());
    }

    #[test]
    fn test_lenient_versions() {
        assert_eq!(parse_lenient("61.0"), Some(Version::new(61, 0, 0)));
        assert_eq!(parse_lenient("v1.17"), Some(Version::new(1, 17, 0)));
        assert_eq!(parse_lenient("2023.09.0"), Some(Version::new(2023, 9, 0)));
        assert!(parse_lenient("main").is_none());
        assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("9.8", "9.10"), Ordering::Less);
    }
}
