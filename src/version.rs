// src/version.rs

//! Gem versions and the (name, version, platform) tuple
//!
//! Ordering follows RubyGems: versions are split into numeric and
//! alphabetic segments, missing segments count as zero, and an alphabetic
//! segment sorts before any number (`1.0.a < 1.0`). Any alphabetic segment
//! makes the version a prerelease.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Platform string for pure-Ruby gems
pub const RUBY_PLATFORM: &str = "ruby";

/// Archive file extension
pub const GEM_EXTENSION: &str = ".gem";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Number(u64),
    Text(String),
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Segment::Number(a), Segment::Number(b)) => a.cmp(b),
            (Segment::Text(a), Segment::Text(b)) => a.cmp(b),
            (Segment::Text(_), Segment::Number(_)) => Ordering::Less,
            (Segment::Number(_), Segment::Text(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A RubyGems version string
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct GemVersion {
    raw: String,
}

impl GemVersion {
    /// Parse and validate a version string
    pub fn parse(input: &str) -> Result<Self> {
        let raw = input.trim();
        let valid = raw.starts_with(|c: char| c.is_ascii_digit())
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
            && !raw.split(['.', '-']).any(str::is_empty);
        if !valid {
            return Err(Error::ParseError(format!("Malformed version number: {:?}", input)));
        }

        let version = Self { raw: raw.to_string() };
        // Reject numbers that would overflow before they reach an ordering
        for chunk in version.chunks() {
            if chunk.starts_with(|c: char| c.is_ascii_digit()) && chunk.parse::<u64>().is_err() {
                return Err(Error::ParseError(format!("Version segment too large: {}", chunk)));
            }
        }
        Ok(version)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// A version with any letter in it is a prerelease
    pub fn is_prerelease(&self) -> bool {
        self.raw.chars().any(|c| c.is_ascii_alphabetic())
    }

    /// Runs of digits or letters, in order
    fn chunks(&self) -> impl Iterator<Item = &str> {
        let bytes = self.raw.as_bytes();
        let mut start = 0;
        std::iter::from_fn(move || {
            while start < bytes.len() && !bytes[start].is_ascii_alphanumeric() {
                start += 1;
            }
            if start >= bytes.len() {
                return None;
            }
            let digit = bytes[start].is_ascii_digit();
            let mut end = start;
            while end < bytes.len()
                && bytes[end].is_ascii_alphanumeric()
                && bytes[end].is_ascii_digit() == digit
            {
                end += 1;
            }
            let chunk = &self.raw[start..end];
            start = end;
            Some(chunk)
        })
    }

    fn segments(&self) -> Vec<Segment> {
        self.chunks()
            .map(|chunk| match chunk.parse::<u64>() {
                Ok(n) => Segment::Number(n),
                Err(_) => Segment::Text(chunk.to_string()),
            })
            .collect()
    }
}

impl Ord for GemVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.segments();
        let rhs = other.segments();
        let zero = Segment::Number(0);
        for i in 0..lhs.len().max(rhs.len()) {
            let a = lhs.get(i).unwrap_or(&zero);
            let b = rhs.get(i).unwrap_or(&zero);
            match a.cmp(b) {
                Ordering::Equal => continue,
                ordering => return ordering,
            }
        }
        // "1.0" and "1.0.0" rank the same but are distinct versions
        self.raw.cmp(&other.raw)
    }
}

impl PartialOrd for GemVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for GemVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for GemVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for GemVersion {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<GemVersion> for String {
    fn from(version: GemVersion) -> Self {
        version.raw
    }
}

/// One indexed gem: ordered by name, then version, then platform
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageVersion {
    pub name: String,
    pub version: GemVersion,
    pub platform: String,
}

impl PackageVersion {
    pub fn new(name: impl Into<String>, version: GemVersion, platform: impl Into<String>) -> Self {
        let platform = platform.into();
        Self {
            name: name.into(),
            version,
            platform: if platform.is_empty() {
                RUBY_PLATFORM.to_string()
            } else {
                platform
            },
        }
    }

    /// Convenience constructor for pure-Ruby gems
    pub fn ruby(name: impl Into<String>, version: &str) -> Result<Self> {
        Ok(Self::new(name, GemVersion::parse(version)?, RUBY_PLATFORM))
    }

    /// `name-version` or `name-version-platform`
    pub fn full_name(&self) -> String {
        if self.platform == RUBY_PLATFORM {
            format!("{}-{}", self.name, self.version)
        } else {
            format!("{}-{}-{}", self.name, self.version, self.platform)
        }
    }

    /// Archive filename this version is stored under
    pub fn file_name(&self) -> String {
        format!("{}{}", self.full_name(), GEM_EXTENSION)
    }

    pub fn is_prerelease(&self) -> bool {
        self.version.is_prerelease()
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.version)?;
        if self.platform != RUBY_PLATFORM {
            write!(f, " [{}]", self.platform)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> GemVersion {
        GemVersion::parse(s).unwrap()
    }

    #[test]
    fn test_numeric_ordering() {
        assert!(v("1.0") < v("1.1"));
        assert!(v("1.9") < v("1.10"));
        assert!(v("2.0.0") > v("1.99.99"));
        assert!(v("1.0") < v("1.0.1"));
    }

    #[test]
    fn test_prerelease_sorts_before_release() {
        assert!(v("1.0.a") < v("1.0"));
        assert!(v("1.0.beta") < v("1.0.rc1"));
        assert!(v("1.0.rc1") < v("1.0.0"));
        assert!(v("2.0.0.pre") > v("1.9"));
    }

    #[test]
    fn test_trailing_zeros_rank_equal_but_stay_distinct() {
        assert_ne!(v("1.0"), v("1.0.0"));
        assert!(v("1.0") < v("1.0.0"));
        assert!(v("1.0.0") < v("1.0.1"));
        assert!(v("1.0.0") < v("1.1"));
    }

    #[test]
    fn test_prerelease_detection() {
        assert!(v("1.0.0.pre").is_prerelease());
        assert!(v("3.0.0-rc1").is_prerelease());
        assert!(!v("1.2.3").is_prerelease());
    }

    #[test]
    fn test_malformed_versions() {
        assert!(GemVersion::parse("").is_err());
        assert!(GemVersion::parse("abc").is_err());
        assert!(GemVersion::parse("1..0").is_err());
        assert!(GemVersion::parse("1.0 beta").is_err());
        assert!(GemVersion::parse("1.99999999999999999999999").is_err());
    }

    #[test]
    fn test_file_name() {
        let pure = PackageVersion::ruby("foo", "1.0").unwrap();
        assert_eq!(pure.file_name(), "foo-1.0.gem");

        let native = PackageVersion::new("nokogiri", v("1.15.4"), "x86_64-linux");
        assert_eq!(native.file_name(), "nokogiri-1.15.4-x86_64-linux.gem");
        assert_eq!(native.to_string(), "nokogiri (1.15.4) [x86_64-linux]");
    }

    #[test]
    fn test_empty_platform_defaults_to_ruby() {
        let version = PackageVersion::new("foo", v("1.0"), "");
        assert_eq!(version.platform, RUBY_PLATFORM);
    }

    #[test]
    fn test_tuple_ordering() {
        let mut versions = vec![
            PackageVersion::ruby("rake", "13.0").unwrap(),
            PackageVersion::ruby("foo", "1.10").unwrap(),
            PackageVersion::ruby("foo", "1.9").unwrap(),
        ];
        versions.sort();
        let names: Vec<_> = versions.iter().map(|p| p.full_name()).collect();
        assert_eq!(names, vec!["foo-1.9", "foo-1.10", "rake-13.0"]);
    }

    #[test]
    fn test_serde_as_string() {
        let version = PackageVersion::ruby("foo", "1.0").unwrap();
        let json = serde_json::to_string(&version).unwrap();
        assert_eq!(json, r#"{"name":"foo","version":"1.0","platform":"ruby"}"#);
        let back: PackageVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, version);
    }
}
