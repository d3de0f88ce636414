// src/index/fragment.rs

//! Index fragment layout and (de)serialization
//!
//! Each fragment is a gzipped Marshal dump of an Array of
//! `[name, Gem::Version, platform]` triples, the format `gem` and
//! `bundler` fetch from `/specs.4.8.gz` and friends.

use super::marshal::{self, Value};
use crate::error::{Error, Result};
use crate::version::{GemVersion, PackageVersion, RUBY_PLATFORM};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fmt;
use std::io::{Read, Write};

const MARSHAL_VERSION: &str = "4.8";
const VERSION_CLASS: &str = "Gem::Version";
const PLATFORM_CLASS: &str = "Gem::Platform";

/// The named fragments that make up the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentKind {
    /// Every release version
    Release,
    /// Every prerelease version
    Prerelease,
    /// Newest release per name and platform
    Latest,
}

impl FragmentKind {
    pub const ALL: [FragmentKind; 3] = [
        FragmentKind::Release,
        FragmentKind::Prerelease,
        FragmentKind::Latest,
    ];

    /// Fragments whose union is the full version set
    pub const SOURCES: [FragmentKind; 2] = [FragmentKind::Release, FragmentKind::Prerelease];

    fn stem(&self) -> &'static str {
        match self {
            FragmentKind::Release => "specs",
            FragmentKind::Prerelease => "prerelease_specs",
            FragmentKind::Latest => "latest_specs",
        }
    }

    /// Uncompressed file name, e.g. `specs.4.8`
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.stem(), MARSHAL_VERSION)
    }

    /// Gzipped file name, e.g. `specs.4.8.gz`
    pub fn gz_file_name(&self) -> String {
        format!("{}.gz", self.file_name())
    }
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stem())
    }
}

/// Marshal dump of a version list
pub fn dump(versions: &[PackageVersion]) -> Vec<u8> {
    let triples = versions
        .iter()
        .map(|v| {
            Value::Array(vec![
                Value::string(v.name.clone()),
                Value::UserMarshal {
                    class: VERSION_CLASS.to_string(),
                    data: Box::new(Value::Array(vec![Value::string(v.version.as_str())])),
                },
                Value::string(v.platform.clone()),
            ])
        })
        .collect();
    marshal::dump(&Value::Array(triples))
}

/// Parse a Marshal dump of a version list
pub fn load(bytes: &[u8]) -> Result<Vec<PackageVersion>> {
    let value = marshal::load(bytes)?;
    let triples = value
        .as_array()
        .ok_or_else(|| Error::ParseError("Index fragment is not an array".to_string()))?;
    triples.iter().map(triple_to_version).collect()
}

/// Gzipped Marshal dump, the on-disk form of a fragment
pub fn encode(versions: &[PackageVersion]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&dump(versions))?;
    Ok(encoder.finish()?)
}

/// Inverse of [`encode`]
pub fn decode(bytes: &[u8]) -> Result<Vec<PackageVersion>> {
    let mut raw = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut raw)
        .map_err(|e| Error::ParseError(format!("Index fragment is not valid gzip: {}", e)))?;
    load(&raw)
}

fn triple_to_version(value: &Value) -> Result<PackageVersion> {
    let malformed = || Error::ParseError(format!("Malformed index entry: {:?}", value));
    let [name, version, platform] = value.as_array().ok_or_else(malformed)? else {
        return Err(malformed());
    };

    let name = name.as_str().ok_or_else(malformed)?;
    let version = match version {
        Value::UserMarshal { class, data } if class == VERSION_CLASS => data
            .as_array()
            .and_then(|fields| fields.first())
            .and_then(Value::as_str)
            .ok_or_else(malformed)?,
        // Some writers dump the bare version string
        Value::String(_) => version.as_str().ok_or_else(malformed)?,
        _ => return Err(malformed()),
    };
    let platform = platform_name(platform).ok_or_else(malformed)?;

    Ok(PackageVersion::new(name, GemVersion::parse(version)?, platform))
}

/// Platform as a string; old indexes hold `Gem::Platform` objects
fn platform_name(value: &Value) -> Option<String> {
    match value {
        Value::String(_) => value.as_str().map(str::to_string),
        Value::Nil => Some(RUBY_PLATFORM.to_string()),
        Value::Object { class, ivars } if class == PLATFORM_CLASS => {
            let parts: Vec<&str> = ["@cpu", "@os", "@version"]
                .iter()
                .filter_map(|key| {
                    ivars
                        .iter()
                        .find(|(name, _)| name == key)
                        .and_then(|(_, v)| v.as_str())
                })
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("-"))
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_names() {
        assert_eq!(FragmentKind::Release.gz_file_name(), "specs.4.8.gz");
        assert_eq!(FragmentKind::Prerelease.gz_file_name(), "prerelease_specs.4.8.gz");
        assert_eq!(FragmentKind::Latest.file_name(), "latest_specs.4.8");
    }

    #[test]
    fn test_encode_decode() {
        let versions = vec![
            PackageVersion::ruby("foo", "1.0").unwrap(),
            PackageVersion::new("bar", GemVersion::parse("2.1.0").unwrap(), "java"),
        ];
        let bytes = encode(&versions).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
        assert_eq!(decode(&bytes).unwrap(), versions);
    }

    #[test]
    fn test_empty_fragment() {
        assert_eq!(dump(&[]), b"\x04\x08[\x00");
        assert!(load(b"\x04\x08[\x00").unwrap().is_empty());
    }

    #[test]
    fn test_legacy_platform_object() {
        let triple = Value::Array(vec![
            Value::string("win32-api"),
            Value::string("1.4.8"),
            Value::Object {
                class: PLATFORM_CLASS.to_string(),
                ivars: vec![
                    ("@cpu".to_string(), Value::string("x86")),
                    ("@os".to_string(), Value::string("mingw32")),
                    ("@version".to_string(), Value::Nil),
                ],
            },
        ]);
        let bytes = marshal::dump(&Value::Array(vec![triple]));
        let versions = load(&bytes).unwrap();
        assert_eq!(versions[0].platform, "x86-mingw32");
        assert_eq!(versions[0].version.as_str(), "1.4.8");
    }

    #[test]
    fn test_rejects_malformed_entries() {
        let bytes = marshal::dump(&Value::Array(vec![Value::Array(vec![Value::string("foo")])]));
        assert!(load(&bytes).is_err());
        assert!(load(&marshal::dump(&Value::Nil)).is_err());
        assert!(decode(b"not gzip").is_err());
    }
}
