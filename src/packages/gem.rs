// src/packages/gem.rs

//! Gem archive reader
//!
//! Reads the gemspec out of `metadata.gz` and unpacks `data.tar.gz`. The
//! gemspec is YAML with Ruby object tags; it is loaded with `serde_yaml`
//! and only the handful of top-level fields the repository needs are read.

use crate::error::{Error, Result};
use crate::version::{GemVersion, PackageVersion, RUBY_PLATFORM};
use flate2::read::GzDecoder;
use serde::Serialize;
use serde_yaml::Value;
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use tar::Archive;
use tracing::debug;

const METADATA_ENTRY: &str = "metadata.gz";
const DATA_ENTRY: &str = "data.tar.gz";

/// Gem metadata read from an archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GemPackage {
    name: String,
    version: GemVersion,
    platform: String,
    summary: Option<String>,
    authors: Vec<String>,
    date: Option<String>,
}

impl GemPackage {
    /// Parse the gemspec of an in-memory archive
    pub fn parse(archive: &[u8]) -> Result<Self> {
        let compressed = read_entry(archive, METADATA_ENTRY)?
            .ok_or_else(|| Error::ParseError(format!("Archive has no {}", METADATA_ENTRY)))?;

        let mut yaml = String::new();
        GzDecoder::new(&compressed[..])
            .read_to_string(&mut yaml)
            .map_err(|e| Error::ParseError(format!("Failed to decompress {}: {}", METADATA_ENTRY, e)))?;

        Self::parse_metadata(&yaml)
    }

    /// Unpack the archive's `data.tar.gz` into `dest`
    ///
    /// Entries that would land outside `dest` are skipped by `tar`.
    pub fn unpack_data(archive: &[u8], dest: &Path) -> Result<()> {
        let compressed = read_entry(archive, DATA_ENTRY)?
            .ok_or_else(|| Error::ParseError(format!("Archive has no {}", DATA_ENTRY)))?;

        fs::create_dir_all(dest)?;
        Archive::new(GzDecoder::new(&compressed[..]))
            .unpack(dest)
            .map_err(|e| Error::ParseError(format!("Failed to unpack {}: {}", DATA_ENTRY, e)))?;

        debug!("Unpacked gem sources into {}", dest.display());
        Ok(())
    }

    /// Read the fields the repository needs from a `Gem::Specification` dump
    fn parse_metadata(yaml: &str) -> Result<Self> {
        let document: Value = serde_yaml::from_str(yaml)
            .map_err(|e| Error::ParseError(format!("Invalid gemspec YAML: {}", e)))?;
        let spec = untag(&document);
        if !spec.is_mapping() {
            return Err(Error::ParseError("Gemspec is not a mapping".to_string()));
        }

        let name = spec
            .get("name")
            .and_then(scalar)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::ParseError("Gemspec has no name".to_string()))?;

        // `Gem::Version` is dumped as an object holding a `version` string
        let version = spec
            .get("version")
            .map(untag)
            .and_then(|v| match v.get("version") {
                Some(inner) => scalar(inner),
                None => scalar(v),
            })
            .ok_or_else(|| Error::ParseError(format!("Gemspec for {} has no version", name)))?;
        let version = GemVersion::parse(&version)?;

        let platform = spec
            .get("platform")
            .and_then(scalar)
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| RUBY_PLATFORM.to_string());

        let authors = match spec.get("authors").map(untag) {
            Some(Value::Sequence(items)) => items.iter().filter_map(scalar).collect(),
            Some(single) => scalar(single).into_iter().collect(),
            None => Vec::new(),
        };

        Ok(Self {
            name,
            version,
            platform,
            summary: spec.get("summary").and_then(scalar).filter(|s| !s.is_empty()),
            authors,
            date: spec.get("date").and_then(scalar),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &GemVersion {
        &self.version
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn authors(&self) -> &[String] {
        &self.authors
    }

    pub fn date(&self) -> Option<&str> {
        self.date.as_deref()
    }

    /// The tuple this gem contributes to the index
    pub fn to_package_version(&self) -> PackageVersion {
        PackageVersion::new(self.name.clone(), self.version.clone(), self.platform.clone())
    }
}

/// Read one named entry of the outer (uncompressed) gem tar
fn read_entry(archive: &[u8], wanted: &str) -> Result<Option<Vec<u8>>> {
    let mut outer = Archive::new(Cursor::new(archive));
    let entries = outer
        .entries()
        .map_err(|e| Error::ParseError(format!("Not a gem archive: {}", e)))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| Error::ParseError(format!("Corrupt gem archive: {}", e)))?;
        let is_wanted = entry
            .path()
            .map(|p| p.as_os_str() == wanted)
            .unwrap_or(false);
        if is_wanted {
            let mut buffer = Vec::new();
            entry
                .read_to_end(&mut buffer)
                .map_err(|e| Error::ParseError(format!("Failed to read {}: {}", wanted, e)))?;
            return Ok(Some(buffer));
        }
    }
    Ok(None)
}

/// Look through Ruby object tags such as `!ruby/object:Gem::Version`
fn untag(value: &Value) -> &Value {
    match value {
        Value::Tagged(tagged) => untag(&tagged.value),
        other => other,
    }
}

/// A scalar as text; YAML may resolve `1.0` or `true` to non-strings
fn scalar(value: &Value) -> Option<String> {
    match untag(value) {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    pub(crate) fn gemspec(name: &str, version: &str, platform: &str) -> String {
        format!(
            "--- !ruby/object:Gem::Specification\n\
             name: {name}\n\
             version: !ruby/object:Gem::Version\n  version: '{version}'\n\
             platform: {platform}\n\
             authors:\n- Test Author\n\
             date: 2024-01-01 00:00:00.000000000 Z\n\
             summary: The {name} gem\n"
        )
    }

    /// Build a minimal but well-formed `.gem`
    pub(crate) fn build_gem(name: &str, version: &str, platform: &str) -> Vec<u8> {
        let metadata = gzip(gemspec(name, version, platform).as_bytes());
        let readme = format!("# {}\n", name);
        let source = format!("module {}\nend\n", name);
        let lib_path = format!("lib/{}.rb", name);
        let data = gzip(&tar(&[
            ("README.md", readme.as_bytes()),
            (lib_path.as_str(), source.as_bytes()),
        ]));
        tar(&[("metadata.gz", metadata.as_slice()), ("data.tar.gz", data.as_slice())])
    }

    /// A `.gem` whose outer tar carries only the gemspec
    pub(crate) fn build_gem_without_data(name: &str, version: &str) -> Vec<u8> {
        let metadata = gzip(gemspec(name, version, "ruby").as_bytes());
        tar(&[("metadata.gz", metadata.as_slice())])
    }
}
