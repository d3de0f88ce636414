// src/store/mod.rs

//! Package store
//!
//! Owns the `.gem` archives, keyed by filename. Every write goes to a
//! temporary file in the archive directory first and is then moved into
//! place, so readers never observe a partial archive. When replacement is
//! disallowed the move is a no-clobber link, which also settles races
//! between two uploads of the same filename.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::version::GEM_EXTENSION;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Prefix of in-flight upload files; never listed as archives
const STAGING_PREFIX: &str = ".upload-";

/// How often a no-clobber write is retried when the occupant vanishes
const MAX_PUT_ATTEMPTS: usize = 3;

/// Result of a successful [`PackageStore::put`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// No archive existed under this filename
    Stored,
    /// An archive existed and replacement is allowed
    Replaced,
    /// The identical bytes were already stored
    Duplicate,
}

/// A stored archive as seen by a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveInfo {
    pub filename: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PackageStore {
    root: PathBuf,
    allow_replace: bool,
    max_size: u64,
}

impl PackageStore {
    /// Open the archive directory, creating it if needed
    pub fn new(config: &Config) -> Result<Self> {
        let root = config.archive_dir();
        fs::create_dir_all(&root).map_err(|e| storage_error(&root, e))?;
        debug!("Package store at {}", root.display());

        Ok(Self {
            root,
            allow_replace: config.allow_replace,
            max_size: config.max_upload_size,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store `content` under `filename`
    ///
    /// With replacement disallowed, an existing archive with the same
    /// SHA-256 yields [`PutOutcome::Duplicate`] and a differing one fails
    /// with [`Error::ConflictError`], leaving the stored bytes untouched.
    pub fn put(&self, filename: &str, content: &[u8]) -> Result<PutOutcome> {
        validate_filename(filename)?;
        if content.len() as u64 > self.max_size {
            return Err(Error::ValidationError(format!(
                "{} is {} bytes, larger than the {} byte limit",
                filename,
                content.len(),
                self.max_size
            )));
        }

        let target = self.root.join(filename);
        let staged = self.stage(content)?;

        if self.allow_replace {
            let existed = target.exists();
            staged
                .persist(&target)
                .map_err(|e| storage_error(&self.root, e.error))?;
            let outcome = if existed { PutOutcome::Replaced } else { PutOutcome::Stored };
            info!("Stored {} ({} bytes, {:?})", filename, content.len(), outcome);
            return Ok(outcome);
        }

        let mut staged = staged;
        for attempt in 1..=MAX_PUT_ATTEMPTS {
            match staged.persist_noclobber(&target) {
                Ok(_) => {
                    info!("Stored {} ({} bytes)", filename, content.len());
                    return Ok(PutOutcome::Stored);
                }
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    match fs::read(&target) {
                        Ok(existing) => return Self::compare_existing(filename, &existing, content),
                        // Deleted between the link attempt and the read: try again
                        Err(err) if err.kind() == io::ErrorKind::NotFound => {
                            debug!("{} vanished during upload (attempt {}), retrying", filename, attempt);
                            staged = e.file;
                        }
                        Err(err) => return Err(storage_error(&self.root, err)),
                    }
                }
                Err(e) => return Err(storage_error(&self.root, e.error)),
            }
        }

        Err(Error::StorageError(format!(
            "Gave up storing {} after {} attempts",
            filename, MAX_PUT_ATTEMPTS
        )))
    }

    /// Remove an archive; returns whether one was present
    pub fn delete(&self, filename: &str) -> Result<bool> {
        validate_filename(filename)?;
        match fs::remove_file(self.root.join(filename)) {
            Ok(()) => {
                info!("Deleted {}", filename);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Delete of absent archive {} ignored", filename);
                Ok(false)
            }
            Err(e) => Err(storage_error(&self.root, e)),
        }
    }

    /// Read an archive's bytes
    pub fn read(&self, filename: &str) -> Result<Vec<u8>> {
        validate_filename(filename)?;
        fs::read(self.root.join(filename)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFoundError(format!("Archive {} not found", filename)),
            _ => storage_error(&self.root, e),
        })
    }

    pub fn exists(&self, filename: &str) -> Result<bool> {
        validate_filename(filename)?;
        Ok(self.root.join(filename).is_file())
    }

    /// All stored archives, sorted by filename
    ///
    /// In-flight uploads and other hidden files are skipped.
    pub fn list(&self) -> Result<Vec<ArchiveInfo>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_error(&self.root, e)),
        };

        let mut archives = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
                warn!("Skipping non UTF-8 filename in {}", self.root.display());
                continue;
            };
            if filename.starts_with('.') || !filename.ends_with(GEM_EXTENSION) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                // Deleted while listing
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let modified = metadata.modified().map(DateTime::<Utc>::from)?;
            archives.push(ArchiveInfo {
                filename,
                size: metadata.len(),
                modified,
            });
        }

        archives.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(archives)
    }

    /// Write `content` to a fresh temporary file beside the archives
    fn stage(&self, content: &[u8]) -> Result<NamedTempFile> {
        let mut staged = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(".tmp")
            .tempfile_in(&self.root)
            .map_err(|e| storage_error(&self.root, e))?;
        staged
            .write_all(content)
            .map_err(|e| storage_error(&self.root, e))?;
        staged
            .as_file()
            .sync_all()
            .map_err(|e| storage_error(&self.root, e))?;
        Ok(staged)
    }

    fn compare_existing(filename: &str, existing: &[u8], incoming: &[u8]) -> Result<PutOutcome> {
        if content_hash(existing) == content_hash(incoming) {
            info!("Ignoring upload of {}: identical archive already stored", filename);
            Ok(PutOutcome::Duplicate)
        } else {
            Err(Error::ConflictError(format!(
                "{} already exists with different content; delete the existing version first",
                filename
            )))
        }
    }
}

/// SHA-256 of `bytes` as lowercase hex
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Check that `filename` names a single entry inside the store
pub fn validate_filename(filename: &str) -> Result<()> {
    let invalid = |reason: &str| Err(Error::ValidationError(format!("Invalid filename {:?}: {}", filename, reason)));

    if filename.is_empty() {
        return invalid("empty");
    }
    if filename.contains(['/', '\\', '\0']) {
        return invalid("must not contain path separators or NUL");
    }
    if filename.starts_with('.') {
        return invalid("must not start with a dot");
    }
    Ok(())
}

/// Map an I/O failure on the store into something a user can act on
fn storage_error(root: &Path, e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => Error::StorageError(format!(
            "Please ensure {} is writable by the gemvault server",
            root.display()
        )),
        io::ErrorKind::NotFound => {
            Error::StorageError(format!("Archive directory {} does not exist", root.display()))
        }
        _ => Error::Io(e),
    }
}
