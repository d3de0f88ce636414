// src/config.rs

//! Repository configuration
//!
//! A single explicit value handed to every component at construction time.
//! Nothing in the crate reads process-wide settings.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default upload bound (64 MiB)
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 64 * 1024 * 1024;

/// Default documentation build timeout (2 minutes)
pub const DEFAULT_DOC_BUILD_TIMEOUT: Duration = Duration::from_secs(120);

/// Name of the archive subdirectory inside the data directory
const ARCHIVE_SUBDIR: &str = "gems";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root of the repository: holds `gems/` and the index fragments
    pub data_dir: PathBuf,
    /// Where generated documentation sites live
    pub docs_dir: PathBuf,
    /// Overwrite an existing archive instead of rejecting differing content
    pub allow_replace: bool,
    /// Patch the index on upload instead of rebuilding it
    pub incremental_updates: bool,
    /// Also write uncompressed copies of the index fragments
    pub build_legacy: bool,
    /// Largest accepted archive, in bytes
    pub max_upload_size: u64,
    /// Upper bound on a single documentation build
    pub doc_build_timeout: Duration,
}

impl Config {
    /// Create a configuration with conservative defaults
    pub fn new(data_dir: impl Into<PathBuf>, docs_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            docs_dir: docs_dir.into(),
            allow_replace: false,
            incremental_updates: false,
            build_legacy: false,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            doc_build_timeout: DEFAULT_DOC_BUILD_TIMEOUT,
        }
    }

    pub fn with_allow_replace(mut self, allow: bool) -> Self {
        self.allow_replace = allow;
        self
    }

    pub fn with_incremental_updates(mut self, enabled: bool) -> Self {
        self.incremental_updates = enabled;
        self
    }

    pub fn with_build_legacy(mut self, enabled: bool) -> Self {
        self.build_legacy = enabled;
        self
    }

    pub fn with_max_upload_size(mut self, bytes: u64) -> Self {
        self.max_upload_size = bytes;
        self
    }

    pub fn with_doc_build_timeout(mut self, timeout: Duration) -> Self {
        self.doc_build_timeout = timeout;
        self
    }

    /// Directory holding the `.gem` archives
    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join(ARCHIVE_SUBDIR)
    }

    /// Directory holding the index fragments
    pub fn index_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Reject settings no component can work with
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::ConfigError("data directory must be set".to_string()));
        }
        if self.docs_dir.as_os_str().is_empty() {
            return Err(Error::ConfigError("docs directory must be set".to_string()));
        }
        if self.max_upload_size == 0 {
            return Err(Error::ConfigError(
                "maximum upload size must be greater than zero".to_string(),
            ));
        }
        if self.doc_build_timeout.is_zero() {
            return Err(Error::ConfigError(
                "documentation build timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
