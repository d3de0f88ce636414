// src/repository/mod.rs

//! Repository service
//!
//! The entry point a web front end or the CLI calls into. It ties the
//! package store, the index and the doc generator together:
//! - Uploads are validated, stored, then followed by an index refresh
//! - Deletes are followed by a full rebuild
//! - Listings are answered from the index fragments
//! - Docs are generated on first request

use crate::config::Config;
use crate::docs::{DocBuilder, DocGenerator, DocStatus};
use crate::error::{Error, Result};
use crate::index::{IndexManager, RebuildOutcome, VersionCollection};
use crate::packages::GemPackage;
use crate::store::{ArchiveInfo, PackageStore, PutOutcome};
use crate::version::{GEM_EXTENSION, PackageVersion};
use std::path::PathBuf;
use tracing::{info, warn};

/// What an accepted upload did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Name the archive is stored under
    pub filename: String,
    /// Version read from the archive's gemspec
    pub version: PackageVersion,
    pub outcome: PutOutcome,
    /// `None` when the upload was a duplicate and the index was left alone
    pub rebuild: Option<RebuildOutcome>,
}

pub struct Repository {
    config: Config,
    store: PackageStore,
    index: IndexManager,
    docs: DocGenerator,
}

impl Repository {
    /// Open (or initialize) the repository described by `config`
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let store = PackageStore::new(&config)?;
        let docs = DocGenerator::new(&config, store.clone())?;
        Self::assemble(config, store, docs)
    }

    /// Like [`Repository::open`], with a custom documentation builder
    pub fn with_doc_builder(config: Config, builder: Box<dyn DocBuilder>) -> Result<Self> {
        config.validate()?;
        let store = PackageStore::new(&config)?;
        let docs = DocGenerator::with_builder(&config, store.clone(), builder)?;
        Self::assemble(config, store, docs)
    }

    fn assemble(config: Config, store: PackageStore, docs: DocGenerator) -> Result<Self> {
        let index = IndexManager::new(&config, store.clone())?;
        info!(
            "Opened repository at {} (incremental: {}, legacy: {})",
            config.data_dir.display(),
            config.incremental_updates,
            config.build_legacy
        );
        Ok(Self {
            config,
            store,
            index,
            docs,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &PackageStore {
        &self.store
    }

    pub fn index(&self) -> &IndexManager {
        &self.index
    }

    pub fn doc_generator(&self) -> &DocGenerator {
        &self.docs
    }

    /// Accept an uploaded archive
    ///
    /// Only the last path component of `filename` is used. The archive is
    /// parsed before it is stored, so unreadable gems never reach the store.
    /// If the write succeeds but the index refresh fails, the error is
    /// [`Error::IndexRefreshFailed`].
    pub fn upload(&self, filename: &str, content: &[u8]) -> Result<UploadReceipt> {
        let filename = basename(filename);
        if filename.is_empty() {
            return Err(Error::ValidationError("No file selected".to_string()));
        }
        if content.is_empty() {
            return Err(Error::ValidationError(format!("{} is empty", filename)));
        }
        if !filename.ends_with(GEM_EXTENSION) {
            return Err(Error::ValidationError(format!(
                "{} is not a {} archive",
                filename, GEM_EXTENSION
            )));
        }
        if content.len() as u64 > self.config.max_upload_size {
            return Err(Error::ValidationError(format!(
                "{} exceeds the {} byte upload limit",
                filename, self.config.max_upload_size
            )));
        }

        let gem = GemPackage::parse(content)
            .map_err(|e| Error::ValidationError(format!("Cannot process {}: {}", filename, e)))?;
        let version = gem.to_package_version();
        if version.file_name() != filename {
            warn!("Upload {} contains {}", filename, version.file_name());
        }

        let outcome = self.store.put(filename, content)?;
        let rebuild = match outcome {
            PutOutcome::Stored => Some(self.refresh_index(filename, false)?),
            PutOutcome::Replaced => Some(self.refresh_index(filename, true)?),
            PutOutcome::Duplicate => None,
        };

        info!("Accepted {} as {} ({:?})", filename, version, outcome);
        Ok(UploadReceipt {
            filename: filename.to_string(),
            version,
            outcome,
            rebuild,
        })
    }

    /// Remove an archive and rebuild the index; returns whether it existed
    pub fn delete(&self, filename: &str) -> Result<bool> {
        let removed = self.store.delete(filename)?;
        self.refresh_index(filename, true)?;
        Ok(removed)
    }

    pub fn reindex(&self, force: bool) -> Result<RebuildOutcome> {
        self.index.rebuild(force)
    }

    /// Every indexed version
    pub fn versions(&self) -> Result<VersionCollection> {
        VersionCollection::load(&self.index)
    }

    /// Gemspec details of an indexed version, read from its archive
    ///
    /// The archive is looked up by the version's canonical filename.
    pub fn spec_for(&self, version: &PackageVersion) -> Result<GemPackage> {
        let archive = self.store.read(&version.file_name())?;
        GemPackage::parse(&archive)
    }

    /// Stored archives, straight from the store
    pub fn archives(&self) -> Result<Vec<ArchiveInfo>> {
        self.store.list()
    }

    /// Make sure docs exist for `name` (an archive stem such as `foo-1.0`)
    pub fn docs(&self, name: &str) -> Result<DocStatus> {
        self.docs.generate_if_missing(name)
    }

    /// A file from the docs of `name`, generating them first if needed
    pub fn doc_file(&self, name: &str, rest: &str) -> Result<PathBuf> {
        self.docs.generate_if_missing(name)?;
        self.docs.resolve(name, rest)
    }

    fn refresh_index(&self, filename: &str, force: bool) -> Result<RebuildOutcome> {
        self.index
            .rebuild(force)
            .map_err(|e| Error::IndexRefreshFailed {
                filename: filename.to_string(),
                source: Box::new(e),
            })
    }
}

/// Last component of a client-supplied path, whichever separator it uses
fn basename(filename: &str) -> &str {
    filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim()
}
