// src/index/mod.rs

//! Index management
//!
//! Maintains the Marshal index fragments clients fetch to resolve gems.
//! A rebuild is either *full* (rescan every stored archive) or
//! *incremental* (patch the existing fragments with what changed on disk).
//! A failed incremental update falls back to exactly one full rebuild.
//!
//! Rebuild requests are single-flight: a request that arrives while a
//! rebuild is running waits for it, and is satisfied by the next rebuild
//! that starts after the request was made. Every new fragment is staged
//! in a temporary file first; the set is then swapped in under a write
//! lock, so a reader holding the read lock sees one complete generation.

pub mod collection;
pub mod fragment;
pub mod marshal;

pub use collection::VersionCollection;
pub use fragment::FragmentKind;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::packages::GemPackage;
use crate::store::PackageStore;
use crate::version::PackageVersion;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info, warn};

/// Prefix of fragments being staged; never served
const STAGING_PREFIX: &str = ".index-";

/// Prefix of the directory holding the previous generation during a swap
const BACKUP_PREFIX: &str = ".backup-";

/// What a call to [`IndexManager::rebuild`] actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// Every archive was rescanned
    Full,
    /// The existing fragments were patched
    Incremental,
    /// The incremental update failed and a full rebuild replaced it
    FellBack,
    /// Another rebuild that started after this request already covered it
    Coalesced,
}

pub struct IndexManager {
    index_dir: PathBuf,
    store: PackageStore,
    incremental: bool,
    build_legacy: bool,
    /// Readers take it shared; the fragment swap takes it exclusive
    swap: RwLock<()>,
    /// Serializes rebuilds
    rebuild_lock: Mutex<()>,
    /// Ticket of the latest rebuild request
    requested: AtomicU64,
    /// Highest ticket whose changes are reflected in the fragments
    completed: AtomicU64,
}

impl IndexManager {
    pub fn new(config: &Config, store: PackageStore) -> Result<Self> {
        let index_dir = config.index_dir().to_path_buf();
        fs::create_dir_all(&index_dir)?;

        Ok(Self {
            index_dir,
            store,
            incremental: config.incremental_updates,
            build_legacy: config.build_legacy,
            swap: RwLock::new(()),
            rebuild_lock: Mutex::new(()),
            requested: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        })
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    /// Bring the fragments up to date with the store
    ///
    /// `force` skips the incremental path even when it is enabled. A
    /// failure of the full rebuild is returned as
    /// [`Error::IndexRebuildError`].
    pub fn rebuild(&self, force: bool) -> Result<RebuildOutcome> {
        let ticket = self.requested.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = self
            .rebuild_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.completed.load(Ordering::SeqCst) >= ticket {
            debug!("Index rebuild request {} already covered", ticket);
            return Ok(RebuildOutcome::Coalesced);
        }

        // Everything requested up to here is visible to the scan below
        let started = self.requested.load(Ordering::SeqCst);

        let outcome = if force || !self.incremental {
            self.generate_index()?;
            RebuildOutcome::Full
        } else {
            match self.update_index() {
                Ok(()) => RebuildOutcome::Incremental,
                Err(e) => {
                    warn!("Incremental index update failed, rebuilding from scratch: {}", e);
                    self.generate_index()?;
                    RebuildOutcome::FellBack
                }
            }
        };

        self.completed.store(started, Ordering::SeqCst);
        info!("Index rebuild finished ({:?})", outcome);
        Ok(outcome)
    }

    /// Decode one fragment; `None` when it has never been written
    pub fn read_fragment(&self, kind: FragmentKind) -> Result<Option<Vec<PackageVersion>>> {
        let _guard = self.swap.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.read_fragment_unlocked(kind)
    }

    /// Decode both source fragments under one read lock
    pub(crate) fn read_sources(&self) -> Result<Vec<Option<Vec<PackageVersion>>>> {
        let _guard = self.swap.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        FragmentKind::SOURCES
            .iter()
            .map(|kind| self.read_fragment_unlocked(*kind))
            .collect()
    }

    fn read_fragment_unlocked(&self, kind: FragmentKind) -> Result<Option<Vec<PackageVersion>>> {
        match fs::read(self.index_dir.join(kind.gz_file_name())) {
            Ok(bytes) => fragment::decode(&bytes).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Full rebuild: parse every stored archive
    fn generate_index(&self) -> Result<()> {
        self.scan_and_write().map_err(|e| match e {
            Error::IndexRebuildError(_) => e,
            other => Error::IndexRebuildError(other.to_string()),
        })
    }

    fn scan_and_write(&self) -> Result<()> {
        let archives = self.store.list()?;
        info!("Rebuilding index from {} archives", archives.len());

        let versions: BTreeSet<PackageVersion> = archives
            .par_iter()
            .filter_map(|archive| {
                match self
                    .store
                    .read(&archive.filename)
                    .and_then(|bytes| GemPackage::parse(&bytes))
                {
                    Ok(gem) => Some(gem.to_package_version()),
                    Err(e) => {
                        warn!("Skipping {} while indexing: {}", archive.filename, e);
                        None
                    }
                }
            })
            .collect();

        self.write_fragments(&versions)
    }

    /// Incremental update: reuse the current fragments, drop what left the
    /// store and parse only archives that are not indexed yet
    fn update_index(&self) -> Result<()> {
        let mut known = BTreeSet::new();
        for (kind, versions) in FragmentKind::SOURCES.iter().zip(self.read_sources()?) {
            let versions = versions.ok_or_else(|| {
                Error::IndexRebuildError(format!("No {} to update", kind.gz_file_name()))
            })?;
            known.extend(versions);
        }

        let archives = self.store.list()?;
        let on_disk: HashSet<&str> = archives.iter().map(|a| a.filename.as_str()).collect();

        let before = known.len();
        known.retain(|v: &PackageVersion| on_disk.contains(v.file_name().as_str()));
        let removed = before - known.len();

        let indexed: HashSet<String> = known.iter().map(PackageVersion::file_name).collect();
        let mut added = 0;
        for archive in archives.iter().filter(|a| !indexed.contains(&a.filename)) {
            let bytes = self.store.read(&archive.filename)?;
            let gem = GemPackage::parse(&bytes)?;
            if known.insert(gem.to_package_version()) {
                added += 1;
            }
        }

        debug!("Incremental index update: {} added, {} removed", added, removed);
        self.write_fragments(&known)
    }

    /// Stage every fragment, then swap the whole set in
    fn write_fragments(&self, versions: &BTreeSet<PackageVersion>) -> Result<()> {
        let (prerelease, release): (Vec<PackageVersion>, Vec<PackageVersion>) =
            versions.iter().cloned().partition(PackageVersion::is_prerelease);
        let latest = latest_releases(&release);

        let mut staged = Vec::new();
        for (kind, list) in [
            (FragmentKind::Release, &release),
            (FragmentKind::Prerelease, &prerelease),
            (FragmentKind::Latest, &latest),
        ] {
            staged.push((self.stage(&fragment::encode(list)?)?, kind.gz_file_name()));
            if self.build_legacy {
                staged.push((self.stage(&fragment::dump(list))?, kind.file_name()));
            }
        }

        let _guard = self.swap.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let backup = self.back_up(staged.iter().map(|(_, name)| name.as_str()))?;
        let mut installed: Vec<String> = Vec::new();
        for (file, name) in staged {
            if let Err(e) = file.persist(self.index_dir.join(&name)) {
                self.restore(backup.path(), &installed);
                return Err(Error::IndexRebuildError(format!(
                    "Failed to install {}: {}",
                    name, e.error
                )));
            }
            installed.push(name);
        }
        if !self.build_legacy {
            for kind in FragmentKind::ALL {
                if let Err(e) = remove_if_present(&self.index_dir.join(kind.file_name())) {
                    warn!("Failed to remove stale {}: {}", kind.file_name(), e);
                }
            }
        }

        info!(
            "Wrote index: {} releases, {} prereleases, {} latest",
            release.len(),
            prerelease.len(),
            latest.len()
        );
        Ok(())
    }

    /// Hard-link the current fragments into a backup directory
    ///
    /// Must be called with the swap lock held exclusively.
    fn back_up<'a>(&self, names: impl Iterator<Item = &'a str>) -> Result<TempDir> {
        let backup = tempfile::Builder::new()
            .prefix(BACKUP_PREFIX)
            .tempdir_in(&self.index_dir)?;
        for name in names {
            let target = self.index_dir.join(name);
            match fs::symlink_metadata(&target) {
                Ok(meta) if meta.is_file() => {
                    fs::hard_link(&target, backup.path().join(name)).map_err(|e| {
                        Error::IndexRebuildError(format!("Failed to back up {}: {}", name, e))
                    })?;
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(backup)
    }

    /// Put back the fragments a failed swap already replaced
    fn restore(&self, backup: &Path, installed: &[String]) {
        for name in installed.iter().rev() {
            let target = self.index_dir.join(name);
            let saved = backup.join(name);
            let result = if saved.is_file() {
                fs::rename(&saved, &target).map_err(Error::from)
            } else {
                remove_if_present(&target)
            };
            match result {
                Ok(()) => debug!("Restored previous {}", name),
                Err(e) => warn!("Failed to restore {}: {}", name, e),
            }
        }
    }

    fn stage(&self, bytes: &[u8]) -> Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempfile_in(&self.index_dir)?;
        file.write_all(bytes)?;
        file.as_file().sync_all()?;
        Ok(file)
    }
}

/// Newest release per (name, platform), in tuple order
fn latest_releases(release: &[PackageVersion]) -> Vec<PackageVersion> {
    let mut newest: BTreeMap<(&str, &str), &PackageVersion> = BTreeMap::new();
    for version in release {
        newest
            .entry((version.name.as_str(), version.platform.as_str()))
            .and_modify(|current| {
                if version.version > current.version {
                    *current = version;
                }
            })
            .or_insert(version);
    }
    let mut latest: Vec<PackageVersion> = newest.into_values().cloned().collect();
    latest.sort();
    latest
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
