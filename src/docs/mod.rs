// src/docs/mod.rs

//! Documentation generator
//!
//! Builds a static documentation site per package the first time it is
//! requested. Each build runs in its own workspace under `<docs>/.tmp`:
//! sources are unpacked to `src/`, the site is built into `out/`, a
//! `.complete` marker is written, and `out/` is renamed into place. A doc
//! directory without the marker is never served.

mod builder;

pub use builder::{DocBuilder, YardBuilder};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::packages::GemPackage;
use crate::store::{self, PackageStore};
use crate::version::GEM_EXTENSION;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Marker written into a finished doc tree
pub const COMPLETE_MARKER: &str = ".complete";

const WORKSPACE_DIR: &str = ".tmp";
const WORKSPACE_PREFIX: &str = "gemdoc_";
const INDEX_PAGE: &str = "index.html";

/// How often the final rename is retried when another writer gets there first
const MAX_INSTALL_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocStatus {
    /// A complete doc set was already in place
    Existing,
    /// This call built and installed the doc set
    Generated,
}

pub struct DocGenerator {
    docs_dir: PathBuf,
    store: PackageStore,
    builder: Box<dyn DocBuilder>,
    claims: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DocGenerator {
    /// Generator backed by `yardoc`
    pub fn new(config: &Config, store: PackageStore) -> Result<Self> {
        let builder = YardBuilder::new(config.doc_build_timeout);
        Self::with_builder(config, store, Box::new(builder))
    }

    pub fn with_builder(config: &Config, store: PackageStore, builder: Box<dyn DocBuilder>) -> Result<Self> {
        fs::create_dir_all(&config.docs_dir)?;
        Ok(Self {
            docs_dir: config.docs_dir.clone(),
            store,
            builder,
            claims: Mutex::new(HashMap::new()),
        })
    }

    pub fn docs_dir(&self) -> &Path {
        &self.docs_dir
    }

    /// Whether a complete doc set exists for `name`
    pub fn is_complete(&self, name: &str) -> bool {
        self.docs_dir.join(name).join(COMPLETE_MARKER).is_file()
    }

    /// Build docs for `name` (an archive stem such as `foo-1.0`) unless a
    /// complete set already exists
    pub fn generate_if_missing(&self, name: &str) -> Result<DocStatus> {
        store::validate_filename(name)?;
        if self.is_complete(name) {
            return Ok(DocStatus::Existing);
        }

        let archive_name = format!("{}{}", name, GEM_EXTENSION);
        if !self.store.exists(&archive_name)? {
            return Err(Error::NotFoundError(format!("Archive {} not found", archive_name)));
        }

        let claim = self.claim(name);
        let result = self.generate_claimed(name, &archive_name, &claim);
        self.release(name, claim);
        result
    }

    fn generate_claimed(&self, name: &str, archive_name: &str, claim: &Mutex<()>) -> Result<DocStatus> {
        let _held = claim.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.is_complete(name) {
            debug!("Docs for {} were built while waiting", name);
            return Ok(DocStatus::Existing);
        }

        let archive = self.store.read(archive_name)?;

        let workspace_root = self.docs_dir.join(WORKSPACE_DIR);
        let workspace = fs::create_dir_all(&workspace_root)
            .and_then(|()| {
                tempfile::Builder::new()
                    .prefix(WORKSPACE_PREFIX)
                    .tempdir_in(&workspace_root)
            })
            .map_err(|e| {
                Error::DocGenerationError(format!(
                    "Failed to create workspace in {}: {}",
                    workspace_root.display(),
                    e
                ))
            })?;

        let source = workspace.path().join("src");
        let output = workspace.path().join("out");
        GemPackage::unpack_data(&archive, &source).map_err(|e| {
            Error::DocGenerationError(format!("Failed to extract {}: {}", archive_name, e))
        })?;
        fs::create_dir_all(&output)?;

        info!("Generating docs for {}", name);
        self.builder.build(&source, &output)?;
        fs::write(output.join(COMPLETE_MARKER), chrono::Utc::now().to_rfc3339())?;

        self.install(&output, &self.docs_dir.join(name), workspace.path())?;
        info!("Docs for {} ready", name);
        Ok(DocStatus::Generated)
    }

    /// Path of a file inside a complete doc set
    ///
    /// An empty `rest` (or one naming a directory) resolves to its
    /// `index.html`.
    pub fn resolve(&self, name: &str, rest: &str) -> Result<PathBuf> {
        store::validate_filename(name)?;
        if !self.is_complete(name) {
            return Err(Error::NotFoundError(format!("No documentation for {}", name)));
        }

        let mut path = self.docs_dir.join(name);
        for component in rest.split('/').filter(|c| !c.is_empty()) {
            if component == "." || component == ".." || component.contains(['\\', '\0']) {
                return Err(Error::ValidationError(format!("Invalid documentation path {:?}", rest)));
            }
            path.push(component);
        }
        if path.is_dir() {
            path.push(INDEX_PAGE);
        }

        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::NotFoundError(format!("{}/{} not found", name, rest)))
        }
    }

    /// Move the finished tree to `target`, displacing whatever is there
    fn install(&self, output: &Path, target: &Path, workspace: &Path) -> Result<()> {
        for attempt in 1..=MAX_INSTALL_ATTEMPTS {
            if fs::symlink_metadata(target).is_ok() {
                // Displaced trees are removed along with the workspace
                match fs::rename(target, workspace.join(format!("displaced-{}", attempt))) {
                    Ok(()) => debug!("Replaced existing docs at {}", target.display()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            match fs::rename(output, target) {
                Ok(()) => return Ok(()),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::DirectoryNotEmpty | io::ErrorKind::AlreadyExists
                    ) =>
                {
                    debug!("{} reappeared during install (attempt {})", target.display(), attempt);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::DocGenerationError(format!(
            "Could not install docs at {}",
            target.display()
        )))
    }

    /// Per-package lock so one process builds each doc set once
    fn claim(&self, name: &str) -> Arc<Mutex<()>> {
        let mut claims = self.claims.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(claims.entry(name.to_string()).or_default())
    }

    /// Drop the claim entry once no other request holds it
    fn release(&self, name: &str, claim: Arc<Mutex<()>>) {
        let mut claims = self.claims.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // One reference in the map, one here
        if Arc::strong_count(&claim) == 2 {
            claims.remove(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::gem::fixtures::{build_gem, build_gem_without_data};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Copies the sources and counts how often it ran
    struct CopyBuilder {
        calls: Arc<AtomicUsize>,
    }

    impl DocBuilder for CopyBuilder {
        fn build(&self, source: &Path, output: &Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            let readme = fs::read_to_string(source.join("README.md"))?;
            fs::write(output.join(INDEX_PAGE), format!("<h1>{}</h1>", readme.trim()))?;
            fs::create_dir_all(output.join("lib"))?;
            fs::write(output.join("lib").join(INDEX_PAGE), "lib")?;
            Ok(())
        }
    }

    struct FailingBuilder;

    impl DocBuilder for FailingBuilder {
        fn build(&self, _source: &Path, _output: &Path) -> Result<()> {
            Err(Error::DocGenerationError("boom".to_string()))
        }
    }

    fn setup(builder: Box<dyn DocBuilder>) -> (TempDir, DocGenerator) {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = Config::new(temp_dir.path().join("data"), temp_dir.path().join("docs"));
        let store = PackageStore::new(&config).unwrap();
        store.put("foo-1.0.gem", &build_gem("foo", "1.0", "ruby")).unwrap();
        let docs = DocGenerator::with_builder(&config, store, builder).unwrap();
        (temp_dir, docs)
    }

    fn counting() -> (Arc<AtomicUsize>, Box<dyn DocBuilder>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (calls.clone(), Box::new(CopyBuilder { calls }))
    }

    #[test]
    fn test_generate_then_existing() {
        let (calls, builder) = counting();
        let (_temp, docs) = setup(builder);

        assert_eq!(docs.generate_if_missing("foo-1.0").unwrap(), DocStatus::Generated);
        assert_eq!(docs.generate_if_missing("foo-1.0").unwrap(), DocStatus::Existing);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let index = docs.resolve("foo-1.0", "").unwrap();
        assert_eq!(fs::read_to_string(index).unwrap(), "<h1># foo</h1>");
    }

    #[test]
    fn test_concurrent_requests_build_once() {
        let (calls, builder) = counting();
        let (_temp, docs) = setup(builder);

        std::thread::scope(|scope| {
            for _ in 0..6 {
                scope.spawn(|| docs.generate_if_missing("foo-1.0").unwrap());
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(docs.is_complete("foo-1.0"));
    }

    #[test]
    fn test_incomplete_leftover_is_replaced() {
        let (calls, builder) = counting();
        let (_temp, docs) = setup(builder);
        let stale = docs.docs_dir().join("foo-1.0");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("partial.html"), "half").unwrap();

        assert!(docs.resolve("foo-1.0", "").is_err());
        assert_eq!(docs.generate_if_missing("foo-1.0").unwrap(), DocStatus::Generated);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!stale.join("partial.html").exists());
        assert!(docs.is_complete("foo-1.0"));
    }

    #[test]
    fn test_failed_build_leaves_nothing() {
        let (_temp, docs) = setup(Box::new(FailingBuilder));
        assert!(matches!(
            docs.generate_if_missing("foo-1.0"),
            Err(Error::DocGenerationError(_))
        ));
        assert!(!docs.docs_dir().join("foo-1.0").exists());

        let workspaces = fs::read_dir(docs.docs_dir().join(WORKSPACE_DIR)).unwrap().count();
        assert_eq!(workspaces, 0);
    }

    #[test]
    fn test_missing_archive() {
        let (_calls, builder) = counting();
        let (_temp, docs) = setup(builder);
        assert!(matches!(
            docs.generate_if_missing("nope-1.0"),
            Err(Error::NotFoundError(_))
        ));
    }

    #[test]
    fn test_archive_without_sources() {
        let (calls, builder) = counting();
        let (_temp, docs) = setup(builder);
        docs.store
            .put("bare-1.0.gem", &build_gem_without_data("bare", "1.0"))
            .unwrap();

        let err = docs.generate_if_missing("bare-1.0").unwrap_err();
        assert!(matches!(err, Error::DocGenerationError(_)));
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), 503);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!docs.docs_dir().join("bare-1.0").exists());
    }

    #[test]
    fn test_claims_are_released() {
        let (_calls, builder) = counting();
        let (_temp, docs) = setup(builder);

        for i in 0..1000 {
            let _ = docs.generate_if_missing(&format!("nope-{}", i));
        }
        assert_eq!(docs.claims.lock().unwrap().len(), 0);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| docs.generate_if_missing("foo-1.0").unwrap());
            }
        });
        assert_eq!(docs.claims.lock().unwrap().len(), 0);

        let (_temp, docs) = setup(Box::new(FailingBuilder));
        assert!(docs.generate_if_missing("foo-1.0").is_err());
        assert_eq!(docs.claims.lock().unwrap().len(), 0);
    }

    #[test]
    fn test_resolve_paths() {
        let (_calls, builder) = counting();
        let (_temp, docs) = setup(builder);
        docs.generate_if_missing("foo-1.0").unwrap();

        assert!(docs.resolve("foo-1.0", "lib").unwrap().ends_with("lib/index.html"));
        assert!(docs.resolve("foo-1.0", "index.html").is_ok());
        assert!(matches!(docs.resolve("foo-1.0", "missing.html"), Err(Error::NotFoundError(_))));
        assert!(matches!(docs.resolve("foo-1.0", "../../etc/passwd"), Err(Error::ValidationError(_))));
        assert!(matches!(docs.resolve("../foo-1.0", ""), Err(Error::ValidationError(_))));
    }
}
