// src/index/collection.rs

//! Version collection
//!
//! An ordered, de-duplicated view of the indexed versions, built by
//! merging the release and prerelease fragments.

use super::IndexManager;
use crate::error::Result;
use crate::version::PackageVersion;
use std::collections::BTreeSet;
use std::collections::btree_set;
use std::ops::BitOr;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionCollection {
    versions: BTreeSet<PackageVersion>,
}

/// Letter a gem name is grouped under in [`VersionCollection::group_index`]
pub fn group_of(name: &str) -> Option<char> {
    name.chars().next().and_then(|c| c.to_lowercase().next())
}

impl VersionCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union of the release and prerelease fragments
    ///
    /// A fragment that has never been written contributes nothing, so a
    /// fresh repository yields an empty collection.
    pub fn load(index: &IndexManager) -> Result<Self> {
        let mut collection = Self::new();
        for fragment in index.read_sources()?.into_iter().flatten() {
            collection.extend(fragment);
        }
        Ok(collection)
    }

    /// Sorted set of distinct first letters of gem names (lowercased)
    pub fn group_index(&self) -> BTreeSet<char> {
        self.versions.iter().filter_map(|v| group_of(&v.name)).collect()
    }

    /// Every version of `name`, newest first
    pub fn by_name(&self, name: &str) -> Vec<&PackageVersion> {
        self.versions.iter().rev().filter(|v| v.name == name).collect()
    }

    /// Highest version of `name` on any platform
    pub fn latest(&self, name: &str) -> Option<&PackageVersion> {
        self.versions
            .iter()
            .filter(|v| v.name == name)
            .max_by(|a, b| a.version.cmp(&b.version))
    }

    /// Distinct gem names, sorted
    pub fn names(&self) -> BTreeSet<&str> {
        self.versions.iter().map(|v| v.name.as_str()).collect()
    }

    pub fn contains(&self, version: &PackageVersion) -> bool {
        self.versions.contains(version)
    }

    pub fn insert(&mut self, version: PackageVersion) -> bool {
        self.versions.insert(version)
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn iter(&self) -> btree_set::Iter<'_, PackageVersion> {
        self.versions.iter()
    }

    /// Versions present in either collection
    pub fn union(&self, other: &VersionCollection) -> VersionCollection {
        self.versions.union(&other.versions).cloned().collect()
    }
}

impl BitOr for &VersionCollection {
    type Output = VersionCollection;

    fn bitor(self, rhs: Self) -> VersionCollection {
        self.union(rhs)
    }
}

impl FromIterator<PackageVersion> for VersionCollection {
    fn from_iter<I: IntoIterator<Item = PackageVersion>>(iter: I) -> Self {
        Self {
            versions: iter.into_iter().collect(),
        }
    }
}

impl Extend<PackageVersion> for VersionCollection {
    fn extend<I: IntoIterator<Item = PackageVersion>>(&mut self, iter: I) {
        self.versions.extend(iter);
    }
}

impl IntoIterator for VersionCollection {
    type Item = PackageVersion;
    type IntoIter = btree_set::IntoIter<PackageVersion>;

    fn into_iter(self) -> Self::IntoIter {
        self.versions.into_iter()
    }
}

impl<'a> IntoIterator for &'a VersionCollection {
    type Item = &'a PackageVersion;
    type IntoIter = btree_set::Iter<'a, PackageVersion>;

    fn into_iter(self) -> Self::IntoIter {
        self.versions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::packages::gem::fixtures::build_gem;
    use crate::store::PackageStore;
    use crate::version::GemVersion;

    fn pv(name: &str, version: &str) -> PackageVersion {
        PackageVersion::ruby(name, version).unwrap()
    }

    #[test]
    fn test_union_deduplicates() {
        let a: VersionCollection = [pv("foo", "1.0"), pv("bar", "1.0")].into_iter().collect();
        let b: VersionCollection = [pv("foo", "1.0"), pv("baz", "2.0")].into_iter().collect();

        let merged = &a | &b;
        assert_eq!(merged.len(), 3);
        assert!(merged.contains(&pv("baz", "2.0")));
    }

    #[test]
    fn test_group_index() {
        let collection: VersionCollection = [pv("rake", "13.0"), pv("Rails", "7.0"), pv("foo", "1.0")]
            .into_iter()
            .collect();
        assert_eq!(collection.group_index().into_iter().collect::<String>(), "fr");
    }

    #[test]
    fn test_group_index_folds_non_ascii() {
        let collection: VersionCollection = [pv("Émile", "1.0"), pv("éclair", "0.2"), pv("zed", "1.0")]
            .into_iter()
            .collect();
        assert_eq!(collection.group_index().into_iter().collect::<String>(), "zé");
        assert_eq!(group_of("Émile"), group_of("éclair"));
        assert_eq!(group_of(""), None);
    }

    #[test]
    fn test_latest_and_by_name() {
        let collection: VersionCollection = [
            pv("foo", "1.9"),
            pv("foo", "1.10"),
            pv("foo", "2.0.pre"),
            PackageVersion::new("foo", GemVersion::parse("1.10").unwrap(), "java"),
            pv("bar", "0.1"),
        ]
        .into_iter()
        .collect();

        let foo = collection.by_name("foo");
        assert_eq!(foo.len(), 4);
        assert_eq!(foo[0].version.as_str(), "2.0.pre");
        assert_eq!(foo[3].version.as_str(), "1.9");
        assert_eq!(collection.latest("foo").unwrap().version.as_str(), "2.0.pre");
        assert!(collection.latest("missing").is_none());
        assert_eq!(collection.names().into_iter().collect::<Vec<_>>(), vec!["bar", "foo"]);
    }

    #[test]
    fn test_load_from_index() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = Config::new(temp_dir.path().join("data"), temp_dir.path().join("docs"));
        let store = PackageStore::new(&config).unwrap();
        let index = IndexManager::new(&config, store.clone()).unwrap();

        assert!(VersionCollection::load(&index).unwrap().is_empty());

        store.put("foo-1.0.gem", &build_gem("foo", "1.0", "ruby")).unwrap();
        store.put("foo-2.0.rc1.gem", &build_gem("foo", "2.0.rc1", "ruby")).unwrap();
        index.rebuild(true).unwrap();

        let collection = VersionCollection::load(&index).unwrap();
        assert_eq!(collection.len(), 2);
        assert!(collection.contains(&pv("foo", "2.0.rc1")));
    }
}
