use crate::hash::Digest;
use crate::platform::PlatformFilter;
use serde::Serialize;
use std::collections::btree_map::{self, BTreeMap};

/// One file the manifest expects to exist.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub platform: PlatformFilter,
    /// Permission bits that must all be present on disk; extra bits are fine.
    pub mode: u32,
    pub digest: Digest,
}

/// Relative posix path -> expected file. Keys are unique; iteration is
/// sorted by path so encoding the same set always yields the same bytes.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry previously stored under `path`, if any.
    pub fn insert(&mut self, path: impl Into<String>, entry: ManifestEntry) -> Option<ManifestEntry> {
        self.entries.insert(path.into(), entry)
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, ManifestEntry> {
        self.entries.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = (&'a String, &'a ManifestEntry);
    type IntoIter = btree_map::Iter<'a, String, ManifestEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl FromIterator<(String, ManifestEntry)> for Manifest {
    fn from_iter<I: IntoIterator<Item = (String, ManifestEntry)>>(iter: I) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}
