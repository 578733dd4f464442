use crate::fsutil;
use crate::hash;
use crate::manifest::{Manifest, ManifestEntry};
use crate::platform::PlatformFilter;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::SyncSender;

/// Why a file failed verification. Checked in declaration order after
/// `Valid`; the first that applies wins.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    Valid,
    Missing,
    TypeMismatch,
    HashMismatch,
    PermMismatch,
}

impl Reason {
    pub fn describe(self) -> &'static str {
        match self {
            Reason::Valid => "valid (unexpected, probably harmless)",
            Reason::Missing => "missing",
            Reason::HashMismatch => "outdated",
            Reason::TypeMismatch => "wrong file type",
            Reason::PermMismatch => "permissions",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct BadFile {
    /// Manifest-relative path.
    pub remote: String,
    pub local: PathBuf,
    pub entry: ManifestEntry,
    pub reason: Reason,
}

pub fn classify(local: &Path, entry: &ManifestEntry) -> Reason {
    let meta = match fs::symlink_metadata(local) {
        Ok(m) => m,
        Err(_) => return Reason::Missing,
    };
    if !meta.file_type().is_file() {
        return Reason::TypeMismatch;
    }
    if !hash::digest_matches(local, &entry.digest) {
        return Reason::HashMismatch;
    }
    if !fsutil::has_mode(&meta, entry.mode) {
        return Reason::PermMismatch;
    }
    Reason::Valid
}

fn check_entry(root: &Path, remote: &str, entry: &ManifestEntry, host: &PlatformFilter) -> Option<BadFile> {
    if !host.matches(&entry.platform) {
        tracing::trace!("{remote}: not targeted at this platform, skipped");
        return None;
    }
    let local = root.join(remote);
    match classify(&local, entry) {
        Reason::Valid => None,
        reason => Some(BadFile { remote: remote.to_string(), local, entry: *entry, reason }),
    }
}

/// Send every entry targeted at `host` that fails verification. Returns when
/// the manifest is exhausted or the receiver hung up; dropping `out` on
/// return is what tells the next stage there is nothing more.
pub fn verify(root: &Path, manifest: &Manifest, host: PlatformFilter, out: SyncSender<BadFile>) {
    for (remote, entry) in manifest {
        if let Some(bad) = check_entry(root, remote, entry, &host) {
            if out.send(bad).is_err() {
                break;
            }
        }
    }
}

/// Collecting variant for report-only runs.
pub fn scan(root: &Path, manifest: &Manifest, host: PlatformFilter) -> Vec<BadFile> {
    manifest.iter().filter_map(|(remote, entry)| check_entry(root, remote, entry, &host)).collect()
}
