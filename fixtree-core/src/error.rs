use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("invalid or redundant pattern {token:?}")]
    InvalidPattern { token: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("empty path")]
    Empty,
    #[error("absolute paths are not allowed: {0:?}")]
    Absolute(String),
    #[error("parent traversal not allowed: {0:?}")]
    ParentTraversal(String),
    #[error("symlink in path (not following): {0:?}")]
    Symlink(PathBuf),
    #[error("path escapes root: {0:?}")]
    EscapesRoot(PathBuf),
}

/// Failures decoding or encoding a manifest stream. Any of these makes the
/// whole stream unusable.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("bad magic number for manifest: {found:02x?}")]
    BadMagic { found: [u8; 8] },
    #[error("mismatched manifest format version {found} (expected {expected})")]
    BadVersion { found: u16, expected: u16 },
    #[error("manifest truncated inside {what}")]
    Truncated { what: &'static str },
    #[error("entry {name:?} declares a {declared}-byte info block, need at least {expected}")]
    InfoTooShort { name: String, declared: u16, expected: u16 },
    #[error("entry name is not valid UTF-8")]
    InvalidName,
    #[error("entry name {name:?} is longer than {max} bytes")]
    NameTooLong { name: String, max: usize },
    #[error("unsafe entry name: {0}")]
    UnsafePath(#[from] PathError),
    #[error("manifest I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("refusing to fetch: {0}")]
    UnsafePath(#[from] PathError),
    #[error("read error for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Per-file repair failures. These are collected, never fatal to a run.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{path}: fetch failed: {source}")]
    Fetch {
        path: String,
        #[source]
        source: FetchError,
    },
    #[error("{}: write failed: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: chmod failed: {source}", path.display())]
    Chmod {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: won't replace a non-file with a file", path.display())]
    ExistingSpecial { path: PathBuf },
    #[error("{path}: {source}")]
    UnsafePath {
        path: String,
        #[source]
        source: PathError,
    },
}
