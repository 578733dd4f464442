use crate::error::ResolveError;
use crate::fsutil;
use crate::manifest::Manifest;
use crate::path_safety::{validate_path, PathPolicy};
use crate::platform::PlatformFilter;
use crate::retrieve::Retriever;
use crate::verify::{self, BadFile, Reason};
use std::fmt;
use std::path::Path;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread;

#[derive(Clone, Copy, Debug)]
pub struct RepairOptions {
    /// Platform that decides which entries are checked at all.
    pub host: PlatformFilter,
    pub path_policy: PathPolicy,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self { host: PlatformFilter::host(), path_policy: PathPolicy::default() }
    }
}

#[derive(Debug, Default)]
pub struct UpdateReport {
    /// Files that failed verification, whether or not the repair worked.
    pub needed_repair: usize,
    /// One per failed resolution, in the order they happened.
    pub errors: Vec<ResolveError>,
}

impl UpdateReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for UpdateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.needed_repair, self.errors.len()) {
            (0, 0) => write!(f, "up to date"),
            (n, 0) => write!(f, "repaired {n} file(s)"),
            (n, e) => write!(f, "{n} file(s) needed repair; repaired with {e} unresolved error(s)"),
        }
    }
}

/// Log each bad file, count it and pass it on unchanged. Returns the count
/// once the input closes.
pub fn report(input: Receiver<BadFile>, out: SyncSender<BadFile>) -> usize {
    let mut count = 0usize;
    for bad in input {
        tracing::info!("{:<40} {}", bad.remote, bad.reason);
        count += 1;
        if out.send(bad).is_err() {
            break;
        }
    }
    count
}

pub fn resolve(root: &Path, bad: &BadFile, get: &dyn Retriever) -> Result<(), ResolveError> {
    resolve_with_policy(root, bad, get, PathPolicy::default())
}

/// Repair one file under `root`. The path is rebuilt from `root` and the
/// manifest name rather than taken from `bad.local`, so a tree can be
/// checked in one place and repaired in another.
pub fn resolve_with_policy(
    root: &Path,
    bad: &BadFile,
    get: &dyn Retriever,
    policy: PathPolicy,
) -> Result<(), ResolveError> {
    let safe = || {
        validate_path(root, &bad.remote, policy)
            .map_err(|source| ResolveError::UnsafePath { path: bad.remote.clone(), source })
    };
    match bad.reason {
        Reason::Missing | Reason::HashMismatch => {
            let local = safe()?;
            let mut content = get
                .fetch(&bad.remote)
                .map_err(|source| ResolveError::Fetch { path: bad.remote.clone(), source })?;
            let n = fsutil::write_replace(&local, bad.entry.mode, &mut content)
                .map_err(|source| ResolveError::Write { path: local.clone(), source })?;
            tracing::debug!("{}: wrote {n} bytes", bad.remote);
            Ok(())
        }
        // never delete a directory or special file to make room
        Reason::TypeMismatch => Err(ResolveError::ExistingSpecial { path: root.join(&bad.remote) }),
        Reason::PermMismatch => {
            let local = safe()?;
            fsutil::set_mode(&local, bad.entry.mode)
                .map_err(|source| ResolveError::Chmod { path: local.clone(), source })
        }
        Reason::Valid => Ok(()),
    }
}

/// Resolve everything from `input`, forwarding failures to `errs` and
/// carrying on with the next file.
pub fn apply(
    root: &Path,
    get: &dyn Retriever,
    policy: PathPolicy,
    input: Receiver<BadFile>,
    errs: SyncSender<ResolveError>,
) {
    for bad in input {
        match resolve_with_policy(root, &bad, get, policy) {
            Ok(()) => tracing::info!("{:<40} fixed", bad.remote),
            Err(e) => {
                if errs.send(e).is_err() {
                    break;
                }
            }
        }
    }
}

pub fn run(root: &Path, manifest: &Manifest, get: &dyn Retriever) -> UpdateReport {
    run_with(root, manifest, get, &RepairOptions::default())
}

/// Verify `root` against `manifest` and repair what is wrong.
///
/// Verifier, reporter and resolver each run on their own thread, joined by
/// rendezvous channels so hashing never gets ahead of repair. Errors are
/// drained here; the error channel closes only after the resolver has seen
/// the last record, so the returned report is complete.
pub fn run_with(root: &Path, manifest: &Manifest, get: &dyn Retriever, opts: &RepairOptions) -> UpdateReport {
    let host = opts.host;
    let policy = opts.path_policy;
    thread::scope(|s| {
        let (bad_tx, bad_rx) = sync_channel::<BadFile>(0);
        let (fwd_tx, fwd_rx) = sync_channel::<BadFile>(0);
        let (err_tx, err_rx) = sync_channel::<ResolveError>(0);

        s.spawn(move || verify::verify(root, manifest, host, bad_tx));
        let reporter = s.spawn(move || report(bad_rx, fwd_tx));
        s.spawn(move || apply(root, get, policy, fwd_rx, err_tx));

        let mut errors = Vec::new();
        for err in err_rx {
            tracing::warn!("{err}");
            errors.push(err);
        }
        let needed_repair = reporter.join().unwrap_or_else(|p| std::panic::resume_unwind(p));
        UpdateReport { needed_repair, errors }
    })
}
