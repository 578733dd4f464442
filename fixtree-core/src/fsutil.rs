use std::fs::{self, File, Metadata};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Where an unreplaceable file is moved before retrying.
pub fn trash_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".trash");
    PathBuf::from(name)
}

/// Write `content` to `path` with `mode`, replacing whatever regular file is
/// there. Parent directories are created as needed. The content lands in a
/// temporary sibling first and is renamed over the target, so readers never
/// see a half-written file. If the rename is refused (a busy executable on
/// Windows, for one) the old file is moved to `<path>.trash` and the rename
/// is retried once; if that fails too the old file is put back.
pub fn write_replace<R: Read + ?Sized>(path: &Path, mode: u32, content: &mut R) -> io::Result<u64> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::Builder::new().prefix(".fixtree-").suffix(".part").tempfile_in(parent)?;
    let written = io::copy(content, &mut tmp)?;
    tmp.as_file().sync_all()?;
    set_file_mode(tmp.as_file(), mode)?;
    match tmp.persist(path) {
        Ok(_) => {
            discard_trash(path);
            Ok(written)
        }
        Err(tempfile::PersistError { error, file }) => {
            swap_aside(path, error, || file.persist(path).map(|_| ()).map_err(|e| e.error))?;
            Ok(written)
        }
    }
}

/// Move the file at `path` to `<path>.trash` and run `retry`. A failed retry
/// moves the old file back so the target never goes missing. `first` is
/// returned when the old file cannot be moved at all.
fn swap_aside<F>(path: &Path, first: io::Error, retry: F) -> io::Result<()>
where
    F: FnOnce() -> io::Result<()>,
{
    let trash = trash_path(path);
    let _ = fs::remove_file(&trash);
    if fs::rename(path, &trash).is_err() {
        return Err(first);
    }
    tracing::debug!("moved {} aside to {}", path.display(), trash.display());
    match retry() {
        Ok(()) => {
            discard_trash(path);
            Ok(())
        }
        Err(e) => {
            if let Err(restore) = fs::rename(&trash, path) {
                tracing::warn!("could not restore {} from {}: {restore}", path.display(), trash.display());
            }
            Err(e)
        }
    }
}

/// Best effort: a busy executable stays in the trash until the next start.
fn discard_trash(path: &Path) {
    if let Err(e) = remove_trash(path) {
        tracing::debug!("left {} in place: {e}", trash_path(path).display());
    }
}

/// Delete a leftover `<path>.trash`. Returns whether one existed.
pub fn remove_trash(path: &Path) -> io::Result<bool> {
    match fs::remove_file(trash_path(path)) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn set_file_mode(f: &File, mode: u32) -> io::Result<()> {
    f.set_permissions(fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn set_file_mode(f: &File, mode: u32) -> io::Result<()> {
    let mut perms = f.metadata()?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    f.set_permissions(perms)
}

#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, perms)
}

/// Permission bits of `meta`. Off unix only the read-only flag exists, so it
/// is mapped onto `0o555` / `0o777`.
#[cfg(unix)]
pub fn mode_of(meta: &Metadata) -> u32 {
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
pub fn mode_of(meta: &Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o555
    } else {
        0o777
    }
}

/// All `required` bits present; extra bits are fine.
pub fn has_mode(meta: &Metadata, required: u32) -> bool {
    let required = required & 0o7777;
    mode_of(meta) & required == required
}

pub fn file_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).map(|m| m.file_type().is_file()).unwrap_or(false)
}

pub fn dir_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).map(|m| m.file_type().is_dir()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_retry_puts_the_old_file_back() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("game.exe");
        fs::write(&target, b"old build").unwrap();

        let refused = io::Error::new(io::ErrorKind::PermissionDenied, "busy");
        let err = swap_aside(&target, refused, || Err(io::Error::new(io::ErrorKind::Other, "still busy"))).unwrap_err();
        assert_eq!(err.to_string(), "still busy");
        assert_eq!(fs::read(&target).unwrap(), b"old build");
        assert!(!trash_path(&target).exists());
    }

    #[test]
    fn successful_retry_discards_the_trash() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("data.pak");
        fs::write(&target, b"old").unwrap();

        let refused = io::Error::new(io::ErrorKind::PermissionDenied, "busy");
        swap_aside(&target, refused, || fs::write(&target, b"new")).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert!(!trash_path(&target).exists());
    }

    #[test]
    fn unmovable_target_returns_the_first_error() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("absent");
        let refused = io::Error::new(io::ErrorKind::PermissionDenied, "busy");
        let err = swap_aside(&target, refused, || panic!("retry must not run")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn replacing_clears_a_leftover_trash_file() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("tool");
        fs::write(&target, b"v1").unwrap();
        fs::write(trash_path(&target), b"v0").unwrap();

        write_replace(&target, 0o644, &mut &b"v2"[..]).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"v2");
        assert!(!trash_path(&target).exists());
    }
}
