use crate::error::PathError;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Default)]
pub struct PathPolicy {
    pub follow_symlinks: bool,
}

/// A manifest name must be a plain relative path: not empty, not absolute,
/// no `..` components. Both separators are checked so a name authored on
/// one platform cannot escape on another.
pub fn check_relative(rel: &str) -> Result<(), PathError> {
    if rel.is_empty() {
        return Err(PathError::Empty);
    }
    if rel.starts_with(['/', '\\']) || has_drive_prefix(rel) || Path::new(rel).is_absolute() {
        return Err(PathError::Absolute(rel.to_string()));
    }
    if rel.split(['/', '\\']).any(|part| part == "..") {
        return Err(PathError::ParentTraversal(rel.to_string()));
    }
    Ok(())
}

/// `C:name` only means a drive on Windows; elsewhere it is an ordinary name.
#[cfg(windows)]
fn has_drive_prefix(rel: &str) -> bool {
    let bytes = rel.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(not(windows))]
fn has_drive_prefix(_: &str) -> bool {
    false
}

/// Resolve `rel` under `root` for writing.
///
/// Without `follow_symlinks`, any symlinked directory between `root` and the
/// entry is refused. With it, the deepest existing ancestor must still
/// canonicalize to somewhere under `root`. The entry itself is not checked;
/// verification already classifies a symlink there as the wrong file type.
pub fn validate_path(root: &Path, rel: &str, policy: PathPolicy) -> Result<PathBuf, PathError> {
    check_relative(rel)?;
    let candidate = root.join(rel);
    if !policy.follow_symlinks {
        let mut cur = root.to_path_buf();
        let mut comps = Path::new(rel).components().peekable();
        while let Some(comp) = comps.next() {
            if comps.peek().is_none() {
                break;
            }
            cur.push(comp);
            if let Ok(m) = fs::symlink_metadata(&cur) {
                if m.file_type().is_symlink() {
                    return Err(PathError::Symlink(cur));
                }
            }
        }
        return Ok(candidate);
    }
    let Ok(root_can) = fs::canonicalize(root) else {
        // nothing under a missing root can point anywhere yet
        return Ok(candidate);
    };
    for ancestor in candidate.ancestors().skip(1) {
        if let Ok(can) = fs::canonicalize(ancestor) {
            if !can.starts_with(&root_can) {
                return Err(PathError::EscapesRoot(candidate));
            }
            break;
        }
    }
    Ok(candidate)
}
