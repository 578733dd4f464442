use crate::fsutil;
use crate::hash;
use crate::manifest::{Manifest, ManifestEntry};
use crate::path_safety::check_relative;
use crate::platform::{parse_platform, PlatformFilter};
use anyhow::{bail, Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A file offered for inclusion in a new manifest.
#[derive(Clone, Debug)]
pub struct CreateItem {
    pub path: PathBuf,
    pub mode: u32,
    pub platform: PlatformFilter,
    pub is_dir: bool,
}

/// Ordered `glob -> platform` rules; the first match wins, no match means
/// any platform.
#[derive(Clone, Debug, Default)]
pub struct PlatformRules {
    set: GlobSet,
    targets: Vec<PlatformFilter>,
}

impl PlatformRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// One rule per line, `<glob>:<platform-spec>`. Blank lines and `#`
    /// comments are ignored; a line without `:` applies to any platform.
    ///
    /// ```text
    /// bin/*.exe:windows
    /// bin/*.so:^windows:amd64
    /// data/debug/*:^
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut targets = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let (pattern, spec) = line.split_once(':').unwrap_or((line, ""));
            if pattern.is_empty() {
                continue;
            }
            let platform = parse_platform(spec).with_context(|| format!("rule line {}", lineno + 1))?;
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .with_context(|| format!("rule line {}: bad glob {pattern:?}", lineno + 1))?;
            builder.add(glob);
            targets.push(platform);
        }
        Ok(Self { set: builder.build()?, targets })
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// `rel` is root-relative with `/` separators.
    pub fn platform_for(&self, rel: &str) -> PlatformFilter {
        self.set.matches(rel).into_iter().min().map_or(PlatformFilter::ANY, |i| self.targets[i])
    }
}

fn rel_posix(root: &Path, path: &Path) -> Result<String> {
    let rel = pathdiff::diff_paths(path, root).unwrap_or_else(|| path.to_path_buf());
    let rel = rel.to_string_lossy().replace('\\', "/");
    check_relative(&rel).with_context(|| format!("{} is not under {}", path.display(), root.display()))?;
    Ok(rel)
}

/// Walk `root`, pruning anything whose platform is excluded. Yields regular
/// files only; symlinks are not followed.
pub fn walk(root: &Path, rules: &PlatformRules) -> Result<Vec<CreateItem>> {
    let mut items = Vec::new();
    let entries = WalkDir::new(root).min_depth(1).sort_by_file_name().into_iter().filter_entry(|e| {
        match rel_posix(root, e.path()) {
            Ok(rel) => !rules.platform_for(&rel).is_excluded(),
            Err(_) => false,
        }
    });
    for ent in entries {
        let ent = ent.with_context(|| format!("walk {}", root.display()))?;
        if !ent.file_type().is_file() {
            continue;
        }
        let meta = ent.metadata().with_context(|| format!("stat {}", ent.path().display()))?;
        let rel = rel_posix(root, ent.path())?;
        items.push(CreateItem {
            path: ent.path().to_path_buf(),
            mode: fsutil::mode_of(&meta),
            platform: rules.platform_for(&rel),
            is_dir: false,
        });
    }
    Ok(items)
}

/// Hash every targeted item into a manifest keyed by its path relative to
/// `root`. Directories and items excluded on either axis are skipped.
pub fn build_manifest<I>(root: &Path, items: I) -> Result<Manifest>
where
    I: IntoIterator<Item = CreateItem>,
{
    let targeted: Vec<CreateItem> =
        items.into_iter().filter(|it| !it.is_dir && !it.platform.is_excluded()).collect();
    let hashed = targeted
        .par_iter()
        .map(|it| -> Result<(String, ManifestEntry)> {
            let rel = rel_posix(root, &it.path)?;
            let digest = hash::hash_file(&it.path).with_context(|| format!("hash {}", it.path.display()))?;
            Ok((rel, ManifestEntry { platform: it.platform, mode: it.mode & 0o7777, digest }))
        })
        .collect::<Result<Vec<_>>>()?;
    let manifest: Manifest = hashed.into_iter().collect();
    if manifest.len() != targeted.len() {
        bail!("{} item(s) map to the same manifest path", targeted.len() - manifest.len());
    }
    Ok(manifest)
}

/// `walk` + `build_manifest`.
pub fn create(root: &Path, rules: &PlatformRules) -> Result<Manifest> {
    let items = walk(root, rules)?;
    tracing::info!("hashing {} file(s) under {}", items.len(), root.display());
    build_manifest(root, items)
}
