use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use fs2::FileExt;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use fixtree_core::generate::{self, PlatformRules};
use fixtree_core::path_safety::PathPolicy;
use fixtree_core::repair::{self, RepairOptions};
use fixtree_core::{codec, fsutil, retrieve};
use fixtree_core::{BadFile, Manifest, PlatformFilter};

mod config;
use config::Config;

/// Held for the whole of an update so two cycles never repair one tree.
const LOCK_NAME: &str = ".fixtree.lock";

#[derive(Parser)]
#[command(name = "fixtree", version, about = "Verify and repair an install tree against a manifest")]
struct Cli {
    /// Debug logging (FIXTREE_LOG takes precedence)
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
    /// Profile file used by `update --profile`
    #[arg(long, global = true, default_value = "fixtree.toml")]
    config: PathBuf,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Hash a directory tree into a manifest
    Create {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Platform rules, one `<glob>:<platform>` per line; `-` reads stdin
        #[arg(long)]
        rules: Option<PathBuf>,
        /// Manifest file to write; stdout when absent
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List the entries of a manifest file
    Show {
        manifest: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Report files that differ from a manifest without touching them
    Verify {
        manifest: PathBuf,
        root: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Fetch a manifest from a source, then verify and repair the tree
    Update {
        /// Named profile from the config file
        #[arg(long)]
        profile: Option<String>,
        /// Base URL or directory holding the manifest and file content
        #[arg(long)]
        source: Option<String>,
        /// Manifest name under the source
        #[arg(long)]
        manifest: Option<String>,
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        follow_symlinks: bool,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // a previous self-update may have moved our old binary aside
    if let Ok(exe) = std::env::current_exe() {
        match fsutil::remove_trash(&exe) {
            Ok(true) => tracing::debug!("removed stale {}", fsutil::trash_path(&exe).display()),
            Ok(false) => {}
            Err(e) => tracing::warn!("could not remove {}: {e}", fsutil::trash_path(&exe).display()),
        }
    }

    match cli.cmd {
        Cmd::Create { root, rules, output } => create(&root, rules.as_deref(), output.as_deref())?,
        Cmd::Show { manifest, json } => show(&manifest, json)?,
        Cmd::Verify { manifest, root, json } => return verify(&manifest, &root, json),
        Cmd::Update { profile, source, manifest, root, follow_symlinks, json } => {
            let target = resolve_target(&cli.config, profile.as_deref(), source, manifest, root)?;
            return update(&target, follow_symlinks, json);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("FIXTREE_LOG").unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn now_utc() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn read_rules(rules: Option<&Path>) -> Result<PlatformRules> {
    let text = match rules {
        None => return Ok(PlatformRules::new()),
        Some(p) if p == Path::new("-") => {
            let mut s = String::new();
            io::stdin().read_to_string(&mut s).context("read rules from stdin")?;
            s
        }
        Some(p) => fs::read_to_string(p).with_context(|| format!("read {}", p.display()))?,
    };
    PlatformRules::parse(&text)
}

fn read_manifest(path: &Path) -> Result<Manifest> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    codec::decode(BufReader::new(f)).with_context(|| format!("decode {}", path.display()))
}

fn create(root: &Path, rules: Option<&Path>, output: Option<&Path>) -> Result<()> {
    let rules = read_rules(rules)?;
    let skip = output.and_then(|p| fs::canonicalize(p).ok());
    let items: Vec<_> = generate::walk(root, &rules)?
        .into_iter()
        .filter(|it| it.path.file_name().map_or(true, |n| n != LOCK_NAME))
        .filter(|it| skip.is_none() || fs::canonicalize(&it.path).ok() != skip)
        .collect();
    tracing::info!("hashing {} file(s) under {}", items.len(), root.display());
    let mani = generate::build_manifest(root, items)?;
    match output {
        Some(p) => {
            let f = File::create(p).with_context(|| format!("create {}", p.display()))?;
            codec::encode(&mani, BufWriter::new(f)).with_context(|| format!("write {}", p.display()))?;
            tracing::info!("wrote {} entries to {}", mani.len(), p.display());
        }
        None => codec::encode(&mani, io::stdout().lock()).context("write manifest to stdout")?,
    }
    Ok(())
}

fn show(path: &Path, json: bool) -> Result<()> {
    let mani = read_manifest(path)?;
    let mut out = io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut out, &mani)?;
        writeln!(out)?;
        return Ok(());
    }
    for (name, e) in &mani {
        writeln!(out, "{:<30} {:04o} {} {}", name, e.mode, e.digest, e.platform)?;
    }
    Ok(())
}

#[derive(Serialize)]
struct VerifyJson<'a> {
    checked_utc: String,
    root: &'a Path,
    entries: usize,
    bad: &'a [BadFile],
}

fn verify(manifest: &Path, root: &Path, json: bool) -> Result<ExitCode> {
    let mani = read_manifest(manifest)?;
    let bad = fixtree_core::verify::scan(root, &mani, PlatformFilter::host());
    if json {
        let report = VerifyJson { checked_utc: now_utc(), root, entries: mani.len(), bad: &bad };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for b in &bad {
            println!("{:<40} {}", b.remote, b.reason);
        }
        println!("{}", if bad.is_empty() { "OK" } else { "BAD" });
    }
    Ok(if bad.is_empty() { ExitCode::SUCCESS } else { ExitCode::from(1) })
}

#[derive(Debug, PartialEq, Eq)]
struct Target {
    source: String,
    manifest: String,
    root: PathBuf,
}

/// Explicit flags win over the selected profile.
fn resolve_target(
    config_path: &Path,
    profile: Option<&str>,
    source: Option<String>,
    manifest: Option<String>,
    root: Option<PathBuf>,
) -> Result<Target> {
    let base = match profile {
        Some(name) => Some(Config::load(config_path)?.profile(name)?.clone()),
        None => None,
    };
    let source = source
        .or_else(|| base.as_ref().map(|p| p.source.clone()))
        .ok_or_else(|| anyhow!("no --source given and no --profile selected"))?;
    let manifest = manifest
        .or_else(|| base.as_ref().map(|p| p.manifest.clone()))
        .ok_or_else(|| anyhow!("no --manifest given and no --profile selected"))?;
    let root = root.or_else(|| base.map(|p| p.root)).unwrap_or_else(|| PathBuf::from("."));
    Ok(Target { source, manifest, root })
}

#[derive(Serialize)]
struct UpdateJson<'a> {
    finished_utc: String,
    root: &'a Path,
    source: &'a str,
    needed_repair: usize,
    errors: Vec<String>,
    clean: bool,
}

fn update(t: &Target, follow_symlinks: bool, json: bool) -> Result<ExitCode> {
    if !fsutil::dir_exists(&t.root) {
        tracing::info!("{} does not exist yet; every file will be fetched", t.root.display());
    }
    fs::create_dir_all(&t.root).with_context(|| format!("create {}", t.root.display()))?;
    let lock_path = t.root.join(LOCK_NAME);
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("open {}", lock_path.display()))?;
    lock.try_lock_exclusive()
        .map_err(|_| anyhow!("another update is already running in {}", t.root.display()))?;

    let get = retrieve::from_source(&t.source);
    tracing::info!("downloading manifest {} from {}", t.manifest, t.source);
    let stream = get.fetch(&t.manifest).with_context(|| format!("fetch manifest {}", t.manifest))?;
    let mani = codec::decode(BufReader::new(stream)).with_context(|| format!("decode manifest {}", t.manifest))?;
    tracing::info!("verifying {} files in {}", mani.len(), t.root.display());

    let opts = RepairOptions { path_policy: PathPolicy { follow_symlinks }, ..RepairOptions::default() };
    let report = repair::run_with(&t.root, &mani, get.as_ref(), &opts);
    let _ = lock.unlock();

    if json {
        let out = UpdateJson {
            finished_utc: now_utc(),
            root: &t.root,
            source: &t.source,
            needed_repair: report.needed_repair,
            errors: report.errors.iter().map(|e| e.to_string()).collect(),
            clean: report.is_clean(),
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{report}");
    }
    if report.is_clean() {
        tracing::info!("your installation is up to date");
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::error!("your installation is incomplete");
        Ok(ExitCode::from(2))
    }
}
