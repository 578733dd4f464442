use fixtree_core::generate::{self, PlatformRules};
use fixtree_core::repair::{self, RepairOptions, UpdateReport};
use fixtree_core::retrieve::{Content, DirRetriever, Retriever};
use fixtree_core::verify::{classify, scan};
use fixtree_core::{Digest, FetchError, Manifest, ManifestEntry, PlatformFilter, Reason, ResolveError};
use std::fs;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

fn entry_for(content: &[u8], mode: u32) -> ManifestEntry {
    ManifestEntry { platform: PlatformFilter::ANY, mode, digest: Digest::of_bytes(content) }
}

#[cfg(unix)]
fn chmod(p: &Path, mode: u32) {
    fs::set_permissions(p, fs::Permissions::from_mode(mode)).unwrap();
}

#[cfg(not(unix))]
fn chmod(_: &Path, _: u32) {}

/// A small release tree under `src` and its manifest.
fn release(src: &Path) -> Manifest {
    fs::create_dir_all(src.join("sub")).unwrap();
    fs::write(src.join("a.txt"), b"alpha\n").unwrap();
    fs::write(src.join("c.txt"), b"gamma\n").unwrap();
    let blob: Vec<u8> = (0..4096).map(|_| fastrand::u8(..)).collect();
    fs::write(src.join("sub/b.bin"), &blob).unwrap();
    for f in ["a.txt", "c.txt", "sub/b.bin"] {
        chmod(&src.join(f), 0o644);
    }
    generate::create(src, &PlatformRules::new()).unwrap()
}

fn opts() -> RepairOptions {
    RepairOptions { host: PlatformFilter::ANY, ..RepairOptions::default() }
}

#[test]
fn classify_missing_and_wrong_type() {
    let tmp = tempfile::tempdir().unwrap();
    let e = entry_for(b"x", 0o644);
    assert_eq!(classify(&tmp.path().join("nope"), &e), Reason::Missing);

    fs::create_dir(tmp.path().join("dir")).unwrap();
    assert_eq!(classify(&tmp.path().join("dir"), &e), Reason::TypeMismatch);
}

#[cfg(unix)]
#[test]
fn classify_order_hash_before_permissions() {
    let tmp = tempfile::tempdir().unwrap();
    let p = tmp.path().join("f");
    fs::write(&p, b"content").unwrap();
    let e = entry_for(b"content", 0o644);

    chmod(&p, 0o755);
    assert_eq!(classify(&p, &e), Reason::Valid, "extra bits are fine");

    chmod(&p, 0o600);
    assert_eq!(classify(&p, &e), Reason::PermMismatch);

    fs::write(&p, b"changed").unwrap();
    chmod(&p, 0o600);
    assert_eq!(classify(&p, &e), Reason::HashMismatch);
}

#[cfg(unix)]
#[test]
fn symlink_to_correct_file_is_wrong_type() {
    let tmp = tempfile::tempdir().unwrap();
    let real = tmp.path().join("real");
    fs::write(&real, b"content").unwrap();
    let link = tmp.path().join("link");
    std::os::unix::fs::symlink(&real, &link).unwrap();
    assert_eq!(classify(&link, &entry_for(b"content", 0)), Reason::TypeMismatch);
}

#[test]
fn entries_for_other_platforms_are_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    let mut m = Manifest::new();
    let windows_only = PlatformFilter::new(2, 0xff);
    m.insert("only/windows.dll", ManifestEntry { platform: windows_only, ..entry_for(b"dll", 0o644) });
    m.insert("everywhere.txt", entry_for(b"txt", 0o644));

    let linux = PlatformFilter::from_target("linux", "x86_64");
    let bad = scan(tmp.path(), &m, linux);
    assert_eq!(bad.len(), 1);
    assert_eq!(bad[0].remote, "everywhere.txt");
    assert_eq!(bad[0].reason, Reason::Missing);
    assert_eq!(bad[0].local, tmp.path().join("everywhere.txt"));

    let windows = PlatformFilter::from_target("windows", "x86_64");
    assert_eq!(scan(tmp.path(), &m, windows).len(), 2);
}

#[test]
fn update_fills_an_empty_tree_then_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let dst = tmp.path().join("dst");
    let mani = release(&src);
    assert_eq!(mani.len(), 3);
    let get = DirRetriever::new(&src);

    let first = repair::run_with(&dst, &mani, &get, &opts());
    assert_eq!(first.needed_repair, 3);
    assert!(first.is_clean(), "{:?}", first.errors);
    for f in ["a.txt", "c.txt", "sub/b.bin"] {
        assert_eq!(fs::read(dst.join(f)).unwrap(), fs::read(src.join(f)).unwrap(), "{f}");
    }

    let second = repair::run_with(&dst, &mani, &get, &opts());
    assert_eq!(second.needed_repair, 0);
    assert!(second.is_clean());
    assert_eq!(second.to_string(), "up to date");
    assert!(scan(&dst, &mani, PlatformFilter::ANY).is_empty());
}

#[test]
fn outdated_content_is_replaced() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let dst = tmp.path().join("dst");
    let mani = release(&src);
    let get = DirRetriever::new(&src);
    assert!(repair::run_with(&dst, &mani, &get, &opts()).is_clean());

    fs::write(dst.join("sub/b.bin"), b"stale").unwrap();
    let bad = scan(&dst, &mani, PlatformFilter::ANY);
    assert_eq!(bad.len(), 1);
    assert_eq!(bad[0].reason, Reason::HashMismatch);

    let rep = repair::run_with(&dst, &mani, &get, &opts());
    assert_eq!(rep.needed_repair, 1);
    assert_eq!(rep.to_string(), "repaired 1 file(s)");
    assert_eq!(fs::read(dst.join("sub/b.bin")).unwrap(), fs::read(src.join("sub/b.bin")).unwrap());
}

#[cfg(unix)]
#[test]
fn permissions_are_restored_without_fetching() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let dst = tmp.path().join("dst");
    let mani = release(&src);
    assert!(repair::run_with(&dst, &mani, &DirRetriever::new(&src), &opts()).is_clean());

    chmod(&dst.join("a.txt"), 0o600);
    // a retriever that refuses everything proves no content is fetched
    let refuse = |rel: &str| -> Result<Content, FetchError> { Err(FetchError::NotFound(rel.to_string())) };
    let rep = repair::run_with(&dst, &mani, &refuse, &opts());
    assert_eq!(rep.needed_repair, 1);
    assert!(rep.is_clean(), "{:?}", rep.errors);
    let mode = fs::metadata(dst.join("a.txt")).unwrap().permissions().mode() & 0o7777;
    assert_eq!(mode & 0o644, 0o644);
}

#[test]
fn directory_in_the_way_is_left_alone() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let dst = tmp.path().join("dst");
    let mani = release(&src);
    fs::create_dir_all(dst.join("a.txt")).unwrap();
    fs::write(dst.join("a.txt/keep.me"), b"precious").unwrap();

    let rep = repair::run_with(&dst, &mani, &DirRetriever::new(&src), &opts());
    assert_eq!(rep.needed_repair, 3);
    assert_eq!(rep.errors.len(), 1);
    assert!(matches!(&rep.errors[0], ResolveError::ExistingSpecial { path } if path.ends_with("a.txt")));
    assert!(rep.to_string().contains("1 unresolved error(s)"));
    assert_eq!(fs::read(dst.join("a.txt/keep.me")).unwrap(), b"precious");
    assert!(dst.join("c.txt").is_file());
    assert!(dst.join("sub/b.bin").is_file());
}

#[test]
fn one_failed_fetch_does_not_stop_the_rest() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let dst = tmp.path().join("dst");
    let mani = release(&src);
    let dir = DirRetriever::new(&src);
    let flaky = move |rel: &str| -> Result<Content, FetchError> {
        if rel == "c.txt" {
            Err(FetchError::Http(format!("503 for {rel}")))
        } else {
            dir.fetch(rel)
        }
    };

    let rep = repair::run_with(&dst, &mani, &flaky, &opts());
    assert_eq!(rep.needed_repair, 3);
    assert_eq!(rep.errors.len(), 1);
    match &rep.errors[0] {
        ResolveError::Fetch { path, source: FetchError::Http(_) } => assert_eq!(path, "c.txt"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(dst.join("a.txt").is_file());
    assert!(dst.join("sub/b.bin").is_file());
    assert!(!dst.join("c.txt").exists());
}

#[test]
fn missing_source_file_is_a_fetch_error() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let dst = tmp.path().join("dst");
    let mani = release(&src);
    fs::remove_file(src.join("a.txt")).unwrap();

    let rep = repair::run_with(&dst, &mani, &DirRetriever::new(&src), &opts());
    assert_eq!(rep.errors.len(), 1);
    assert!(matches!(&rep.errors[0], ResolveError::Fetch { source: FetchError::NotFound(_), .. }));
}

#[test]
fn report_passes_records_through_and_counts() {
    use std::sync::mpsc::sync_channel;
    use std::thread;

    let tmp = tempfile::tempdir().unwrap();
    let mut m = Manifest::new();
    m.insert("one", entry_for(b"1", 0));
    m.insert("two", entry_for(b"2", 0));
    let bad = scan(tmp.path(), &m, PlatformFilter::ANY);

    let (in_tx, in_rx) = sync_channel(0);
    let (out_tx, out_rx) = sync_channel(0);
    let counter = thread::spawn(move || repair::report(in_rx, out_tx));
    let feeder = thread::spawn(move || {
        for b in bad {
            in_tx.send(b).unwrap();
        }
    });
    let seen: Vec<String> = out_rx.iter().map(|b| b.remote).collect();
    feeder.join().unwrap();
    assert_eq!(counter.join().unwrap(), 2);
    assert_eq!(seen, ["one", "two"]);
}

#[test]
fn report_summary_wording() {
    assert_eq!(UpdateReport::default().to_string(), "up to date");
    let rep = UpdateReport {
        needed_repair: 2,
        errors: vec![ResolveError::ExistingSpecial { path: "x".into() }],
    };
    assert!(!rep.is_clean());
    assert_eq!(rep.to_string(), "2 file(s) needed repair; repaired with 1 unresolved error(s)");
}

#[test]
fn resolve_single_records() {
    use fixtree_core::fsutil::file_exists;

    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let dst = tmp.path().join("dst");
    let mani = release(&src);
    let get = DirRetriever::new(&src);

    let bad = scan(&dst, &mani, PlatformFilter::ANY);
    let first = bad.iter().find(|b| b.remote == "sub/b.bin").unwrap();
    assert_eq!(first.reason, Reason::Missing);
    repair::resolve(&dst, first, &get).unwrap();
    assert!(file_exists(&dst.join("sub/b.bin")));
    assert!(!file_exists(&dst.join("a.txt")));

    fs::create_dir_all(dst.join("c.txt")).unwrap();
    let wrong = scan(&dst, &mani, PlatformFilter::ANY).into_iter().find(|b| b.remote == "c.txt").unwrap();
    assert_eq!(wrong.reason, Reason::TypeMismatch);
    assert!(matches!(repair::resolve(&dst, &wrong, &get), Err(ResolveError::ExistingSpecial { .. })));
    assert!(dst.join("c.txt").is_dir());
}

#[test]
fn run_checks_entries_for_this_host() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let dst = tmp.path().join("dst");
    let mani = release(&src);
    let rep = repair::run(&dst, &mani, &DirRetriever::new(&src));
    assert_eq!(rep.needed_repair, 3);
    assert!(rep.is_clean(), "{:?}", rep.errors);
}
