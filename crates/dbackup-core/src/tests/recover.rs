use crate::commands::recover::{self, RecoverOptions};
use crate::error::DbackupError;
use crate::manifest::Manifest;

use super::helpers::{read_tree, TestEnv, TEST_NAME, TEST_PREFIX_BASE};

fn recover_into(env: &TestEnv, dest: &std::path::Path) {
    recover::run(
        &env.store,
        &env.manifest_path(),
        TEST_PREFIX_BASE,
        TEST_NAME,
        dest,
        &RecoverOptions { force: false },
    )
    .unwrap()
}

#[test]
fn recover_reproduces_rollup_batches() {
    let env = TestEnv::new();
    env.write_file("a.txt", 5);
    env.write_file("sub/b.txt", 9);
    env.write_file("sub/deep/c.txt", 25);
    env.backup(100_000).unwrap();

    let dest = tempfile::tempdir().unwrap();
    recover_into(&env, dest.path());

    assert_eq!(read_tree(dest.path()), read_tree(env.source.path()));
}

#[test]
fn recover_reproduces_single_file_batches() {
    let env = TestEnv::new();
    env.write_file("a.txt", 5);
    env.write_file("b.txt", 9);
    env.write_file("c.txt", 25);
    env.backup(10).unwrap();

    let dest = tempfile::tempdir().unwrap();
    recover_into(&env, dest.path());

    assert_eq!(read_tree(dest.path()), read_tree(env.source.path()));
    // No archives are left behind after extraction.
    for (path, _) in read_tree(dest.path()) {
        assert!(!path.ends_with(".tar.gz"), "stale archive {path}");
    }
}

#[test]
fn recover_restores_mod_times_to_the_second() {
    let env = TestEnv::new();
    env.write_file("a.txt", 5);
    env.write_file("sub/b.txt", 9);
    env.backup(100_000).unwrap();

    let dest = tempfile::tempdir().unwrap();
    recover_into(&env, dest.path());

    for rel in ["a.txt", "sub/b.txt"] {
        let src = std::fs::metadata(crate::walk::join_rel(env.source.path(), rel)).unwrap();
        let out = std::fs::metadata(crate::walk::join_rel(dest.path(), rel)).unwrap();
        let src_time = crate::walk::mod_time(&src).unwrap();
        let out_time = crate::walk::mod_time(&out).unwrap();
        assert_eq!(src_time.timestamp(), out_time.timestamp(), "mtime of {rel}");
    }
}

#[test]
fn recover_adopts_remote_manifest_for_next_run() {
    let env = TestEnv::new();
    env.write_file("a.txt", 5);
    env.backup(100_000).unwrap();

    // Lose the local manifest, as a different machine would have.
    std::fs::remove_file(env.manifest_path()).unwrap();

    let dest = tempfile::tempdir().unwrap();
    recover_into(&env, dest.path());

    let manifest = Manifest::open(&env.manifest_path()).unwrap();
    let records = manifest.all_records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path, "a.txt");
}

#[test]
fn recovered_tree_backs_up_cleanly() {
    let env = TestEnv::new();
    env.write_file("a.txt", 5);
    env.write_file("sub/b.txt", 9);
    env.backup(100_000).unwrap();

    let dest = tempfile::tempdir().unwrap();
    recover_into(&env, dest.path());

    // Backing up the recovered tree under the same name sees no changes:
    // contents and mod times round-tripped.
    let summary = crate::commands::backup::run(
        &env.store,
        &env.manifest_path(),
        dest.path(),
        TEST_PREFIX_BASE,
        TEST_NAME,
        100_000,
        &crate::commands::backup::BackupOptions {
            force: false,
            dry_run: false,
        },
    )
    .unwrap();
    assert!(summary.added.is_empty());
    assert!(summary.changed.is_empty());
    assert!(summary.removed.is_empty());
}

#[test]
fn recover_requires_prefix_and_name() {
    let env = TestEnv::new();
    let dest = tempfile::tempdir().unwrap();
    let err = recover::run(
        &env.store,
        &env.manifest_path(),
        "",
        TEST_NAME,
        dest.path(),
        &RecoverOptions { force: false },
    )
    .unwrap_err();
    assert!(matches!(err, DbackupError::Config(_)));
}

#[test]
fn recover_aborts_on_drift_without_force() {
    let env = TestEnv::new();
    env.write_file("a.txt", 5);
    env.backup(100_000).unwrap();

    let manifest = Manifest::open(&env.manifest_path()).unwrap();
    let record = manifest.get("a.txt").unwrap().unwrap();
    manifest
        .upsert("a.txt", record.mod_time, "tampered", &record.batch)
        .unwrap();
    manifest.close().unwrap();

    let dest = tempfile::tempdir().unwrap();
    let err = recover::run(
        &env.store,
        &env.manifest_path(),
        TEST_PREFIX_BASE,
        TEST_NAME,
        dest.path(),
        &RecoverOptions { force: false },
    )
    .unwrap_err();
    assert!(matches!(err, DbackupError::RemoteDriftDetected(_)));

    // Forcing adopts the remote manifest and recovers anyway.
    recover::run(
        &env.store,
        &env.manifest_path(),
        TEST_PREFIX_BASE,
        TEST_NAME,
        dest.path(),
        &RecoverOptions { force: true },
    )
    .unwrap();
    assert_eq!(read_tree(dest.path()), read_tree(env.source.path()));
}

#[test]
fn stale_remote_files_do_not_leak_into_recovery() {
    let env = TestEnv::new();
    env.write_file("a.txt", 5);
    env.write_file("doomed.txt", 2000);
    env.backup(1000).unwrap();

    env.remove_file("doomed.txt");
    env.backup(1000).unwrap();

    let dest = tempfile::tempdir().unwrap();
    recover_into(&env, dest.path());

    let paths: Vec<String> = read_tree(dest.path()).into_iter().map(|(p, _)| p).collect();
    assert_eq!(paths, vec!["a.txt"]);
}
