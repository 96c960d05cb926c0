#[path = "../src/backup.rs"]
mod backup;

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn write_sqlite_db(path: &Path, marker: &str) -> Vec<u8> {
    {
        let conn = rusqlite::Connection::open(path).expect("open sqlite");
        conn.execute("CREATE TABLE marker(value TEXT NOT NULL)", [])
            .expect("create marker table");
        conn.execute("INSERT INTO marker(value) VALUES(?)", [marker])
            .expect("insert marker");
    }
    std::fs::read(path).expect("read sqlite bytes")
}

fn write_bundle(path: &Path, manifest_sha: &str, db_bytes: &[u8]) {
    let f = File::create(path).expect("create bundle");
    let mut zip = zip::ZipWriter::new(f);
    let opts = zip::write::FileOptions::default();
    zip.start_file("manifest.json", opts).expect("start manifest");
    zip.write_all(
        format!(
            "{{\"format\":\"{}\",\"version\":1,\"dbSha256\":\"{}\"}}",
            backup::BUNDLE_FORMAT_V1,
            manifest_sha
        )
        .as_bytes(),
    )
    .expect("write manifest");
    zip.start_file("db/scoreboard.sqlite3", opts).expect("start db");
    zip.write_all(db_bytes).expect("write db");
    zip.finish().expect("finish zip");
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("scoreboard-backup-src");
    let workspace2 = temp_dir("scoreboard-backup-dst");
    let out_dir = temp_dir("scoreboard-backup-out");

    let bytes = write_sqlite_db(&workspace.join("scoreboard.sqlite3"), "source");

    let bundle_path = out_dir.join("workspace.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.entry_count, 2);
    assert_eq!(export.db_sha256.len(), 64);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(backup::BUNDLE_FORMAT_V1));
    assert!(manifest.contains(&export.db_sha256));
    archive
        .by_name("db/scoreboard.sqlite3")
        .expect("database entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT_V1);

    let restored = std::fs::read(workspace2.join("scoreboard.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);
    assert!(!workspace2.join("scoreboard.sqlite3.importing").exists());

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn plain_sqlite_import_is_supported() {
    let out_dir = temp_dir("scoreboard-backup-plain");
    let workspace = temp_dir("scoreboard-backup-plain-dst");

    let plain_file = out_dir.join("copy.sqlite3");
    let bytes = write_sqlite_db(&plain_file, "plain-copy");

    let import =
        backup::import_workspace_bundle(&plain_file, &workspace).expect("import sqlite file");
    assert_eq!(import.bundle_format_detected, backup::PLAIN_SQLITE_FORMAT);

    let restored = std::fs::read(workspace.join("scoreboard.sqlite3")).expect("read restored");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn tampered_bundle_is_rejected_and_existing_db_kept() {
    let out_dir = temp_dir("scoreboard-backup-tampered");
    let workspace = temp_dir("scoreboard-backup-tampered-dst");
    let existing = write_sqlite_db(&workspace.join("scoreboard.sqlite3"), "keep-me");

    let swapped = write_sqlite_db(&out_dir.join("swapped.sqlite3"), "swapped");
    let bundle_path = out_dir.join("tampered.zip");
    write_bundle(&bundle_path, &"0".repeat(64), &swapped);

    let err = backup::import_workspace_bundle(&bundle_path, &workspace)
        .expect_err("checksum mismatch must fail");
    assert!(format!("{err:#}").contains("checksum"));
    let kept = std::fs::read(workspace.join("scoreboard.sqlite3")).expect("read existing");
    assert_eq!(kept, existing);

    let junk = out_dir.join("junk.txt");
    std::fs::write(&junk, b"nope").expect("write junk");
    assert!(backup::import_workspace_bundle(&junk, &workspace).is_err());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn bundle_with_matching_checksum_but_non_sqlite_entry_is_rejected() {
    let out_dir = temp_dir("scoreboard-backup-notdb");
    let workspace = temp_dir("scoreboard-backup-notdb-dst");
    let existing = write_sqlite_db(&workspace.join("scoreboard.sqlite3"), "keep-me");

    let payload = b"definitely not a database";
    let bundle_path = out_dir.join("notdb.zip");
    write_bundle(&bundle_path, &sha256_hex(payload), payload);

    let err = backup::import_workspace_bundle(&bundle_path, &workspace)
        .expect_err("non-sqlite entry must fail");
    assert!(format!("{err:#}").contains("not a SQLite file"));

    let kept = std::fs::read(workspace.join("scoreboard.sqlite3")).expect("read existing");
    assert_eq!(kept, existing);
    assert!(!workspace.join("scoreboard.sqlite3.importing").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn sqlite_header_with_broken_page_layout_fails_integrity_check() {
    let out_dir = temp_dir("scoreboard-backup-corrupt");
    let workspace = temp_dir("scoreboard-backup-corrupt-dst");
    let existing = write_sqlite_db(&workspace.join("scoreboard.sqlite3"), "keep-me");

    // Page size lives at offset 16; 7 is not a power of two.
    let mut corrupt = write_sqlite_db(&out_dir.join("source.sqlite3"), "corrupt");
    corrupt[16] = 0x00;
    corrupt[17] = 0x07;
    let corrupt_path = out_dir.join("corrupt.sqlite3");
    std::fs::write(&corrupt_path, &corrupt).expect("write corrupt db");

    assert!(backup::import_workspace_bundle(&corrupt_path, &workspace).is_err());
    let kept = std::fs::read(workspace.join("scoreboard.sqlite3")).expect("read existing");
    assert_eq!(kept, existing);
    assert!(!workspace.join("scoreboard.sqlite3.importing").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}
