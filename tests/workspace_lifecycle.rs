use serde_json::json;
use sha2::{Digest, Sha256};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
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

fn spawn_sidecar(workspace: Option<&Path>) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_scoreboardd");
    let mut cmd = Command::new(exe);
    cmd.env_remove("SCOREBOARDD_WORKSPACE");
    if let Some(ws) = workspace {
        cmd.arg("--workspace").arg(ws);
    }
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn scoreboardd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn aggregates(v: &serde_json::Value) -> (i64, i64) {
    (
        v.get("points").and_then(|v| v.as_i64()).expect("points"),
        v.get("total").and_then(|v| v.as_i64()).expect("total"),
    )
}

fn send(stdin: &mut ChildStdin, id: &str, method: &str, params: serde_json::Value) {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
}

fn receive(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

#[test]
fn records_survive_daemon_restart() {
    let workspace = temp_dir("scoreboard-restart");

    {
        let (mut child, mut stdin, mut reader) = spawn_sidecar(Some(&workspace));
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "1",
            "students.create",
            json!({ "name": "Ali" }),
        );
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "details.add",
            json!({ "name": "Ali", "exam": "Math", "points": 8, "total": 10 }),
        );
        drop(stdin);
        let _ = child.wait();
    }

    let (mut child, mut stdin, mut reader) = spawn_sidecar(None);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let ali = request_ok(&mut stdin, &mut reader, "2", "students.get", json!({ "name": "Ali" }));
    assert_eq!(aggregates(&ali), (8, 10));

    let _ = request_ok(&mut stdin, &mut reader, "3", "workspace.close", json!({}));
    let after_close = request(&mut stdin, &mut reader, "4", "students.list", json!({}));
    assert_eq!(
        after_close.pointer("/error/code").and_then(|v| v.as_str()),
        Some("no_workspace")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn concurrent_daemons_on_one_workspace_lose_no_details() {
    const ADDS_PER_DAEMON: i64 = 20;

    let workspace = temp_dir("scoreboard-shared");
    let (mut child_a, mut stdin_a, mut reader_a) = spawn_sidecar(Some(&workspace));
    let (mut child_b, mut stdin_b, mut reader_b) = spawn_sidecar(Some(&workspace));

    let _ = request_ok(
        &mut stdin_a,
        &mut reader_a,
        "create",
        "students.create",
        json!({ "name": "Shared" }),
    );
    // The second daemon sees the record and its name.
    let dup = request(
        &mut stdin_b,
        &mut reader_b,
        "dup",
        "students.create",
        json!({ "name": "Shared" }),
    );
    assert_eq!(
        dup.pointer("/error/code").and_then(|v| v.as_str()),
        Some("conflict")
    );

    // Queue every add on both daemons before reading any response so the
    // two processes race on the same record.
    for i in 0..ADDS_PER_DAEMON {
        for (tag, stdin) in [("a", &mut stdin_a), ("b", &mut stdin_b)] {
            send(
                stdin,
                &format!("{}-{}", tag, i),
                "details.add",
                json!({
                    "name": "Shared",
                    "exam": format!("Exam {} {}", tag, i),
                    "points": i,
                    "total": i + 1,
                }),
            );
        }
    }

    let mut accepted = 0;
    let mut expected = (0, 0);
    for (tag, reader) in [("a", &mut reader_a), ("b", &mut reader_b)] {
        for i in 0..ADDS_PER_DAEMON {
            let resp = receive(reader);
            let id = format!("{}-{}", tag, i);
            assert_eq!(resp.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
            if resp.get("ok").and_then(|v| v.as_bool()) == Some(true) {
                accepted += 1;
                expected = (expected.0 + i, expected.1 + i + 1);
            } else {
                // Losing every retry is reported, never silently dropped.
                assert_eq!(
                    resp.pointer("/error/code").and_then(|v| v.as_str()),
                    Some("db_failed")
                );
            }
        }
    }
    assert!(accepted > 0);

    let final_view = request_ok(
        &mut stdin_b,
        &mut reader_b,
        "get",
        "students.get",
        json!({ "name": "Shared" }),
    );
    let details = final_view
        .get("details")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(details.len(), accepted);
    let sum_points: i64 = details
        .iter()
        .filter_map(|d| d.get("points").and_then(|v| v.as_i64()))
        .sum();
    let sum_total: i64 = details
        .iter()
        .filter_map(|d| d.get("total").and_then(|v| v.as_i64()))
        .sum();
    assert_eq!(aggregates(&final_view), (sum_points, sum_total));
    assert_eq!(aggregates(&final_view), expected);

    drop(stdin_a);
    drop(stdin_b);
    let _ = child_a.wait();
    let _ = child_b.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn bundle_export_and_import_restore_records() {
    let source = temp_dir("scoreboard-bundle-src");
    let target = temp_dir("scoreboard-bundle-dst");
    let out_dir = temp_dir("scoreboard-bundle-out");
    let bundle = out_dir.join("scores.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar(Some(&source));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({ "name": "Layla" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "details.add",
        json!({ "name": "Layla", "exam": "History", "points": 17, "total": 20 }),
    );
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.exportBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(
        exported.get("dbSha256").and_then(|v| v.as_str()).map(|s| s.len()),
        Some(64)
    );

    // Switch to an empty workspace and restore into it.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": target.to_string_lossy() }),
    );
    let empty = request_ok(&mut stdin, &mut reader, "5", "students.list", json!({}));
    assert_eq!(
        empty.get("students").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "workspace.importBundle",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert!(imported.get("bundleFormatDetected").is_some());
    let layla = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.get",
        json!({ "name": "Layla" }),
    );
    assert_eq!(aggregates(&layla), (17, 20));

    // Garbage input fails and leaves the workspace usable.
    let junk = out_dir.join("junk.bin");
    std::fs::write(&junk, b"definitely not a backup").expect("write junk");
    let failed = request(
        &mut stdin,
        &mut reader,
        "8",
        "workspace.importBundle",
        json!({ "inPath": junk.to_string_lossy() }),
    );
    assert_eq!(
        failed.pointer("/error/code").and_then(|v| v.as_str()),
        Some("backup_failed")
    );
    let still_there = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "students.get",
        json!({ "name": "Layla" }),
    );
    assert_eq!(aggregates(&still_there), (17, 20));

    // A well-formed bundle whose database entry is not SQLite must not
    // replace the live database.
    let payload = b"definitely not a database";
    let not_db = out_dir.join("not-db.zip");
    {
        let f = std::fs::File::create(&not_db).expect("create bundle");
        let mut zip = zip::ZipWriter::new(f);
        let opts = zip::write::FileOptions::default();
        zip.start_file("manifest.json", opts).expect("start manifest");
        let manifest = json!({
            "format": "scoreboard-workspace-v1",
            "version": 1,
            "dbSha256": format!("{:x}", Sha256::digest(payload)),
        });
        zip.write_all(manifest.to_string().as_bytes())
            .expect("write manifest");
        zip.start_file("db/scoreboard.sqlite3", opts).expect("start db");
        zip.write_all(payload).expect("write db");
        zip.finish().expect("finish zip");
    }
    let rejected = request(
        &mut stdin,
        &mut reader,
        "10",
        "workspace.importBundle",
        json!({ "inPath": not_db.to_string_lossy() }),
    );
    assert_eq!(
        rejected.pointer("/error/code").and_then(|v| v.as_str()),
        Some("backup_failed")
    );
    let not_db_path = not_db.to_string_lossy().to_string();
    assert_eq!(
        rejected.pointer("/error/details/path").and_then(|v| v.as_str()),
        Some(not_db_path.as_str())
    );
    let survived = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "students.get",
        json!({ "name": "Layla" }),
    );
    assert_eq!(aggregates(&survived), (17, 20));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(source);
    let _ = std::fs::remove_dir_all(target);
    let _ = std::fs::remove_dir_all(out_dir);
}
