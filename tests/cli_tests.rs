//! Smoke tests for the `clickstream-loader` binary.

mod test_utils;

use std::process::{Command, Output};

use tempfile::TempDir;
use test_utils::{csv_with_records, sqlite_url, write_csv};

/// Run the binary inside `dir` with a clean `CLICKSTREAM_*` environment.
fn run_loader(dir: &TempDir, args: &[&str]) -> Output {
    let bin_path = assert_cmd::cargo::cargo_bin!("clickstream-loader");

    let mut command = Command::new(bin_path);
    for (key, _) in std::env::vars() {
        if key.starts_with("CLICKSTREAM_") {
            command.env_remove(key);
        }
    }
    command
        .current_dir(dir.path())
        .env("CLICKSTREAM_LOG_LEVEL", "warn")
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("failed to run clickstream-loader binary")
}

#[test]
fn loads_csv_into_sqlite_and_exits_zero() {
    let dir = TempDir::new().unwrap();
    let source = write_csv(&dir, "events.csv", &csv_with_records(12));
    let url = sqlite_url(&dir);

    let output = run_loader(
        &dir,
        &[
            source.to_str().unwrap(),
            "--batch-size",
            "5",
            "--database-url",
            &url,
        ],
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("Loaded 12 rows in 3 batches"), "stdout: {stdout}");
}

#[test]
fn missing_source_exits_one_with_zero_committed() {
    let dir = TempDir::new().unwrap();
    let url = sqlite_url(&dir);

    let output = run_loader(&dir, &["--source", "absent.csv", "--database-url", &url]);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr.contains("ingestion failed during read"), "stderr: {stderr}");
    assert!(stderr.contains("0 rows were committed"), "stderr: {stderr}");
}

#[test]
fn zero_batch_size_is_rejected() {
    let dir = TempDir::new().unwrap();

    let output = run_loader(&dir, &["--batch-size", "0"]);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success());
    assert!(stderr.contains("failed to load configuration"), "stderr: {stderr}");
}
