//! End-to-end `speed-test` run against a stand-in for the Ookla CLI.
//!
//! Kept in its own binary: the stub is written and then executed, and
//! concurrent forks from sibling tests could hold its write handle open.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;

use assert_cmd::Command;
use predicates::prelude::*;

const REPORT: &str = r#"{"type":"result","ping":{"latency":12.25,"jitter":0.5},"download":{"bandwidth":12500000},"upload":{"bandwidth":2500000},"server":{"id":5,"name":"Example","location":"Warsaw"},"result":{"url":"https://www.speedtest.net/result/c/abc"}}"#;

#[test]
fn test_speed_test_stores_and_prints_result() {
    let dir = tempfile::TempDir::new().unwrap();

    let stub = dir.path().join("speedtest");
    std::fs::write(&stub, format!("#!/bin/sh\ncat <<'EOF'\n{REPORT}\nEOF\n")).unwrap();
    std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();

    let config = dir.path().join("speedtestlog.toml");
    std::fs::write(
        &config,
        format!(
            "[storage]\ndb_path = {db:?}\ndata_dir = {data:?}\n\n[tools]\nspeedtest_path = {stub:?}\n",
            db = dir.path().join("cli.db"),
            data = dir.path(),
            stub = stub,
        ),
    )
    .unwrap();

    Command::cargo_bin("speedtestlog")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["speed-test", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"download\": 100.0"))
        .stdout(predicate::str::contains("\"server_name\": \"Example\""));

    Command::cargo_bin("speedtestlog")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["speed-test", "--server-id", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Download"))
        .stdout(predicate::str::contains("100.00 Mbps"))
        .stdout(predicate::str::contains("speedtest.net/result"));

    let pool = speedtestlog::storage::open_pool(&dir.path().join("cli.db")).unwrap();
    assert_eq!(speedtestlog::storage::list_results(&pool, 10).unwrap().len(), 2);
}
