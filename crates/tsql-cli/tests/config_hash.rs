//! Smoke test for the `config-hash` subcommand: no database, no network,
//! just layered-YAML load + hash.

use std::io::Write;

use assert_cmd::Command;
use predicates::str::contains;

#[test]
fn config_hash_prints_a_stable_hash_line() {
    let mut base = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        base,
        "datasets_root: /data\nworker_base_url: http://localhost:8001\nmodel_store_dir: /models\n"
    )
    .unwrap();

    Command::cargo_bin("tsql")
        .unwrap()
        .arg("config-hash")
        .arg(base.path())
        .assert()
        .success()
        .stdout(contains("config_hash="));
}
