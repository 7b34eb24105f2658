//! CLI tests for `bench batch`.

#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use bench::exit_codes;

const REGISTRY: &str = r#"{
    "algorithms": [
        {
            "name": "toy",
            "cmd_template": ["${bin}", "-i", "${input}", "--foo", "${foo}"],
            "params": [
                {"name": "foo", "enum": ["A", "B"], "default": ["A", "B"]}
            ],
            "csv": {
                "header": ["file", "foo", "memlimit_mb", "x"],
                "required_keys": ["x", "foo"],
                "key_cols": [0, 1]
            }
        },
        {
            "name": "ghost",
            "cmd_template": ["${bin}", "-i", "${input}"],
            "csv": {
                "header": ["file", "x"],
                "required_keys": ["x"],
                "key_cols": [0]
            }
        }
    ]
}"#;

const GOOD_SCRIPT: &str = r#"#!/bin/sh
foo=""
while [ $# -gt 0 ]; do
  case "$1" in
    --foo) foo="$2"; shift 2 ;;
    *) shift ;;
  esac
done
echo "x=1 foo=$foo"
"#;

fn write_executable(path: &Path, contents: &str) {
    use std::os::unix::fs::PermissionsExt;
    fs::write(path, contents).expect("write script");
    let mut perms = fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod");
}

fn setup() -> (tempfile::TempDir, PathBuf) {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(temp.path().join("bench")).expect("bench dir");
    fs::write(temp.path().join("bench/a.cnf"), "p cnf 1 0\n").expect("write cnf");
    fs::write(temp.path().join("bench/b.cnf"), "p cnf 1 0\n").expect("write cnf");
    fs::create_dir_all(temp.path().join("configs")).expect("configs dir");
    fs::write(temp.path().join("configs/algorithms.json"), REGISTRY).expect("write registry");
    let bin = temp.path().join("fake_toy");
    write_executable(&bin, GOOD_SCRIPT);
    (temp, bin)
}

fn bench_batch(temp: &Path, config: &str) -> std::process::Output {
    fs::write(temp.join("batch.json"), config).expect("write batch config");
    Command::new(env!("CARGO_BIN_EXE_bench"))
        .current_dir(temp)
        .args([
            "batch",
            "--file",
            "batch.json",
            "--registry",
            "configs/algorithms.json",
        ])
        .output()
        .expect("run bench")
}

#[test]
fn batch_runs_all_files_with_overrides() {
    let (temp, bin) = setup();
    let config = format!(
        r#"{{
            "out_dir": "out",
            "bench_dir": "bench",
            "files": {{"count": 2, "seed": 1}},
            "algorithms": [{{
                "name": "toy",
                "bin": "{}",
                "parameters": {{"foo": ["A"]}},
                "skip_existing": true
            }}]
        }}"#,
        bin.display()
    );

    let output = bench_batch(temp.path(), &config);
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    let ledger =
        fs::read_to_string(temp.path().join("out/toy_results.csv")).expect("read ledger");
    let lines: Vec<&str> = ledger.lines().collect();
    assert_eq!(lines[0], "file,foo,memlimit_mb,x");
    assert_eq!(lines.len(), 3, "one row per file");
    assert!(lines.contains(&"a.cnf,A,,1"));
    assert!(lines.contains(&"b.cnf,A,,1"));
}

#[test]
fn batch_reuses_file_list_from_prior_csv() {
    let (temp, bin) = setup();
    fs::create_dir_all(temp.path().join("out")).expect("out dir");
    fs::write(
        temp.path().join("out/prior.csv"),
        "file,foo,memlimit_mb,x\na.cnf,A,,1\n",
    )
    .expect("write prior");

    let config = format!(
        r#"{{
            "out_dir": "out",
            "bench_dir": "bench",
            "files": {{"reuse_csv": "out/prior.csv"}},
            "algorithms": [{{"name": "toy", "bin": "{}", "parameters": {{"foo": ["B"]}}}}]
        }}"#,
        bin.display()
    );

    let output = bench_batch(temp.path(), &config);
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    let ledger =
        fs::read_to_string(temp.path().join("out/toy_results.csv")).expect("read ledger");
    assert!(ledger.contains("a.cnf,B,,1"));
    assert!(!ledger.contains("b.cnf"), "only the reused file runs");
}

#[test]
fn unresolved_binary_skips_algorithm_with_resource_code() {
    let (temp, bin) = setup();
    let config = format!(
        r#"{{
            "out_dir": "out",
            "bench_dir": "bench",
            "files": {{"count": 1, "seed": 1}},
            "algorithms": [
                {{"name": "toy", "bin": "{}", "parameters": {{"foo": ["A"]}}}},
                {{"name": "ghost"}}
            ]
        }}"#,
        bin.display()
    );

    let output = bench_batch(temp.path(), &config);
    // toy succeeded, ghost's binary is unresolvable.
    assert_eq!(output.status.code(), Some(exit_codes::MISSING_RESOURCE));
    assert!(temp.path().join("out/toy_results.csv").exists());
}

#[test]
fn unknown_algorithm_fails_batch_but_runs_the_rest() {
    let (temp, bin) = setup();
    let config = format!(
        r#"{{
            "out_dir": "out",
            "bench_dir": "bench",
            "files": {{"count": 1, "seed": 1}},
            "algorithms": [
                {{"name": "not_in_registry"}},
                {{"name": "toy", "bin": "{}", "parameters": {{"foo": ["A"]}}}}
            ]
        }}"#,
        bin.display()
    );

    let output = bench_batch(temp.path(), &config);
    assert_eq!(output.status.code(), Some(exit_codes::FAILURE));
    assert!(temp.path().join("out/toy_results.csv").exists());
}
