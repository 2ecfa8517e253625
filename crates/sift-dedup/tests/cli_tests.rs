//! CLI integration tests for sift-dedup.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const NEKO: &str = "吾輩は猫である。名前はまだ無い。どこで生れたかとんと見当がつかぬ。\
    何でも薄暗いじめじめした所でニャーニャー泣いていた事だけは記憶している。\
    吾輩はここで始めて人間というものを見た。";
const FOX: &str = "The quick brown fox jumps over the lazy dog near the riverbank at dawn.";

/// Get a Command for the sift-dedup binary.
#[allow(deprecated)]
fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("sift-dedup").unwrap();
    cmd.env_remove("SIFT_WORKERS")
        .env_remove("SIFT_BLACKLIST")
        .env_remove("SIFT_OUTPUT_DIR")
        .env("RUST_LOG", "warn");
    cmd
}

fn write_jsonl(path: &Path, texts: &[&str]) {
    let content: String = texts
        .iter()
        .map(|t| serde_json::json!({ "text": t }).to_string() + "\n")
        .collect();
    fs::write(path, content).unwrap();
}

// ============================================================================
// Help and Version Tests
// ============================================================================

#[test]
fn test_help() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("near-duplicate"));
}

#[test]
fn test_version() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sift-dedup"));
}

#[test]
fn test_dedup_help_lists_modes() {
    cmd()
        .args(["dedup", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("intra-file"))
        .stdout(predicate::str::contains("cross-file"));
}

// ============================================================================
// Argument Validation Tests
// ============================================================================

#[test]
fn test_missing_subcommand() {
    cmd().assert().failure();
}

#[test]
fn test_dedup_without_inputs() {
    cmd()
        .arg("dedup")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no input files"));
}

#[test]
fn test_zero_workers_rejected() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("a.jsonl");
    write_jsonl(&input, &[FOX]);

    cmd()
        .args(["dedup", input.to_str().unwrap(), "-o"])
        .arg(temp.path().join("out"))
        .args(["--workers", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("workers must be at least 1"));
}

#[test]
fn test_bad_env_workers() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("a.jsonl");
    write_jsonl(&input, &[FOX]);

    cmd()
        .env("SIFT_WORKERS", "lots")
        .args(["dedup", input.to_str().unwrap(), "-o"])
        .arg(temp.path().join("out"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("SIFT_WORKERS"));
}

#[test]
fn test_missing_blacklist_file() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("a.jsonl");
    write_jsonl(&input, &[FOX]);

    cmd()
        .args(["dedup", input.to_str().unwrap(), "-o"])
        .arg(temp.path().join("out"))
        .arg("--blacklist")
        .arg(temp.path().join("missing.txt"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Blacklist file not found"));
}

#[test]
fn test_malformed_line_reports_location() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("bad.jsonl");
    fs::write(&input, "{\"text\": \"ok\"}\nnot json\n").unwrap();

    cmd()
        .args(["dedup", input.to_str().unwrap(), "-o"])
        .arg(temp.path().join("out"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("bad.jsonl:2"));
}

// ============================================================================
// Dedup Tests
// ============================================================================

#[test]
fn test_dedup_json_output() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("corpus.jsonl");
    let out = temp.path().join("out");
    let blacklist = temp.path().join("blacklist.txt");
    write_jsonl(&input, &[NEKO, FOX, NEKO]);

    let output = cmd()
        .args(["dedup", input.to_str().unwrap(), "-o"])
        .arg(&out)
        .arg("--blacklist")
        .arg(&blacklist)
        .args(["--recreate-blacklist", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["mode"], "intra-file");
    assert_eq!(summary["totals"]["read"], 3);
    assert_eq!(summary["totals"]["accepted"], 2);
    assert_eq!(summary["totals"]["duplicates"], 1);
    assert!(summary["store"]["blacklist"].as_u64().unwrap() > 0);

    let written = fs::read_to_string(out.join("corpus.jsonl")).unwrap();
    assert_eq!(written.lines().count(), 2);
    assert!(!fs::read_to_string(&blacklist).unwrap().is_empty());
}

#[test]
fn test_dedup_broker_backend_glob() {
    let temp = TempDir::new().unwrap();
    write_jsonl(&temp.path().join("a.jsonl"), &[NEKO]);
    write_jsonl(&temp.path().join("b.jsonl"), &[NEKO, FOX]);
    let pattern = format!("{}/*.jsonl", temp.path().display());

    cmd()
        .args(["dedup", &pattern, "-o"])
        .arg(temp.path().join("out"))
        .args(["--store-backend", "broker", "-j", "2"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Near-duplicates:   1"));
}

#[test]
fn test_dedup_cross_file() {
    let temp = TempDir::new().unwrap();
    write_jsonl(&temp.path().join("a.jsonl"), &[NEKO]);
    write_jsonl(&temp.path().join("b.jsonl"), &[NEKO, FOX]);
    let pattern = format!("{}/*.jsonl", temp.path().display());
    let removed = temp.path().join("removed.jsonl");

    cmd()
        .args(["dedup", &pattern, "-o"])
        .arg(temp.path().join("out"))
        .args(["--mode", "cross-file", "--removed"])
        .arg(&removed)
        .assert()
        .success();

    assert_eq!(fs::read_to_string(&removed).unwrap().lines().count(), 2);
    assert_eq!(
        fs::read_to_string(temp.path().join("out/b.jsonl"))
            .unwrap()
            .lines()
            .count(),
        1
    );
}

#[test]
fn test_dedup_from_config_file() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("docs.jsonl");
    let out = temp.path().join("configured");
    fs::write(
        &input,
        format!(
            "{}\n{}\n",
            serde_json::json!({ "body": FOX }),
            serde_json::json!({ "body": FOX })
        ),
    )
    .unwrap();

    let config = temp.path().join("sift.json");
    fs::write(
        &config,
        serde_json::json!({
            "inputs": [input.display().to_string()],
            "output_dir": out.display().to_string(),
            "text_field": "body",
        })
        .to_string(),
    )
    .unwrap();

    cmd()
        .args(["dedup", "--config"])
        .arg(&config)
        .assert()
        .success();

    let written = fs::read_to_string(out.join("docs.jsonl")).unwrap();
    assert_eq!(written.lines().count(), 1);
}

// ============================================================================
// Clean and Completions Tests
// ============================================================================

#[test]
fn test_clean_with_ng_words() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("in.jsonl");
    let output = temp.path().join("clean.jsonl");
    let words = temp.path().join("ng.txt");
    fs::write(&words, "riverbank\n").unwrap();
    write_jsonl(&input, &[NEKO, FOX, "tiny"]);

    cmd()
        .args(["clean", input.to_str().unwrap(), "-o", output.to_str().unwrap()])
        .args(["--min-chars", "10", "--ng-words", words.to_str().unwrap(), "-j", "2"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Filtered:          2"));

    let written = fs::read_to_string(&output).unwrap();
    assert_eq!(written.lines().count(), 1);
    assert!(written.contains("吾輩は猫である"));
}

#[test]
fn test_completions_bash() {
    cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sift-dedup"));
}
