//! CLI integration tests for the `vitalog` subcommands.
//!
//! Uses `assert_cmd` to spawn the `vitalog` binary and verify exit codes,
//! stdout content, and stderr content. Every test gets its own database via
//! `--db` and runs without a provider key, so analysis uses the mock provider.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

/// A scratch database plus a command factory pointed at it.
struct Env {
    dir: TempDir,
}

impl Env {
    fn new() -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
        }
    }

    fn db(&self) -> PathBuf {
        self.dir.path().join("cli.db")
    }

    /// Helper: create a Command for the `vitalog` binary using this database.
    fn vitalog(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("vitalog");
        cmd.arg("--db").arg(self.db());
        cmd.env_remove("ANTHROPIC_API_KEY");
        cmd.env_remove("VITALOG_DB");
        cmd.env_remove("RUST_LOG");
        cmd
    }

    /// Submit an observation and return its id.
    fn submit(&self, subject: &str, observed_at: &str) -> u64 {
        let output = self
            .vitalog()
            .args(["--output", "json", "submit", "--subject", subject])
            .args(["--image", "https://img.example/a.jpg"])
            .args(["--attr", "effort=2", "--observed-at", observed_at])
            .output()
            .expect("run submit");
        assert!(output.status.success(), "submit failed: {output:?}");
        let json: serde_json::Value =
            serde_json::from_slice(&output.stdout).expect("submit prints JSON");
        json["id"].as_u64().expect("numeric id")
    }
}

fn stdout_json(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.output().expect("run command");
    assert!(output.status.success(), "command failed: {output:?}");
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    Env::new()
        .vitalog()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Health observation log with AI-assisted analysis",
        ));
}

#[test]
fn version_exits_0() {
    Env::new()
        .vitalog()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("vitalog"));
}

#[test]
fn missing_subcommand_exits_2() {
    Env::new().vitalog().assert().failure().code(2);
}

// ──────────────────────────────────────────────
// 2. Observations
// ──────────────────────────────────────────────

#[test]
fn submit_then_list_shows_pending_observation() {
    let env = Env::new();
    let id = env.submit("kid", "2024-01-03T08:00:00Z");

    let list = stdout_json(env.vitalog().args(["--output", "json", "list", "--subject", "kid"]));
    let list = list.as_array().expect("array");
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"].as_u64(), Some(id));
    assert_eq!(list[0]["attributes"]["effort"], 2);
    assert_eq!(list[0]["analysis"]["state"], "pending");
}

#[test]
fn list_for_unknown_subject_is_empty_text() {
    Env::new()
        .vitalog()
        .args(["list", "--subject", "nobody"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No observations for 'nobody'"));
}

#[test]
fn analyze_with_mock_provider_succeeds() {
    let env = Env::new();
    let id = env.submit("kid", "2024-01-03T08:00:00Z");

    let analyzed = stdout_json(env.vitalog().args(["--output", "json", "analyze", &id.to_string()]));
    assert_eq!(analyzed["outcome"], "completed");
    assert_eq!(analyzed["observation"]["analysis"]["state"], "succeeded");

    env.vitalog()
        .args(["status", &id.to_string()])
        .assert()
        .success()
        .stdout(predicate::str::contains("succeeded (B+)"));

    // A second run leaves the stored result alone.
    let again = stdout_json(env.vitalog().args(["--output", "json", "analyze", &id.to_string()]));
    assert_eq!(again["outcome"], "already_complete");
}

#[test]
fn analyze_unknown_observation_exits_1() {
    Env::new()
        .vitalog()
        .args(["analyze", "42"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn dismiss_of_non_rejected_observation_exits_1_and_keeps_it() {
    let env = Env::new();
    let id = env.submit("kid", "2024-01-03T08:00:00Z");
    env.vitalog()
        .args(["dismiss", &id.to_string()])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("is not rejected"));
    env.vitalog().args(["status", &id.to_string()]).assert().success();
}

#[test]
fn delete_removes_observation() {
    let env = Env::new();
    let id = env.submit("kid", "2024-01-03T08:00:00Z");
    env.vitalog()
        .args(["delete", &id.to_string()])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("Deleted observation {id}")));
    env.vitalog()
        .args(["status", &id.to_string()])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn json_errors_are_objects() {
    let output = Env::new()
        .vitalog()
        .args(["--output", "json", "status", "7"])
        .output()
        .expect("run status");
    assert_eq!(output.status.code(), Some(1));
    let err: serde_json::Value = serde_json::from_slice(&output.stderr).expect("stderr is JSON");
    assert!(err["error"].as_str().unwrap().contains("not found"));
}

#[test]
fn bad_attribute_is_a_usage_error() {
    Env::new()
        .vitalog()
        .args(["submit", "--subject", "kid", "--image", "a.jpg", "--attr", "novalue"])
        .assert()
        .failure()
        .code(2);
}

// ──────────────────────────────────────────────
// 3. Trends
// ──────────────────────────────────────────────

#[test]
fn trend_with_one_observation_is_insufficient() {
    let env = Env::new();
    env.submit("kid", "2024-01-03T08:00:00Z");
    let report = stdout_json(env.vitalog().args([
        "--output", "json", "trend", "--subject", "kid", "--start", "2024-01-01", "--end",
        "2024-01-07",
    ]));
    assert_eq!(report["status"], "insufficient_data");
    assert_eq!(report["stats"]["count"], 1);
    assert!(report["narrative"].is_null());
}

#[test]
fn closed_window_with_enough_analyzed_observations_gets_a_narrative() {
    let env = Env::new();
    for day in ["01", "02", "03"] {
        let id = env.submit("kid", &format!("2024-01-{day}T08:00:00Z"));
        env.vitalog().args(["analyze", &id.to_string()]).assert().success();
    }
    let args = [
        "--output", "json", "trend", "--subject", "kid", "--start", "2024-01-01", "--end",
        "2024-01-07",
    ];
    let first = stdout_json(env.vitalog().args(args));
    assert_eq!(first["status"], "fresh");
    assert!(first["narrative"].is_object());

    let second = stdout_json(env.vitalog().args(args));
    assert_eq!(second["status"], "cached");
    assert_eq!(second["narrative"], first["narrative"]);
}

#[test]
fn invalid_trend_date_exits_2() {
    Env::new()
        .vitalog()
        .args(["trend", "--subject", "kid", "--start", "01/01/2024", "--end", "2024-01-07"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("invalid date"));
}

#[test]
fn reversed_trend_range_exits_1() {
    Env::new()
        .vitalog()
        .args(["trend", "--subject", "kid", "--start", "2024-01-07", "--end", "2024-01-01"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid date range"));
}

// ──────────────────────────────────────────────
// 4. Configuration
// ──────────────────────────────────────────────

#[test]
fn malformed_config_file_exits_1() {
    let env = Env::new();
    let config = env.dir.path().join("vitalog.toml");
    std::fs::write(&config, "[server]\nport = \"not a number\"\n").unwrap();
    env.vitalog()
        .arg("--config")
        .arg(&config)
        .args(["list", "--subject", "kid"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("could not parse"));
}
