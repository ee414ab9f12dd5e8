#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

const KEYS: &str = "\
# sample keyspace
user:1:name\tstring
user:1:email
user:2:name
session:abc\thash
";

struct Workspace {
    dir: TempDir,
    keys: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let keys = dir.path().join("keys.txt");
        fs::write(&keys, KEYS).expect("write keys");
        Self { dir, keys }
    }

    fn config_path(&self) -> PathBuf {
        self.dir.path().join("config.toml")
    }

    /// A command isolated from the user's config and environment.
    fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("keyscope");
        cmd.env("KEYSCOPE_CONFIG", self.config_path())
            .env_remove("KEYSCOPE_PROFILE")
            .env_remove("KEYSCOPE_LOG");
        cmd
    }
}

fn json_of(cmd: &mut Command) -> Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("valid json")
}

fn keys_arg(path: &Path) -> String {
    path.display().to_string()
}

#[test]
fn scan_reports_counts_and_top_level_prefixes() {
    let ws = Workspace::new();
    let json = json_of(
        ws.cmd()
            .args(["--format", "json", "scan", "--keys-file"])
            .arg(keys_arg(&ws.keys)),
    );

    assert_eq!(json["keys"], 4);
    assert_eq!(json["status"]["state"]["state"], "complete");
    let prefixes = json["prefixes"].as_array().expect("prefixes array");
    let summary: Vec<(String, u64)> = prefixes
        .iter()
        .map(|entry| {
            (
                entry["prefix"].as_str().unwrap_or_default().to_string(),
                entry["keys"].as_u64().unwrap_or_default(),
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![("session".to_string(), 1), ("user".to_string(), 3)]
    );
}

#[test]
fn scan_of_a_simulated_keyspace_honours_the_pattern() {
    let ws = Workspace::new();
    let json = json_of(ws.cmd().args([
        "--format",
        "json",
        "scan",
        "--simulate",
        "2000",
        "--seed",
        "4",
        "--pattern",
        "user:*",
    ]));

    assert_eq!(json["status"]["pattern"], "user:*");
    let prefixes = json["prefixes"].as_array().expect("prefixes array");
    assert_eq!(prefixes.len(), 1);
    assert_eq!(prefixes[0]["prefix"], "user");
    assert_eq!(prefixes[0]["keys"], json["keys"]);
}

#[test]
fn tree_expands_requested_prefixes() {
    let ws = Workspace::new();
    let json = json_of(
        ws.cmd()
            .args(["--format", "json", "tree", "--expand", "user:1", "--keys-file"])
            .arg(keys_arg(&ws.keys)),
    );

    let rows = json["rows"].as_array().expect("rows array");
    let paths: Vec<&str> = rows.iter().filter_map(|row| row["path"].as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "session",
            "session:abc",
            "user",
            "user:1",
            "user:1:email",
            "user:1:name",
            "user:2"
        ]
    );
    assert_eq!(rows[2]["kind"], "node");
    assert_eq!(rows[2]["count"], 3);
    assert_eq!(rows[1]["kind"], "leaf");
    assert_eq!(rows[1]["key"], "session:abc");
}

#[test]
fn tree_describe_reports_types() {
    let ws = Workspace::new();
    let json = json_of(
        ws.cmd()
            .args(["--format", "json", "tree", "--describe", "--keys-file"])
            .arg(keys_arg(&ws.keys)),
    );

    let rows = json["rows"].as_array().expect("rows array");
    let session = rows
        .iter()
        .find(|row| row["key"] == "session:abc")
        .expect("session row");
    assert_eq!(session["data_type"], "hash");
    assert_eq!(session["ttl_secs"], -1);
}

#[test]
fn search_ranks_abbreviations() {
    let ws = Workspace::new();
    let json = json_of(
        ws.cmd()
            .args(["--format", "json", "search", "u1n", "--keys-file"])
            .arg(keys_arg(&ws.keys)),
    );

    assert_eq!(json["query"], "u1n");
    assert!(json["matches"].as_u64().unwrap_or_default() >= 1);
    assert_eq!(json["top"][0]["key"], "user:1:name");
}

#[test]
fn missing_source_fails_with_exit_code_one() {
    let ws = Workspace::new();
    let assert = ws.cmd().arg("scan").assert().failure().code(1);
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).to_string();
    assert!(stderr.contains("no key source"), "stderr: {stderr}");
}

#[test]
fn unknown_profile_is_an_error() {
    let ws = Workspace::new();
    let assert = ws
        .cmd()
        .args(["--profile", "nope", "scan"])
        .assert()
        .failure()
        .code(1);
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).to_string();
    assert!(stderr.contains("nope"), "stderr: {stderr}");
}

#[test]
fn profiles_round_trip_through_the_config_file() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["profile", "set", "local", "--default", "--page-size", "50", "--keys-file"])
        .arg(keys_arg(&ws.keys))
        .assert()
        .success();
    ws.cmd()
        .args(["profile", "set", "synthetic", "--simulate", "500", "--preset", "large"])
        .assert()
        .success();
    assert!(ws.config_path().exists());

    let list = json_of(ws.cmd().args(["--format", "json", "profile", "list"]));
    let names: Vec<&str> = list
        .as_array()
        .expect("profile array")
        .iter()
        .filter_map(|profile| profile["name"].as_str())
        .collect();
    assert_eq!(names, vec!["local", "synthetic"]);

    let shown = json_of(ws.cmd().args(["--format", "json", "profile", "show", "synthetic"]));
    assert_eq!(shown["simulate"], 500);
    assert_eq!(shown["preset"], "large");

    // The default profile supplies the source.
    let scan = json_of(ws.cmd().args(["--format", "json", "scan"]));
    assert_eq!(scan["keys"], 4);

    let scan = json_of(ws.cmd().args(["--format", "json", "--profile", "synthetic", "scan"]));
    assert_eq!(scan["keys"], 500);

    ws.cmd()
        .args(["profile", "default", "--clear"])
        .assert()
        .success();
    ws.cmd().arg("scan").assert().failure().code(1);

    ws.cmd()
        .args(["profile", "delete", "synthetic"])
        .assert()
        .success();
    ws.cmd()
        .args(["profile", "show", "synthetic"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn profile_rejects_conflicting_sources() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["profile", "set", "both", "--simulate", "10", "--keys-file"])
        .arg(keys_arg(&ws.keys))
        .assert()
        .failure();
    assert!(!ws.config_path().exists());
}

#[test]
fn completions_are_generated() {
    let ws = Workspace::new();
    let output = ws
        .cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let script = String::from_utf8_lossy(&output);
    assert!(script.contains("keyscope"));
}
