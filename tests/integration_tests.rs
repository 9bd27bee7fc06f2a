//! Integration tests: CLI smoke tests and end-to-end publish/sweep scenarios
//! through both the binary and the library API.

mod common;

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use serde_json::Value;

use artifact_lifecycle::artifacts::publisher::{LinkOutcome, Publisher};
use artifact_lifecycle::artifacts::reference::{SENTINEL_NAME, download_url};
use artifact_lifecycle::artifacts::sweeper::{SweepRun, Sweeper};
use artifact_lifecycle::core::config::{ArtifactsConfig, Config};
use artifact_lifecycle::core::errors::AlmError;

use common::Deployment;

fn parse_json(result: &common::CmdResult) -> Value {
    serde_json::from_str(result.stdout.trim()).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({e}); log: {}",
            result.log_path.display()
        )
    })
}

fn backdate(path: &Path, age: Duration) {
    let when = FileTime::from_system_time(SystemTime::now() - age);
    filetime::set_symlink_file_times(path, when, when).expect("backdate entry");
}

fn scratch_names(scratch: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(scratch)
        .expect("read scratch dir")
        .map(|e| e.expect("dir entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ──────────────────── CLI smoke tests ────────────────────

#[test]
fn help_command_prints_usage() {
    let result = common::run_cli_case("help_command_prints_usage", &["--help"]);
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(
        result.stdout.contains("Usage: alm [OPTIONS] <COMMAND>"),
        "missing help banner; log: {}",
        result.log_path.display()
    );
}

#[test]
fn version_command_prints_version() {
    let result = common::run_cli_case("version_command_prints_version", &["--version"]);
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(
        result.stdout.contains(env!("CARGO_PKG_VERSION")),
        "missing version; log: {}",
        result.log_path.display()
    );
}

#[test]
fn config_validate_reports_hash() {
    let deployment = Deployment::new(120);
    let result = deployment.run("config_validate_reports_hash", &["config", "validate"]);
    assert!(
        result.status.success(),
        "log: {}",
        result.log_path.display()
    );
    let payload = parse_json(&result);
    assert_eq!(payload["valid"], Value::Bool(true));
    assert!(payload["hash"].as_str().is_some_and(|h| !h.is_empty()));
    assert_eq!(payload["scratch_dir_exists"], Value::Bool(true));
}

#[test]
fn config_validate_rejects_zero_interval() {
    let deployment = Deployment::new(120);
    let raw = fs::read_to_string(&deployment.config_path).unwrap();
    fs::write(
        &deployment.config_path,
        raw.replace("interval_secs = 1", "interval_secs = 0"),
    )
    .unwrap();

    let result = deployment.run("config_validate_rejects_zero_interval", &["config", "validate"]);
    assert_eq!(
        result.status.code(),
        Some(1),
        "log: {}",
        result.log_path.display()
    );
    assert_eq!(parse_json(&result)["valid"], Value::Bool(false));
}

#[test]
fn missing_explicit_config_is_a_user_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    let result = common::run_cli_case_in(
        "missing_explicit_config_is_a_user_error",
        &["--config", missing.to_str().unwrap(), "list"],
        Some(dir.path()),
    );
    assert_eq!(result.status.code(), Some(1));
    assert!(result.stderr.contains("ALM-1002"));
}

// ──────────────────── CLI publish / list / sweep ────────────────────

#[test]
fn cli_publish_list_and_sweep_round() {
    let deployment = Deployment::new(120);
    let source = deployment.root.join("report.txt");
    fs::write(&source, b"signed tx").unwrap();

    let published = deployment.run(
        "cli_publish",
        &[
            "publish",
            source.to_str().unwrap(),
            "abc123",
            "--origin",
            "https://api.example.org",
        ],
    );
    assert!(
        published.status.success(),
        "log: {}",
        published.log_path.display()
    );
    let payload = parse_json(&published);
    assert_eq!(payload["publication"]["name"], "abc123");
    assert_eq!(payload["publication"]["public_path"], "/tmp/abc123");
    assert_eq!(payload["publication"]["link_outcome"]["status"], "created");
    assert_eq!(payload["url"], "https://api.example.org/tmp/abc123");
    let link = deployment.scratch.join("abc123");
    assert_eq!(fs::read_link(&link).unwrap(), source);

    let listed = deployment.run("cli_list", &["list"]);
    assert!(listed.status.success(), "log: {}", listed.log_path.display());
    let references = parse_json(&listed)["references"].clone();
    assert_eq!(references.as_array().map(Vec::len), Some(1));
    assert_eq!(references[0]["name"], "abc123");
    assert_eq!(references[0]["expired"], Value::Bool(false));

    // Fresh link survives a sweep.
    let swept = deployment.run("cli_sweep_fresh", &["sweep"]);
    assert!(swept.status.success(), "log: {}", swept.log_path.display());
    assert_eq!(
        parse_json(&swept)["report"]["deleted"],
        Value::Array(Vec::new())
    );

    backdate(&link, Duration::from_secs(130));
    let swept = deployment.run("cli_sweep_expired", &["sweep"]);
    assert!(swept.status.success(), "log: {}", swept.log_path.display());
    assert_eq!(
        parse_json(&swept)["report"]["deleted"],
        serde_json::json!(["abc123"])
    );
    assert!(swept.stderr.contains("Deleted 1 expired file(s)"));
    assert_eq!(scratch_names(&deployment.scratch), vec![SENTINEL_NAME]);
    assert!(source.exists());
}

#[test]
fn cli_publish_generates_name_when_omitted() {
    let deployment = Deployment::new(120);
    let source = deployment.root.join("witness.json");
    fs::write(&source, b"{}").unwrap();

    let result = deployment.run("cli_publish_generated", &["publish", source.to_str().unwrap()]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let name = parse_json(&result)["publication"]["name"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(name.len(), 32);
    assert!(deployment.scratch.join(&name).exists());
}

#[test]
fn cli_publish_outside_root_is_denied() {
    let deployment = Deployment::new(120);
    let result = deployment.run("cli_publish_denied", &["publish", "/etc/passwd", "x"]);

    assert_eq!(
        result.status.code(),
        Some(1),
        "log: {}",
        result.log_path.display()
    );
    assert!(result.stderr.contains("ALM-2001"));
    assert_eq!(scratch_names(&deployment.scratch), vec![SENTINEL_NAME]);
}

#[test]
fn cli_publish_duplicate_name_is_partial() {
    let deployment = Deployment::new(120);
    let first = deployment.root.join("first.txt");
    let second = deployment.root.join("second.txt");
    fs::write(&first, b"1").unwrap();
    fs::write(&second, b"2").unwrap();

    let ok = deployment.run("cli_dup_first", &["publish", first.to_str().unwrap(), "same"]);
    assert!(ok.status.success(), "log: {}", ok.log_path.display());
    let dup = deployment.run("cli_dup_second", &["publish", second.to_str().unwrap(), "same"]);

    assert_eq!(dup.status.code(), Some(4), "log: {}", dup.log_path.display());
    assert_eq!(
        parse_json(&dup)["publication"]["link_outcome"]["status"],
        "failed"
    );
    assert_eq!(fs::read_link(deployment.scratch.join("same")).unwrap(), first);
}

#[test]
fn cli_sweep_dry_run_keeps_files() {
    let deployment = Deployment::new(120);
    let stale = deployment.scratch.join("stale");
    fs::write(&stale, b"x").unwrap();
    backdate(&stale, Duration::from_secs(500));

    let result = deployment.run("cli_sweep_dry_run", &["sweep", "--dry-run"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let report = parse_json(&result)["report"].clone();
    assert_eq!(report["dry_run"], Value::Bool(true));
    assert_eq!(report["deleted"], serde_json::json!(["stale"]));
    assert!(stale.exists());
}

#[cfg(feature = "sqlite")]
#[test]
fn cli_history_shows_publish_activity() {
    let deployment = Deployment::new(120);
    let source = deployment.root.join("report.txt");
    fs::write(&source, b"x").unwrap();
    let ok = deployment.run("cli_history_publish", &["publish", source.to_str().unwrap(), "abc"]);
    assert!(ok.status.success(), "log: {}", ok.log_path.display());
    let _ = deployment.run("cli_history_denied", &["publish", "/etc/passwd", "x"]);

    let history = deployment.run("cli_history", &["history", "--limit", "10"]);
    assert!(history.status.success(), "log: {}", history.log_path.display());
    let rows = parse_json(&history)["rows"].clone();
    let events: Vec<&str> = rows
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|row| row["event_type"].as_str())
        .collect();
    assert_eq!(events, vec!["publish_denied", "artifact_publish"]);
}

// ──────────────────── library scenarios ────────────────────

fn library_config(deployment: &Deployment, ttl_seconds: u64) -> Config {
    let mut config = Config::default();
    config.artifacts = ArtifactsConfig {
        allowed_root: deployment.root.clone(),
        scratch_dir: deployment.scratch.clone(),
        ttl_seconds,
        public_path: "/tmp".to_string(),
    };
    config
}

#[test]
fn report_under_root_resolves_and_etc_passwd_is_denied() {
    let deployment = Deployment::new(120);
    let config = library_config(&deployment, 120);
    let source = deployment.root.join("report.txt");
    fs::write(&source, b"report body").unwrap();
    let publisher = Publisher::new(&config.artifacts, None);

    let publication = publisher.publish(&source, "abc123").unwrap();
    assert_eq!(publication.link_outcome, LinkOutcome::Created);
    assert_eq!(
        fs::read(deployment.scratch.join("abc123")).unwrap(),
        b"report body"
    );
    assert_eq!(
        download_url("https://node.example", &config.artifacts.public_path, &publication.name),
        "https://node.example/tmp/abc123"
    );

    let err = publisher
        .publish(Path::new("/etc/passwd"), "x")
        .unwrap_err();
    assert!(matches!(err, AlmError::AccessDenied { .. }));
    assert!(!deployment.scratch.join("x").exists());
}

#[test]
fn sweep_scenario_deletes_only_expired_entry() {
    let deployment = Deployment::new(120);
    let config = library_config(&deployment, 120);
    let now = SystemTime::now();
    for (name, age) in [("a", 130), ("b", 10)] {
        let path = deployment.scratch.join(name);
        fs::write(&path, name).unwrap();
        let when = FileTime::from_system_time(now - Duration::from_secs(age));
        filetime::set_symlink_file_times(&path, when, when).unwrap();
    }

    let sweeper = Sweeper::from_config(&config, None);
    let SweepRun::Completed(report) = sweeper.sweep_at(now).unwrap() else {
        panic!("sweep skipped");
    };

    assert_eq!(report.deleted_count(), 1);
    assert_eq!(report.deleted, vec!["a".to_string()]);
    assert_eq!(scratch_names(&deployment.scratch), vec![SENTINEL_NAME, "b"]);
}

#[test]
fn published_link_expires_without_touching_source() {
    let deployment = Deployment::new(60);
    let config = library_config(&deployment, 60);
    let source = deployment.root.join("tx.signed");
    fs::write(&source, b"tx").unwrap();

    let publication = Publisher::new(&config.artifacts, None)
        .publish_generated(&source)
        .unwrap();
    backdate(&publication.link, Duration::from_secs(61));

    let run = Sweeper::from_config(&config, None).sweep().unwrap();
    assert_eq!(
        run.report().map(|r| r.deleted.clone()),
        Some(vec![publication.name.clone()])
    );
    assert!(!publication.link.exists());
    assert!(source.exists());
}
