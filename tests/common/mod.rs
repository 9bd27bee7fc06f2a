#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_alm") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "alm.exe" } else { "alm" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve alm binary path for integration test"),
    }
}

/// Run `alm` with `args`, keeping HOME and every `ALM_*` override isolated in
/// `home` when given.
pub fn run_cli_case_in(case_name: &str, args: &[&str], home: Option<&Path>) -> CmdResult {
    let root = std::env::temp_dir().join("alm-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command.args(args).env("RUST_BACKTRACE", "1");
    for (key, _) in std::env::vars() {
        if key.starts_with("ALM_") {
            command.env_remove(key);
        }
    }
    if let Some(home) = home {
        command.env("HOME", home);
    }
    let output = command.output().expect("execute alm command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_in(case_name, args, None)
}

/// A throwaway deployment: allowed root, scratch dir with sentinel, and a
/// config file pointing at both plus private log paths.
pub struct Deployment {
    pub dir: tempfile::TempDir,
    pub root: PathBuf,
    pub scratch: PathBuf,
    pub config_path: PathBuf,
}

impl Deployment {
    pub fn new(ttl_seconds: u64) -> Self {
        let dir = tempfile::tempdir().expect("create deployment dir");
        let root = dir.path().join("cli-output");
        let scratch = dir.path().join("public").join("tmp");
        fs::create_dir_all(&root).expect("create allowed root");
        fs::create_dir_all(&scratch).expect("create scratch dir");
        fs::write(scratch.join(".gitkeep"), b"").expect("write sentinel");
        let root = root.canonicalize().expect("canonical root");
        let scratch = scratch.canonicalize().expect("canonical scratch");

        let data = dir.path().join("data");
        let config_path = dir.path().join("alm.toml");
        let toml = format!(
            "[artifacts]\n\
             allowed_root = {root:?}\n\
             scratch_dir = {scratch:?}\n\
             ttl_seconds = {ttl_seconds}\n\
             public_path = \"/tmp\"\n\
             \n\
             [sweep]\n\
             interval_secs = 1\n\
             \n\
             [paths]\n\
             jsonl_log = {jsonl:?}\n\
             sqlite_db = {db:?}\n",
            root = root.to_string_lossy(),
            scratch = scratch.to_string_lossy(),
            jsonl = data.join("activity.jsonl").to_string_lossy(),
            db = data.join("activity.sqlite3").to_string_lossy(),
        );
        fs::write(&config_path, toml).expect("write config");

        Self {
            dir,
            root,
            scratch,
            config_path,
        }
    }

    pub fn config_arg(&self) -> &str {
        self.config_path.to_str().expect("utf-8 config path")
    }

    pub fn run(&self, case_name: &str, args: &[&str]) -> CmdResult {
        let mut full = vec!["--config", self.config_arg(), "--json"];
        full.extend_from_slice(args);
        run_cli_case_in(case_name, &full, Some(self.dir.path()))
    }
}
