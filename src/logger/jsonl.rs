//! JSONL activity log: one self-contained JSON object per line.
//!
//! Lines are assembled in memory and handed to `write_all` in one call so a
//! concurrent `tail -f` never sees half an entry.
//!
//! Degradation chain when the disk misbehaves:
//! primary path -> fallback path -> stderr (`[ALM-JSONL]` prefix) -> discard.
//! The sweeper must keep running even if nothing can be logged.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::core::errors::{AlmError, Result};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Event kinds recorded in the activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ArtifactPublish,
    PublishDenied,
    LinkFailed,
    SweepComplete,
    SweepEntryFailed,
    SweepDirUnavailable,
    DaemonStart,
    DaemonStop,
    Error,
}

impl EventType {
    /// Stable snake_case label, identical to the serialized form.
    pub const fn label(self) -> &'static str {
        match self {
            Self::ArtifactPublish => "artifact_publish",
            Self::PublishDenied => "publish_denied",
            Self::LinkFailed => "link_failed",
            Self::SweepComplete => "sweep_complete",
            Self::SweepEntryFailed => "sweep_entry_failed",
            Self::SweepDirUnavailable => "sweep_dir_unavailable",
            Self::DaemonStart => "daemon_start",
            Self::DaemonStop => "daemon_stop",
            Self::Error => "error",
        }
    }
}

impl Severity {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// A single JSONL entry; everything but `ts`, `event`, `severity` is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    /// Reference name inside the scratch directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Affected filesystem path (link or source).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Link target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Number of entries affected (sweeps).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    /// Names affected (sweeps).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            name: None,
            path: None,
            target: None,
            count: None,
            names: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Normal,
    Fallback,
    Stderr,
    Discard,
}

/// Configuration for the JSONL writer.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Optional second location, ideally on another filesystem.
    pub fallback_path: Option<PathBuf>,
    /// Rotate once the live file would exceed this size.
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/alm/activity.jsonl"),
            fallback_path: None,
            max_size_bytes: 20 * 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval_secs: 10,
        }
    }
}

/// Append-only JSONL writer with size rotation and fallback.
pub struct JsonlWriter {
    config: JsonlConfig,
    writer: Option<BufWriter<File>>,
    state: WriterState,
    bytes_written: u64,
    last_fsync: SystemTime,
}

impl JsonlWriter {
    /// Open the log, walking down the degradation chain on failure.
    pub fn open(config: JsonlConfig) -> Self {
        let mut w = Self {
            config,
            writer: None,
            state: WriterState::Discard,
            bytes_written: 0,
            last_fsync: SystemTime::now(),
        };
        w.attach(WriterState::Normal);
        w
    }

    /// Serialize and append one entry.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(json) => self.write_line(&format!("{json}\n")),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[ALM-JSONL] serialize error: {e}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
    }

    /// Flush and `sync_data` the underlying file.
    pub fn fsync(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
            let _ = w.get_ref().sync_data();
            self.last_fsync = SystemTime::now();
        }
    }

    /// Current degradation state.
    pub fn state(&self) -> &'static str {
        match self.state {
            WriterState::Normal => "normal",
            WriterState::Fallback => "fallback",
            WriterState::Stderr => "stderr",
            WriterState::Discard => "discard",
        }
    }

    fn write_line(&mut self, line: &str) {
        if self.bytes_written + line.len() as u64 > self.config.max_size_bytes
            && matches!(self.state, WriterState::Normal | WriterState::Fallback)
        {
            self.rotate();
        }

        match self.state {
            WriterState::Normal | WriterState::Fallback => {
                let written = self
                    .writer
                    .as_mut()
                    .is_some_and(|w| w.write_all(line.as_bytes()).is_ok());
                if written {
                    self.bytes_written += line.len() as u64;
                    self.maybe_fsync();
                } else {
                    self.degrade();
                    self.write_line(line);
                }
            }
            WriterState::Stderr => {
                let _ = write!(io::stderr(), "[ALM-JSONL] {line}");
            }
            WriterState::Discard => {}
        }
    }

    fn maybe_fsync(&mut self) {
        let elapsed = SystemTime::now()
            .duration_since(self.last_fsync)
            .unwrap_or(Duration::ZERO);
        if elapsed.as_secs() >= self.config.fsync_interval_secs {
            self.fsync();
        }
    }

    fn active_path(&self) -> Option<&Path> {
        match self.state {
            WriterState::Normal => Some(&self.config.path),
            WriterState::Fallback => self.config.fallback_path.as_deref(),
            WriterState::Stderr | WriterState::Discard => None,
        }
    }

    /// Try to attach at `start` or the next level down.
    fn attach(&mut self, start: WriterState) {
        let mut level = start;
        loop {
            let path = match level {
                WriterState::Normal => Some(self.config.path.clone()),
                WriterState::Fallback => self.config.fallback_path.clone(),
                WriterState::Stderr | WriterState::Discard => {
                    self.writer = None;
                    self.state = level;
                    if level == WriterState::Stderr {
                        let _ = writeln!(
                            io::stderr(),
                            "[ALM-JSONL] no writable log file, using stderr"
                        );
                    }
                    return;
                }
            };

            if let Some(path) = path
                && let Ok((file, size)) = open_append(&path)
            {
                if level == WriterState::Fallback {
                    let _ = writeln!(
                        io::stderr(),
                        "[ALM-JSONL] primary path failed, using fallback: {}",
                        path.display()
                    );
                }
                self.writer = Some(BufWriter::with_capacity(64 * 1024, file));
                self.state = level;
                self.bytes_written = size;
                return;
            }
            level = next_level(level);
        }
    }

    fn degrade(&mut self) {
        self.writer = None;
        if self.state == WriterState::Stderr {
            self.state = WriterState::Discard;
            return;
        }
        self.attach(next_level(self.state));
    }

    fn rotate(&mut self) {
        self.flush();
        self.writer = None;
        let Some(base) = self.active_path().map(Path::to_path_buf) else {
            return;
        };

        // .N is dropped, .N-1 -> .N, ..., live -> .1
        let _ = fs::remove_file(rotated_name(&base, self.config.max_rotated_files));
        for i in (1..self.config.max_rotated_files).rev() {
            let _ = fs::rename(rotated_name(&base, i), rotated_name(&base, i + 1));
        }
        let _ = fs::rename(&base, rotated_name(&base, 1));

        match open_append(&base) {
            Ok((file, _)) => {
                self.writer = Some(BufWriter::with_capacity(64 * 1024, file));
                self.bytes_written = 0;
            }
            Err(_) => self.degrade(),
        }
    }
}

const fn next_level(state: WriterState) -> WriterState {
    match state {
        WriterState::Normal => WriterState::Fallback,
        WriterState::Fallback => WriterState::Stderr,
        WriterState::Stderr | WriterState::Discard => WriterState::Discard,
    }
}

/// Open or create a file for appending. Returns `(File, current_size)`.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| AlmError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| AlmError::io(path, source))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

/// `activity.jsonl` -> `activity.jsonl.3`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

/// Current UTC time as ISO 8601 with millisecond precision.
pub fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
