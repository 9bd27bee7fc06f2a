//! Sweeper: delete references whose link mtime plus TTL is in the past.
//!
//! One sweep lists the scratch directory, skips the sentinel, and removes
//! every entry with `mtime + ttl < now`. A failure on one entry is recorded
//! and the sweep moves on. Failing to list the directory fails the whole
//! sweep; the caller decides whether to try again on the next tick.
//!
//! Sweeps never overlap. Clones of a [`Sweeper`] share one in-progress flag,
//! and a sweep requested while another runs returns [`SweepRun::AlreadyRunning`]
//! without touching the filesystem.

#![allow(missing_docs)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};

use serde::Serialize;

use crate::artifacts::reference::{ScratchEntry, scan_scratch_dir};
use crate::core::config::Config;
use crate::core::errors::{AlmError, Result};
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle};

// ──────────────────── report types ────────────────────

/// Outcome of one sweep over the scratch directory.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    /// RFC 3339 UTC time the sweep started.
    pub started_at: String,
    /// Names removed, or names that would be removed in dry-run mode.
    pub deleted: Vec<String>,
    /// Expired entries that disappeared before this sweep got to them.
    pub already_gone: Vec<String>,
    pub retained: usize,
    pub errors: Vec<SweepEntryError>,
    pub duration_ms: u64,
    pub dry_run: bool,
}

impl SweepReport {
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// One entry the sweep could not inspect or remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepEntryError {
    pub name: String,
    pub error_code: String,
    pub error: String,
}

/// Result of asking for a sweep.
#[derive(Debug, Clone)]
pub enum SweepRun {
    Completed(SweepReport),
    /// Another sweep held the guard; nothing was done.
    AlreadyRunning,
}

impl SweepRun {
    pub fn report(&self) -> Option<&SweepReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::AlreadyRunning => None,
        }
    }
}

// ──────────────────── sweeper ────────────────────

/// Deletes expired references from one scratch directory.
#[derive(Clone)]
pub struct Sweeper {
    scratch_dir: PathBuf,
    ttl: Duration,
    dry_run: bool,
    logger: Option<ActivityLoggerHandle>,
    in_progress: Arc<AtomicBool>,
}

impl Sweeper {
    pub fn new(
        scratch_dir: PathBuf,
        ttl: Duration,
        dry_run: bool,
        logger: Option<ActivityLoggerHandle>,
    ) -> Self {
        Self {
            scratch_dir,
            ttl,
            dry_run,
            logger,
            in_progress: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_config(config: &Config, logger: Option<ActivityLoggerHandle>) -> Self {
        Self::new(
            config.artifacts.scratch_dir.clone(),
            config.artifacts.ttl(),
            config.sweep.dry_run,
            logger,
        )
    }

    /// Same sweeper reporting instead of deleting. Shares the in-progress
    /// guard with `self`.
    #[must_use]
    pub fn with_dry_run(&self, dry_run: bool) -> Self {
        Self {
            dry_run,
            ..self.clone()
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn sweep(&self) -> Result<SweepRun> {
        self.sweep_at(SystemTime::now())
    }

    /// Sweep as if the current time were `now`.
    pub fn sweep_at(&self, now: SystemTime) -> Result<SweepRun> {
        self.sweep_with(now, remove_entry)
    }

    /// Sweep using `remove` to delete each expired entry.
    fn sweep_with<F>(&self, now: SystemTime, remove: F) -> Result<SweepRun>
    where
        F: Fn(&Path) -> io::Result<()>,
    {
        let Some(_guard) = RunGuard::acquire(&self.in_progress) else {
            eprintln!("[ALM-SWEEP] previous sweep still running, skipping");
            return Ok(SweepRun::AlreadyRunning);
        };

        let started = Instant::now();
        let started_at = rfc3339(now);

        let entries = match scan_scratch_dir(&self.scratch_dir) {
            Ok(entries) => entries,
            Err(err) => {
                eprintln!("[ALM-SWEEP] {err}");
                self.log_event(ActivityEvent::SweepDirectoryUnavailable {
                    path: self.scratch_dir.to_string_lossy().into_owned(),
                    error_message: err.to_string(),
                });
                return Err(err);
            }
        };

        let mut report = SweepReport {
            started_at,
            deleted: Vec::new(),
            already_gone: Vec::new(),
            retained: 0,
            errors: Vec::new(),
            duration_ms: 0,
            dry_run: self.dry_run,
        };

        for entry in entries {
            match entry {
                ScratchEntry::Reference(reference) => {
                    if !reference.is_expired(self.ttl, now) {
                        report.retained += 1;
                        continue;
                    }
                    if self.dry_run {
                        report.deleted.push(reference.name);
                        continue;
                    }
                    match remove(&reference.link) {
                        Ok(()) => report.deleted.push(reference.name),
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {
                            report.already_gone.push(reference.name);
                        }
                        Err(e) => {
                            self.record_failure(&mut report, reference.name, &reference.link, e);
                        }
                    }
                }
                ScratchEntry::Unreadable { name, path, error } => {
                    if error.kind() == io::ErrorKind::NotFound {
                        report.already_gone.push(name);
                    } else {
                        self.record_failure(&mut report, name, &path, error);
                    }
                }
            }
        }

        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.summarize(&report);
        Ok(SweepRun::Completed(report))
    }

    fn record_failure(
        &self,
        report: &mut SweepReport,
        name: String,
        path: &Path,
        source: io::Error,
    ) {
        let err = AlmError::io(path, source);
        eprintln!("[ALM-SWEEP] failed to remove {name}: {err}");
        self.log_event(ActivityEvent::SweepEntryFailed {
            name: name.clone(),
            error_code: err.code().to_string(),
            error_message: err.to_string(),
        });
        report.errors.push(SweepEntryError {
            name,
            error_code: err.code().to_string(),
            error: err.to_string(),
        });
    }

    /// Operational summary, only when something was actually deleted.
    fn summarize(&self, report: &SweepReport) {
        if report.dry_run || report.deleted.is_empty() {
            return;
        }
        eprintln!(
            "[ALM-SWEEP] [{}] Deleted {} expired file(s) in {}: [{}]",
            report.started_at,
            report.deleted_count(),
            self.scratch_dir.display(),
            report.deleted.join(", ")
        );
        self.log_event(ActivityEvent::SweepCompleted {
            started_at: report.started_at.clone(),
            deleted: report.deleted.clone(),
            failed: report.errors.len(),
            duration_ms: report.duration_ms,
            dry_run: report.dry_run,
        });
    }

    fn log_event(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}

/// Clears the in-progress flag when dropped, including on panic.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Remove the link itself. A real directory left in the scratch dir is
/// removed recursively; nothing is ever followed through a symlink.
fn remove_entry(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn rfc3339(time: SystemTime) -> String {
    let dt: chrono::DateTime<chrono::Utc> = time.into();
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
