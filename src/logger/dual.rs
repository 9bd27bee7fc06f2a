//! Dual-write coordinator: JSONL always, SQLite when the `sqlite` feature is on.
//!
//! A dedicated logger thread owns both backends. Publishers and the sweeper
//! send [`ActivityEvent`]s through a bounded crossbeam channel with
//! `try_send()`, so a slow disk never stalls a request or a sweep.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{AlmError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};
#[cfg(feature = "sqlite")]
use crate::logger::sqlite::{ActivityRow, SqliteLogger};

const CHANNEL_CAPACITY: usize = 1024;
/// Activity rows older than this are pruned when the logger opens SQLite.
#[cfg(feature = "sqlite")]
const SQLITE_RETENTION_DAYS: u32 = 30;

/// Events accepted by the activity logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityEvent {
    DaemonStarted {
        version: String,
        config_hash: String,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
    },
    ArtifactPublished {
        name: String,
        link: String,
        target: String,
    },
    PublishDenied {
        path: String,
        error_code: String,
        reason: String,
    },
    LinkCreationFailed {
        name: String,
        link: String,
        target: String,
        error_message: String,
    },
    SweepCompleted {
        /// RFC 3339 time the sweep started.
        started_at: String,
        deleted: Vec<String>,
        failed: usize,
        duration_ms: u64,
        dry_run: bool,
    },
    SweepEntryFailed {
        name: String,
        error_code: String,
        error_message: String,
    },
    SweepDirectoryUnavailable {
        path: String,
        error_message: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Asks the logger thread to flush and exit.
    Shutdown,
}

/// Cheaply cloneable sender side of the logger.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Build a handle whose events land in the returned receiver instead of a
    /// logger thread. Used by one-shot commands and tests.
    pub fn channel(capacity: usize) -> (Self, Receiver<ActivityEvent>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                dropped_events: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Non-blocking send. A full channel drops the event and bumps a counter.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        // Disconnected is fine during shutdown.
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks until queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

/// Options for building the dual-write logger.
pub struct DualLoggerConfig {
    /// `None` disables SQLite.
    pub sqlite_path: Option<PathBuf>,
    pub jsonl_config: JsonlConfig,
    pub channel_capacity: usize,
}

impl Default for DualLoggerConfig {
    fn default() -> Self {
        Self {
            sqlite_path: None,
            jsonl_config: JsonlConfig::default(),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Spawn the logger thread and return its handle.
///
/// The thread exits on [`ActivityLoggerHandle::shutdown`] or once every
/// handle has been dropped.
pub fn spawn_logger(
    config: DualLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("alm-logger".to_string())
        .spawn(move || {
            logger_thread_main(&rx, config.sqlite_path, config.jsonl_config, &dropped_clone);
        })
        .map_err(|e| AlmError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

#[allow(clippy::needless_pass_by_value)]
fn logger_thread_main(
    rx: &Receiver<ActivityEvent>,
    sqlite_path: Option<PathBuf>,
    jsonl_config: JsonlConfig,
    dropped: &AtomicU64,
) {
    #[cfg(feature = "sqlite")]
    let mut sqlite = sqlite_path.and_then(|p| match SqliteLogger::open(&p) {
        Ok(db) => {
            if let Err(e) = db.prune_activity_log(SQLITE_RETENTION_DAYS) {
                eprintln!("[ALM-DUAL] failed to prune activity log: {e}");
            }
            Some(db)
        }
        Err(e) => {
            eprintln!("[ALM-DUAL] failed to open SQLite at {}: {e}", p.display());
            None
        }
    });
    #[cfg(not(feature = "sqlite"))]
    let _ = sqlite_path;
    #[cfg(feature = "sqlite")]
    let mut sqlite_failures: u32 = 0;

    let mut jsonl = JsonlWriter::open(jsonl_config);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }

        let entry = event_to_log_entry(&event);
        jsonl.write_entry(&entry);

        #[cfg(feature = "sqlite")]
        {
            if let Some(db) = &sqlite {
                if db.log_activity(&entry_to_activity_row(&entry)).is_ok() {
                    sqlite_failures = 0;
                } else {
                    sqlite_failures += 1;
                    if sqlite_failures >= 3 {
                        eprintln!(
                            "[ALM-DUAL] SQLite write failed {sqlite_failures} times, disabling"
                        );
                        sqlite = None;
                    }
                }
            }
        }
    }

    jsonl.flush();
    jsonl.fsync();
}

/// Map an event onto its JSONL representation.
pub fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::DaemonStarted {
            version,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStart, Severity::Info);
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::DaemonStopped {
            reason,
            uptime_secs,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStop, Severity::Info);
            e.details = Some(format!("reason={reason} uptime={uptime_secs}s"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::ArtifactPublished { name, link, target } => {
            let mut e = LogEntry::new(EventType::ArtifactPublish, Severity::Info);
            e.name = Some(name.clone());
            e.path = Some(link.clone());
            e.target = Some(target.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::PublishDenied {
            path,
            error_code,
            reason,
        } => {
            let mut e = LogEntry::new(EventType::PublishDenied, Severity::Warning);
            e.path = Some(path.clone());
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(reason.clone());
            e
        }
        ActivityEvent::LinkCreationFailed {
            name,
            link,
            target,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::LinkFailed, Severity::Warning);
            e.name = Some(name.clone());
            e.path = Some(link.clone());
            e.target = Some(target.clone());
            e.ok = Some(false);
            e.error_code = Some("ALM-2003".to_string());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::SweepCompleted {
            started_at,
            deleted,
            failed,
            duration_ms,
            dry_run,
        } => {
            let mut e = LogEntry::new(EventType::SweepComplete, Severity::Info);
            e.count = Some(deleted.len());
            e.names = Some(deleted.clone());
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(*failed == 0);
            e.details = Some(format!(
                "started_at={started_at} failed={failed} dry_run={dry_run}"
            ));
            e
        }
        ActivityEvent::SweepEntryFailed {
            name,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::SweepEntryFailed, Severity::Warning);
            e.name = Some(name.clone());
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::SweepDirectoryUnavailable {
            path,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::SweepDirUnavailable, Severity::Critical);
            e.path = Some(path.clone());
            e.ok = Some(false);
            e.error_code = Some("ALM-2101".to_string());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::DaemonStop, Severity::Info),
    }
}

#[cfg(feature = "sqlite")]
#[allow(clippy::cast_possible_wrap)]
fn entry_to_activity_row(entry: &LogEntry) -> ActivityRow {
    ActivityRow {
        timestamp: entry.ts.clone(),
        event_type: entry.event.label().to_string(),
        severity: entry.severity.label().to_string(),
        name: entry.name.clone(),
        path: entry.path.clone(),
        target: entry.target.clone(),
        item_count: entry.count.map(|c| c as i64),
        names: entry
            .names
            .as_ref()
            .and_then(|names| serde_json::to_string(names).ok()),
        duration_ms: entry.duration_ms.map(|d| d as i64),
        success: i32::from(entry.ok.unwrap_or(true)),
        error_code: entry.error_code.clone(),
        error_message: entry.error_message.clone(),
        details: entry.details.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn full_channel_counts_dropped_events() {
        let (handle, rx) = ActivityLoggerHandle::channel(1);
        handle.send(ActivityEvent::Error {
            code: "ALM-3900".to_string(),
            message: "first".to_string(),
        });
        handle.send(ActivityEvent::Error {
            code: "ALM-3900".to_string(),
            message: "second".to_string(),
        });
        assert_eq!(handle.dropped_events(), 1);
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn sweep_event_maps_count_and_names() {
        let entry = event_to_log_entry(&ActivityEvent::SweepCompleted {
            started_at: "2026-01-01T00:00:00.000Z".to_string(),
            deleted: vec!["a".to_string()],
            failed: 0,
            duration_ms: 3,
            dry_run: false,
        });
        assert_eq!(entry.event, EventType::SweepComplete);
        assert_eq!(entry.count, Some(1));
        assert_eq!(entry.names, Some(vec!["a".to_string()]));
        assert_eq!(entry.ok, Some(true));
    }

    #[test]
    fn denial_maps_to_warning() {
        let entry = event_to_log_entry(&ActivityEvent::PublishDenied {
            path: "/etc/passwd".to_string(),
            error_code: "ALM-2001".to_string(),
            reason: "outside allowed root".to_string(),
        });
        assert_eq!(entry.severity, Severity::Warning);
        assert_eq!(entry.ok, Some(false));
    }

    #[test]
    fn logger_thread_writes_jsonl_and_exits_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let config = DualLoggerConfig {
            sqlite_path: Some(dir.path().join("activity.sqlite3")),
            jsonl_config: JsonlConfig {
                path: path.clone(),
                fallback_path: None,
                max_size_bytes: 1024 * 1024,
                max_rotated_files: 2,
                fsync_interval_secs: 60,
            },
            channel_capacity: 16,
        };
        let (handle, join) = spawn_logger(config).unwrap();

        handle.send(ActivityEvent::ArtifactPublished {
            name: "abc123".to_string(),
            link: "/srv/public/tmp/abc123".to_string(),
            target: "/data/report.txt".to_string(),
        });
        handle.shutdown();

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let _ = join.join();
            let _ = done_tx.send(());
        });
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("logger thread should exit after shutdown");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"artifact_publish\""));
        assert!(contents.contains("abc123"));

        #[cfg(feature = "sqlite")]
        {
            let db = SqliteLogger::open(&dir.path().join("activity.sqlite3")).unwrap();
            let rows = db.recent_activity(5).unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].event_type, "artifact_publish");
        }
    }
}
