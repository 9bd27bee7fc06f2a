//! Daemon loop: fixed-interval sweep scheduling, signal polling, and the
//! sweeper worker thread.
//!
//! Threads:
//! - **Main loop**: polls signal flags, decides when a sweep is due
//! - **Sweeper thread**: runs sweeps handed to it over a rendezvous channel
//! - **Logger thread**: writes JSONL + SQLite (via dual.rs)
//!
//! The main loop checks the sweeper thread every few seconds and respawns it
//! after a panic, up to 3 times in 5 minutes.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::RwLock;

use crate::artifacts::sweeper::{SweepReport, SweepRun, Sweeper};
use crate::core::config::Config;
use crate::core::errors::{AlmError, Result};
use crate::daemon::signals::{ShutdownCoordinator, SignalHandler};
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle, DualLoggerConfig, spawn_logger};
use crate::logger::jsonl::JsonlConfig;

// ──────────────────── channel capacities ────────────────────

/// Main loop → sweeper: bounded(0). Rendezvous channel.
/// The sweeper only accepts work while idle; a trigger sent while it is busy
/// is dropped instead of queued.
const SWEEP_CHANNEL_CAP: usize = 0;

/// Upper bound on how long a signal can go unnoticed.
const LOOP_TICK: Duration = Duration::from_millis(250);

// ──────────────────── thread panic tracking ────────────────────

const MAX_RESPAWNS: u32 = 3;
const RESPAWN_WINDOW: Duration = Duration::from_secs(300);
const THREAD_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

struct ThreadHealth {
    panic_times: Vec<Instant>,
}

impl ThreadHealth {
    fn new() -> Self {
        Self {
            panic_times: Vec::new(),
        }
    }

    /// Record a panic. Returns false once the respawn limit is exceeded.
    fn record_panic(&mut self) -> bool {
        let now = Instant::now();
        self.panic_times
            .retain(|t| now.duration_since(*t) < RESPAWN_WINDOW);
        self.panic_times.push(now);
        self.panic_times.len() <= MAX_RESPAWNS as usize
    }
}

// ──────────────────── scheduling ────────────────────

/// Why a sweep was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepTrigger {
    Scheduled,
    /// SIGUSR1 or an explicit request.
    Forced,
}

/// Fixed-interval schedule. The first sweep is due immediately.
#[derive(Debug, Clone)]
pub struct SweepScheduler {
    interval: Duration,
    next_due: Instant,
}

impl SweepScheduler {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            next_due: now,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The trigger to dispatch at `now`, if any. A forced request wins over a
    /// due schedule.
    pub fn poll(&self, now: Instant, forced: bool) -> Option<SweepTrigger> {
        if forced {
            Some(SweepTrigger::Forced)
        } else if now >= self.next_due {
            Some(SweepTrigger::Scheduled)
        } else {
            None
        }
    }

    /// A sweep was handed to the sweeper at `now`; the next one is due one
    /// interval later.
    pub fn mark_dispatched(&mut self, now: Instant) {
        self.next_due = now + self.interval;
    }

    pub fn time_until_due(&self, now: Instant) -> Duration {
        self.next_due.saturating_duration_since(now)
    }
}

// ──────────────────── shared status ────────────────────

/// Result of the most recent sweep the daemon ran.
#[derive(Debug, Clone)]
pub enum SweepStatus {
    Completed {
        trigger: SweepTrigger,
        report: SweepReport,
    },
    Failed {
        trigger: SweepTrigger,
        error_code: String,
        message: String,
    },
}

pub type SharedSweepStatus = Arc<RwLock<Option<SweepStatus>>>;

// ──────────────────── daemon configuration ────────────────────

/// Arguments for `alm daemon`.
#[derive(Debug, Clone, Default)]
pub struct DaemonArgs {
    /// Overrides `sweep.interval_secs`.
    pub interval: Option<Duration>,
}

// ──────────────────── main daemon struct ────────────────────

/// Runs sweeps on a schedule until a shutdown signal arrives.
pub struct ArtifactDaemon {
    config: Config,
    sweeper: Sweeper,
    scheduler: SweepScheduler,
    logger_handle: ActivityLoggerHandle,
    logger_join: Option<thread::JoinHandle<()>>,
    signal_handler: SignalHandler,
    last_sweep: SharedSweepStatus,
    start_time: Instant,
}

impl ArtifactDaemon {
    /// Build the daemon and register OS signal hooks.
    pub fn init(config: Config, args: &DaemonArgs) -> Result<Self> {
        Self::init_with_signals(config, args, SignalHandler::new())
    }

    /// Build the daemon around an existing signal handler.
    pub fn init_with_signals(
        config: Config,
        args: &DaemonArgs,
        signal_handler: SignalHandler,
    ) -> Result<Self> {
        let start_time = Instant::now();
        let interval = args.interval.unwrap_or_else(|| config.sweep.interval());
        if interval.is_zero() {
            return Err(AlmError::InvalidConfig {
                details: "daemon sweep interval must be > 0".to_string(),
            });
        }

        // 1. Logger.
        let logger_config = DualLoggerConfig {
            sqlite_path: Some(config.paths.sqlite_db.clone()),
            jsonl_config: JsonlConfig {
                path: config.paths.jsonl_log.clone(),
                fallback_path: None,
                max_size_bytes: 50 * 1024 * 1024,
                max_rotated_files: 5,
                fsync_interval_secs: 30,
            },
            channel_capacity: 1024,
        };
        let (logger_handle, logger_join) = spawn_logger(logger_config)?;

        // 2. Sweeper, sharing the logger.
        let sweeper = Sweeper::from_config(&config, Some(logger_handle.clone()));

        // 3. Schedule; first sweep runs right away.
        let scheduler = SweepScheduler::new(interval, start_time);

        Ok(Self {
            config,
            sweeper,
            scheduler,
            logger_handle,
            logger_join: Some(logger_join),
            signal_handler,
            last_sweep: Arc::new(RwLock::new(None)),
            start_time,
        })
    }

    /// Clone of the signal handler, for requesting shutdown or a sweep from
    /// another thread.
    pub fn signal_handler(&self) -> SignalHandler {
        self.signal_handler.clone()
    }

    /// Shared slot holding the most recent sweep result.
    pub fn status_handle(&self) -> SharedSweepStatus {
        Arc::clone(&self.last_sweep)
    }

    pub fn last_sweep(&self) -> Option<SweepStatus> {
        self.last_sweep.read().clone()
    }

    pub fn logger(&self) -> &ActivityLoggerHandle {
        &self.logger_handle
    }

    /// Run the scheduler loop until shutdown is requested.
    pub fn run(&mut self) -> Result<()> {
        let config_hash = self.config.stable_hash().unwrap_or_default();
        self.logger_handle.send(ActivityEvent::DaemonStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash,
        });
        eprintln!(
            "[ALM-DAEMON] started: scratch_dir={} ttl={}s interval={}s dry_run={}",
            self.config.artifacts.scratch_dir.display(),
            self.config.artifacts.ttl_seconds,
            self.scheduler.interval().as_secs(),
            self.config.sweep.dry_run
        );

        let (sweep_tx, sweep_rx) = bounded::<SweepTrigger>(SWEEP_CHANNEL_CAP);
        let mut sweeper_health = ThreadHealth::new();
        let mut sweeper_join: Option<thread::JoinHandle<()>> =
            Some(self.spawn_sweeper_thread(sweep_rx.clone())?);
        let tick = LOOP_TICK.min(self.scheduler.interval());
        let mut last_health_check = Instant::now();
        let mut failure: Option<AlmError> = None;

        // ──────── main loop ────────
        loop {
            // 1. Shutdown signal.
            if self.signal_handler.should_shutdown() {
                eprintln!("[ALM-DAEMON] shutdown requested");
                break;
            }

            // 2. Forced sweep (SIGUSR1) or due schedule.
            let forced = self.signal_handler.should_sweep();
            if forced {
                eprintln!("[ALM-DAEMON] forced sweep requested (SIGUSR1)");
            }
            let now = Instant::now();
            if let Some(trigger) = self.scheduler.poll(now, forced) {
                self.dispatch(&sweep_tx, trigger, now);
            }

            // 3. Sweeper thread health.
            if last_health_check.elapsed() >= THREAD_HEALTH_CHECK_INTERVAL {
                last_health_check = Instant::now();
                if let Err(err) =
                    self.supervise_sweeper(&mut sweeper_health, &mut sweeper_join, &sweep_rx)
                {
                    failure = Some(err);
                    break;
                }
            }

            // 4. Sleep until the next tick.
            thread::sleep(tick);
        }

        // ──────── shutdown sequence ────────
        let reason = failure
            .as_ref()
            .map_or_else(|| "clean shutdown".to_string(), ToString::to_string);
        self.shutdown(sweep_tx, sweeper_join, &reason);
        failure.map_or(Ok(()), Err)
    }

    /// Respawn the sweeper thread if it has exited. Fails once the thread has
    /// died more than `MAX_RESPAWNS` times within `RESPAWN_WINDOW`, or when a
    /// replacement cannot be spawned.
    fn supervise_sweeper(
        &self,
        health: &mut ThreadHealth,
        sweeper_join: &mut Option<thread::JoinHandle<()>>,
        sweep_rx: &Receiver<SweepTrigger>,
    ) -> Result<()> {
        let sweeper_dead = sweeper_join
            .as_ref()
            .is_some_and(std::thread::JoinHandle::is_finished);
        if !sweeper_dead {
            return Ok(());
        }

        eprintln!("[ALM-DAEMON] sweeper thread exited unexpectedly");
        if let Some(handle) = sweeper_join.take() {
            let _ = handle.join();
        }

        let err = if health.record_panic() {
            eprintln!("[ALM-DAEMON] respawning sweeper thread");
            match self.spawn_sweeper_thread(sweep_rx.clone()) {
                Ok(handle) => {
                    *sweeper_join = Some(handle);
                    return Ok(());
                }
                Err(err) => {
                    eprintln!("[ALM-DAEMON] sweeper respawn failed: {err}");
                    err
                }
            }
        } else {
            eprintln!("[ALM-DAEMON] sweeper exceeded respawn limit, shutting down");
            AlmError::Runtime {
                details: "sweeper thread exceeded respawn limit".to_string(),
            }
        };

        self.logger_handle.send(ActivityEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        });
        Err(err)
    }

    /// Hand a trigger to the sweeper if it is idle.
    ///
    /// A refused trigger is not queued. The schedule is only advanced when the
    /// sweeper accepted the work, so a due scheduled sweep is retried on the
    /// next tick.
    fn dispatch(&mut self, sweep_tx: &Sender<SweepTrigger>, trigger: SweepTrigger, now: Instant) {
        match sweep_tx.try_send(trigger) {
            Ok(()) => self.scheduler.mark_dispatched(now),
            Err(TrySendError::Full(_)) => {
                if trigger == SweepTrigger::Forced {
                    eprintln!("[ALM-DAEMON] sweeper busy, forced sweep dropped");
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                eprintln!("[ALM-DAEMON] sweeper thread gone, trigger dropped");
            }
        }
    }

    // ──────────────────── worker thread ────────────────────

    fn spawn_sweeper_thread(
        &self,
        sweep_rx: Receiver<SweepTrigger>,
    ) -> Result<thread::JoinHandle<()>> {
        let sweeper = self.sweeper.clone();
        let last_sweep = Arc::clone(&self.last_sweep);

        thread::Builder::new()
            .name("alm-sweeper".to_string())
            .spawn(move || {
                sweeper_thread_main(&sweep_rx, &sweeper, &last_sweep);
            })
            .map_err(|source| AlmError::Runtime {
                details: format!("failed to spawn sweeper thread: {source}"),
            })
    }

    // ──────────────────── shutdown ────────────────────

    fn shutdown(
        &mut self,
        sweep_tx: Sender<SweepTrigger>,
        sweeper_join: Option<thread::JoinHandle<()>>,
        reason: &str,
    ) {
        let uptime_secs = self.start_time.elapsed().as_secs();

        // Dropping the sender ends the sweeper's receive loop once any
        // in-flight sweep finishes.
        drop(sweep_tx);
        let mut sweeper_join = sweeper_join;
        let mut join_sweeper = || sweeper_join.take().is_none_or(|h| h.join().is_ok());

        let logger_handle = self.logger_handle.clone();
        let mut stop_logger = || {
            logger_handle.send(ActivityEvent::DaemonStopped {
                reason: reason.to_string(),
                uptime_secs,
            });
            logger_handle.shutdown();
            true
        };

        let mut logger_join = self.logger_join.take();
        let mut join_logger = || logger_join.take().is_none_or(|h| h.join().is_ok());

        let mut steps: Vec<(&str, &mut dyn FnMut() -> bool)> = vec![
            ("join sweeper", &mut join_sweeper),
            ("stop logger", &mut stop_logger),
            ("join logger", &mut join_logger),
        ];
        ShutdownCoordinator::default().execute(&mut steps);

        eprintln!("[ALM-DAEMON] shutdown complete (uptime={uptime_secs}s)");
    }
}

// ──────────────────── sweeper thread ────────────────────

/// Sweeper thread: runs one sweep per received trigger and publishes the
/// result to the shared status slot.
fn sweeper_thread_main(
    sweep_rx: &Receiver<SweepTrigger>,
    sweeper: &Sweeper,
    last_sweep: &RwLock<Option<SweepStatus>>,
) {
    while let Ok(trigger) = sweep_rx.recv() {
        let status = match sweeper.sweep() {
            Ok(SweepRun::Completed(report)) => SweepStatus::Completed { trigger, report },
            Ok(SweepRun::AlreadyRunning) => continue,
            Err(err) => SweepStatus::Failed {
                trigger,
                error_code: err.code().to_string(),
                message: err.to_string(),
            },
        };
        *last_sweep.write() = Some(status);
    }
}

// ──────────────────── tests ────────────────────
