//! Signal handling: SIGTERM/SIGINT stop the daemon, SIGUSR1 asks for an
//! immediate sweep.
//!
//! `signal-hook` only flips atomic flags; the daemon loop polls them between
//! ticks. TTL is fixed for the process lifetime, so there is no reload signal.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use signal_hook::consts::{SIGINT, SIGTERM};

// ──────────────────── signal handler ────────────────────

/// Signal state shared between the OS hooks and the daemon loop.
#[derive(Clone)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
    sweep_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register the OS hooks.
    ///
    /// Registration is best-effort; a failure is reported on stderr and the
    /// daemon keeps running without that signal.
    pub fn new() -> Self {
        let handler = Self::detached();
        handler.register_signals();
        handler
    }

    /// Handler with no OS hooks; flags change only through `request_*`.
    pub fn detached() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            sweep_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Check (and clear) whether an immediate sweep was requested.
    pub fn should_sweep(&self) -> bool {
        self.sweep_flag.swap(false, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_sweep(&self) {
        self.sweep_flag.store(true, Ordering::Relaxed);
    }

    fn register_signals(&self) {
        if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[ALM-SIGNAL] failed to register SIGTERM: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[ALM-SIGNAL] failed to register SIGINT: {e}");
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::SIGUSR1;
            if let Err(e) = signal_hook::flag::register(SIGUSR1, Arc::clone(&self.sweep_flag)) {
                eprintln!("[ALM-SIGNAL] failed to register SIGUSR1: {e}");
            }
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────── shutdown coordinator ────────────────────

/// Runs named shutdown steps in order within an overall time limit.
pub struct ShutdownCoordinator {
    pub timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run each step; `true` only if every step ran and succeeded in time.
    pub fn execute(&self, steps: &mut [(&str, &mut dyn FnMut() -> bool)]) -> bool {
        let start = Instant::now();
        let mut all_ok = true;

        for (name, step) in steps.iter_mut() {
            if start.elapsed() > self.timeout {
                eprintln!("[ALM-SHUTDOWN] timeout reached, abandoning remaining steps");
                return false;
            }
            if step() {
                eprintln!("[ALM-SHUTDOWN] {name}: ok");
            } else {
                eprintln!("[ALM-SHUTDOWN] {name}: failed");
                all_ok = false;
            }
        }

        all_ok
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_handler_starts_clear() {
        let handler = SignalHandler::detached();
        assert!(!handler.should_shutdown());
        assert!(!handler.should_sweep());
    }

    #[test]
    fn shutdown_is_sticky_and_shared_by_clones() {
        let handler = SignalHandler::detached();
        let clone = handler.clone();

        handler.request_shutdown();
        assert!(clone.should_shutdown());
        assert!(clone.should_shutdown());
    }

    #[test]
    fn sweep_flag_clears_on_read() {
        let handler = SignalHandler::detached();
        handler.request_sweep();
        assert!(handler.should_sweep());
        assert!(!handler.should_sweep());
    }

    #[test]
    fn coordinator_runs_every_step_in_order() {
        let mut order = Vec::new();
        let mut first = || {
            order.push("join sweeper");
            true
        };
        let mut steps: Vec<(&str, &mut dyn FnMut() -> bool)> = vec![("join sweeper", &mut first)];
        let ok = ShutdownCoordinator::default().execute(&mut steps);
        drop(steps);
        assert!(ok);
        assert_eq!(order, vec!["join sweeper"]);
    }

    #[test]
    fn coordinator_reports_failed_step() {
        let mut good = || true;
        let mut bad = || false;
        let mut steps: Vec<(&str, &mut dyn FnMut() -> bool)> =
            vec![("flush logs", &mut good), ("join sweeper", &mut bad)];
        assert!(!ShutdownCoordinator::default().execute(&mut steps));
    }

    #[test]
    fn coordinator_abandons_after_timeout() {
        let mut slow = || {
            std::thread::sleep(Duration::from_millis(20));
            true
        };
        let mut never = || -> bool { panic!("must not run after timeout") };
        let mut steps: Vec<(&str, &mut dyn FnMut() -> bool)> =
            vec![("slow", &mut slow), ("never", &mut never)];
        assert!(!ShutdownCoordinator::new(Duration::from_millis(1)).execute(&mut steps));
    }
}
