//! Signal flags and cooperative stop tokens.
//!
//! SIGTERM/SIGINT request shutdown, SIGHUP a configuration reload and SIGUSR1
//! an immediate space report. Flags are registered through `signal-hook` and
//! polled by the supervisor; workers only ever see a [`StopToken`].

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep inside [`StopToken::sleep`].
pub const SLEEP_SLICE: Duration = Duration::from_millis(500);

// ──────────────────── signal handler ────────────────────

/// Process signal state shared between the OS hooks and the supervisor loop.
#[derive(Clone)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
    reload_flag: Arc<AtomicBool>,
    report_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Flags without OS registration, driven only programmatically.
    pub fn detached() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            reload_flag: Arc::new(AtomicBool::new(false)),
            report_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flags wired to SIGTERM, SIGINT, SIGHUP and SIGUSR1.
    /// Registration failures are printed and otherwise ignored.
    pub fn new() -> Self {
        let handler = Self::detached();
        handler.register_signals();
        handler
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Check and clear.
    pub fn should_reload(&self) -> bool {
        self.reload_flag.swap(false, Ordering::Relaxed)
    }

    /// Check and clear.
    pub fn should_report(&self) -> bool {
        self.report_flag.swap(false, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_reload(&self) {
        self.reload_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_report(&self) {
        self.report_flag.store(true, Ordering::Relaxed);
    }

    #[cfg(feature = "daemon")]
    fn register_signals(&self) {
        use signal_hook::consts::{SIGINT, SIGTERM};

        for (signal, name) in [(SIGTERM, "SIGTERM"), (SIGINT, "SIGINT")] {
            if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&self.shutdown_flag)) {
                eprintln!("[DSK-SIGNAL] failed to register {name}: {e}");
            }
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::{SIGHUP, SIGUSR1};
            if let Err(e) = signal_hook::flag::register(SIGHUP, Arc::clone(&self.reload_flag)) {
                eprintln!("[DSK-SIGNAL] failed to register SIGHUP: {e}");
            }
            if let Err(e) = signal_hook::flag::register(SIGUSR1, Arc::clone(&self.report_flag)) {
                eprintln!("[DSK-SIGNAL] failed to register SIGUSR1: {e}");
            }
        }
    }

    #[cfg(not(feature = "daemon"))]
    #[allow(clippy::unused_self)]
    fn register_signals(&self) {}
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────── stop token ────────────────────

/// Cooperative cancellation shared by one generation of workers.
///
/// Workers observe the token only between device calls, so a delete that has
/// already been sent is allowed to complete or time out.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    stopped: Arc<AtomicBool>,
}

impl StopToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// Sleep for `duration` in slices of at most [`SLEEP_SLICE`].
    /// Returns `false` as soon as the token is stopped.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            std::thread::sleep(remaining.min(SLEEP_SLICE));
        }
    }
}
