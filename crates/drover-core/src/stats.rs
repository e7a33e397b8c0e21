//! Driver counters

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Live counters, shared between the control thread and tick runs
#[derive(Debug, Default)]
pub struct DriverStats {
    ticks_started: AtomicU64,
    ticks_completed: AtomicU64,
    tick_failures: AtomicU64,
    overruns: AtomicU64,
    snapshots_written: AtomicU64,
    timeouts_handled: AtomicU64,
    timeouts_failed: AtomicU64,
    loop_failed: AtomicBool,
}

/// Point-in-time copy of [`DriverStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub ticks_started: u64,
    pub ticks_completed: u64,
    pub tick_failures: u64,
    /// Overrun warnings, one per re-check of a still-running tick
    pub overruns: u64,
    pub snapshots_written: u64,
    pub timeouts_handled: u64,
    pub timeouts_failed: u64,
    /// The control loop died on an unexpected failure
    pub loop_failed: bool,
}

impl DriverStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn tick_started(&self) {
        self.ticks_started.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn tick_completed(&self) {
        self.ticks_completed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn tick_failed(&self) {
        self.tick_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn overrun(&self) {
        self.overruns.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn snapshot_written(&self) {
        self.snapshots_written.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn timeout_handled(&self) {
        self.timeouts_handled.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn timeout_failed(&self) {
        self.timeouts_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn loop_failed(&self) {
        self.loop_failed.store(true, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks_started: self.ticks_started.load(Ordering::SeqCst),
            ticks_completed: self.ticks_completed.load(Ordering::SeqCst),
            tick_failures: self.tick_failures.load(Ordering::SeqCst),
            overruns: self.overruns.load(Ordering::SeqCst),
            snapshots_written: self.snapshots_written.load(Ordering::SeqCst),
            timeouts_handled: self.timeouts_handled.load(Ordering::SeqCst),
            timeouts_failed: self.timeouts_failed.load(Ordering::SeqCst),
            loop_failed: self.loop_failed.load(Ordering::SeqCst),
        }
    }
}
