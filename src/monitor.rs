//! Progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};

/// Snapshot handed to [`SearchMonitor::iteration`] once per outer iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationReport {
    pub run: u32,
    pub iteration: u32,
    pub current_value: f64,
    pub new_value: f64,
    pub best_value: f64,
    pub temperature: f64,
    pub scenarios_detected: usize,
}

/// Callbacks from a running search. Called from the driver thread for
/// iterations and from pool workers for scenarios, hence `Sync`.
pub trait SearchMonitor: Sync {
    fn is_cancelled(&self) -> bool {
        false
    }

    fn iteration(&self, _report: &IterationReport) {}

    fn scenario_evaluated(&self, _scenario: &str) {}
}

/// Monitor that never cancels and ignores progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

impl SearchMonitor for NoopMonitor {}

/// Cancellation flag that can be flipped from another thread.
#[derive(Debug, Default)]
pub struct CancelFlag(AtomicBool);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

impl SearchMonitor for CancelFlag {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
